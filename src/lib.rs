//! # paramsync
//!
//! 손실 링크 위의 신뢰성 있는 파라미터 동기화 프로토콜 코어
//!
//! ## 핵심 특징
//! - **Selective-repeat 리스트 수신**: 컴포넌트별 누락 인덱스만 재요청
//! - **버스트 페이싱**: 틱당 컴포넌트별 요청 수 제한, 낮은 인덱스 우선
//! - **쓰기 확인**: 로컬 편집은 스테이징, 원격 에코로만 확정
//! - **부분 실패 복구**: 재시도 예산 소진 시 Abandoned, 받은 값은 유지
//! - **링크 독립**: 추상 송신/수신 이벤트만 다룸

pub mod component;
pub mod config;
pub mod driver;
pub mod error;
pub mod guard;
pub mod message;
pub mod service;
pub mod session;
pub mod sim;
pub mod stats;
pub mod store;

pub use component::{Component, ComponentRegistry};
pub use config::Config;
pub use driver::ProtocolDriver;
pub use error::{Error, Result};
pub use guard::{RetransmissionGuard, TickOutcome};
pub use message::{
    ComponentId, Inbound, Outbound, ParamIndex, ParamRef, ParameterUpdate, SessionState,
    StatusEvent, StorageAction, UasId,
};
pub use service::ParamSyncService;
pub use session::{TransmissionSession, TransmissionTracker};
pub use sim::SimulatedAgent;
pub use stats::SyncStats;
pub use store::{ParameterStore, Snapshot};
