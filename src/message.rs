//! 프로토콜 이벤트 정의
//!
//! 코어는 직렬화를 하지 않음. 링크 계층이 serde로 자유롭게 인코딩

use serde::{Deserialize, Serialize};

use crate::Error;

/// 원격 에이전트(UAS) ID
pub type UasId = u8;

/// 컴포넌트 ID
pub type ComponentId = u8;

/// 리스트 내 파라미터 인덱스
pub type ParamIndex = u16;

/// 파라미터 갱신 형태
///
/// 리스트 수신 중에는 인덱스/총 개수가 함께 오고, 단일 푸시는 이름만 옴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterUpdate {
    /// 리스트 수신용 (인덱스 + 총 개수)
    Indexed { index: ParamIndex, count: u16 },

    /// 단일 파라미터 푸시
    Bare,
}

impl ParameterUpdate {
    /// 선택적 필드에서 변환 (둘 다 있어야 Indexed)
    pub fn from_parts(index: Option<ParamIndex>, count: Option<u16>) -> Self {
        match (index, count) {
            (Some(index), Some(count)) => ParameterUpdate::Indexed { index, count },
            _ => ParameterUpdate::Bare,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, ParameterUpdate::Indexed { .. })
    }
}

/// 단일 파라미터 참조 (인덱스 또는 이름)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamRef {
    Index(ParamIndex),
    Name(String),
}

/// 영구 저장소 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageAction {
    /// 영구 저장소 → RAM
    Read,

    /// RAM → 영구 저장소
    Write,
}

/// 수신 이벤트 (링크 계층 → 코어)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inbound {
    /// 컴포넌트 발견
    ComponentAnnounced {
        uas_id: UasId,
        component: ComponentId,
        name: String,
    },

    /// 파라미터 값 수신
    ParameterValue {
        component: ComponentId,
        update: ParameterUpdate,
        name: String,
        value: f32,
    },
}

/// 송신 이벤트 (코어 → 링크 계층)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outbound {
    /// 전체 리스트 요청 (`None`이면 전체 브로드캐스트)
    RequestParameterList { component: Option<ComponentId> },

    /// 단일 파라미터 요청
    RequestParameter {
        component: ComponentId,
        param: ParamRef,
    },

    /// 파라미터 쓰기
    WriteParameter {
        component: ComponentId,
        name: String,
        value: f32,
    },

    /// 영구 저장소 읽기/쓰기
    StorageAction {
        component: ComponentId,
        action: StorageAction,
    },
}

impl Outbound {
    /// 대상 컴포넌트 (브로드캐스트면 None)
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            Outbound::RequestParameterList { component } => *component,
            Outbound::RequestParameter { component, .. }
            | Outbound::WriteParameter { component, .. }
            | Outbound::StorageAction { component, .. } => Some(*component),
        }
    }
}

/// 컴포넌트별 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    ListRequested,
    Receiving,
    Complete,
    Abandoned,
}

impl SessionState {
    /// 리스트 수신 진행 중 여부
    pub fn is_list_mode(&self) -> bool {
        matches!(self, SessionState::ListRequested | SessionState::Receiving)
    }

    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Abandoned)
    }
}

/// 상태 이벤트 (코어 → 호출자/UI)
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// 세션 상태 전이
    SessionStateChanged {
        component: ComponentId,
        state: SessionState,
        missing_count: usize,
    },

    /// 로컬 편집 스테이징 (원격 확인 전)
    ParameterChangedLocally {
        component: ComponentId,
        name: String,
        value: f32,
    },

    /// 권한 있는 값 갱신 (원격 확인 값)
    ParameterUpdated {
        component: ComponentId,
        name: String,
        value: f32,
    },

    /// 쓰기 확인됨
    WriteConfirmed {
        component: ComponentId,
        name: String,
        value: f32,
    },

    /// 복구되었거나 포기된 이상 상황
    Fault { component: ComponentId, error: Error },

    /// 컴포넌트를 모르는 상태의 전체 리스트 요청 포기
    ListRequestFailed { error: Error },
}
