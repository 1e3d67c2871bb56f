//! 에러 타입 정의

use thiserror::Error;

use crate::message::{ComponentId, ParamIndex};

/// 파라미터 동기화 에러 타입
///
/// 상태 이벤트(`StatusEvent::Fault`)에 실려 나가므로 `Clone`/`PartialEq` 유지
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("알 수 없는 컴포넌트: component={component}")]
    UnknownComponent { component: ComponentId },

    #[error("파라미터 개수 불일치: component={component}, expected={expected}, reported={reported}")]
    CountMismatch {
        component: ComponentId,
        expected: u16,
        reported: u16,
    },

    #[error("전송 포기: component={component}, missing={}", .missing.len())]
    TransmissionAbandoned {
        component: ComponentId,
        missing: Vec<ParamIndex>,
    },

    #[error("전체 리스트 요청 응답 없음: attempts={attempts}")]
    ListRequestUnanswered { attempts: u32 },

    #[error("쓰기 ACK 없음: component={component}, name={name}, attempts={attempts}")]
    StaleWriteAck {
        component: ComponentId,
        name: String,
        attempts: u32,
    },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("직렬화 에러: {0}")]
    Serialization(String),

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("채널 에러")]
    ChannelError,

    #[error("서비스 종료됨")]
    ServiceStopped,
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
