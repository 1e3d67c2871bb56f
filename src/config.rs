//! 프로토콜 설정

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 파라미터 동기화 설정
///
/// 외부 설정 계층이 로드해서 넘겨줌 (코어는 파일을 읽지 않음)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 누락 파라미터 재요청 타임아웃 (밀리초)
    pub retransmission_timeout_ms: u64,

    /// 쓰기 ACK 대기 타임아웃 (밀리초)
    pub rewrite_timeout_ms: u64,

    /// 틱당 컴포넌트별 최대 요청 수
    pub retransmission_burst_request_size: usize,

    /// 연속 타임아웃 허용 횟수 (도달 시 Abandoned)
    pub max_consecutive_timeouts: u32,

    /// 재전송 가드 틱 주기 (밀리초)
    pub tick_interval_ms: u64,

    /// 송신 이벤트 채널 크기
    pub outbound_channel_capacity: usize,

    /// 상태 이벤트 채널 크기
    pub status_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retransmission_timeout_ms: 500,
            rewrite_timeout_ms: 1000,
            retransmission_burst_request_size: 5,
            max_consecutive_timeouts: 10,
            tick_interval_ms: 100,
            outbound_channel_capacity: 1000,
            status_channel_capacity: 1000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저지연 링크용 설정
    pub fn low_latency() -> Self {
        Self {
            retransmission_timeout_ms: 150,
            rewrite_timeout_ms: 300,
            retransmission_burst_request_size: 10,
            max_consecutive_timeouts: 8,
            tick_interval_ms: 30,
            ..Self::default()
        }
    }

    /// 불안정한 링크용 설정 (적은 버스트, 긴 인내)
    pub fn unstable_link() -> Self {
        Self {
            retransmission_timeout_ms: 1200,
            rewrite_timeout_ms: 2500,
            retransmission_burst_request_size: 2,
            max_consecutive_timeouts: 25,
            tick_interval_ms: 250,
            ..Self::default()
        }
    }

    pub fn retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmission_timeout_ms)
    }

    pub fn rewrite_timeout(&self) -> Duration {
        Duration::from_millis(self.rewrite_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.retransmission_burst_request_size == 0 {
            return Err(Error::InvalidConfig(
                "retransmission_burst_request_size must be >= 1".into(),
            ));
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(Error::InvalidConfig(
                "max_consecutive_timeouts must be >= 1".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick_interval_ms must be >= 1".into()));
        }
        if self.outbound_channel_capacity == 0 || self.status_channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel capacity must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::low_latency().validate().is_ok());
        assert!(Config::unstable_link().validate().is_ok());
    }

    #[test]
    fn test_zero_burst_rejected() {
        let config = Config {
            retransmission_burst_request_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config {
            max_consecutive_timeouts: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
