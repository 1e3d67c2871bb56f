//! 동기화 통계

use std::time::{Duration, Instant};

use crate::guard::TickOutcome;

/// 전체 동기화 통계
#[derive(Debug, Clone)]
pub struct SyncStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 리스트 요청 수 (재요청 포함)
    pub list_requests: u64,

    /// 인덱스 재요청 수
    pub read_retransmissions: u64,

    /// 단일 파라미터 요청 수 (호출자 요청)
    pub single_requests: u64,

    /// 쓰기 요청 수 (최초 전송)
    pub write_requests: u64,

    /// 쓰기 재전송 수
    pub rewrites: u64,

    /// 수신 파라미터 수
    pub params_received: u64,

    /// 중복 수신 수
    pub duplicates: u64,

    /// 총 개수 불일치 수
    pub count_mismatches: u64,

    /// 확인된 쓰기 수
    pub writes_confirmed: u64,

    /// 완료된 세션 수
    pub sessions_completed: u64,

    /// 포기된 세션 수
    pub sessions_abandoned: u64,

    /// 포기된 쓰기 수
    pub writes_abandoned: u64,

    /// 응답 없이 포기된 전체 리스트 요청 수
    pub list_requests_abandoned: u64,

    /// 실행된 틱 수
    pub ticks: u64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            list_requests: 0,
            read_retransmissions: 0,
            single_requests: 0,
            write_requests: 0,
            rewrites: 0,
            params_received: 0,
            duplicates: 0,
            count_mismatches: 0,
            writes_confirmed: 0,
            sessions_completed: 0,
            sessions_abandoned: 0,
            writes_abandoned: 0,
            list_requests_abandoned: 0,
            ticks: 0,
        }
    }

    /// 틱 결과 반영
    pub fn record_tick(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        self.list_requests += outcome.list_requests as u64;
        self.read_retransmissions += outcome.read_requests as u64;
        self.rewrites += outcome.rewrites as u64;
        self.sessions_abandoned += outcome.abandoned_sessions as u64;
        self.writes_abandoned += outcome.abandoned_writes as u64;
        if outcome.global_abandoned {
            self.list_requests_abandoned += 1;
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 송신 요청 수
    pub fn total_requests(&self) -> u64 {
        self.list_requests
            + self.read_retransmissions
            + self.single_requests
            + self.write_requests
            + self.rewrites
    }

    /// 중복 수신 비율
    pub fn duplicate_ratio(&self) -> f64 {
        if self.params_received == 0 {
            return 0.0;
        }
        self.duplicates as f64 / self.params_received as f64
    }

    /// 재전송 비율 (전체 요청 대비)
    pub fn retransmission_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        (self.read_retransmissions + self.rewrites) as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Received: {} (dup {:.1}%) | Requests: {} (retx {:.1}%) | Writes: {}/{} confirmed | Sessions: {} complete, {} abandoned | Ticks: {}",
            self.elapsed().as_secs_f64(),
            self.params_received,
            self.duplicate_ratio() * 100.0,
            self.total_requests(),
            self.retransmission_ratio() * 100.0,
            self.writes_confirmed,
            self.write_requests,
            self.sessions_completed,
            self.sessions_abandoned,
            self.ticks,
        )
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_without_traffic() {
        let stats = SyncStats::new();
        assert_eq!(stats.duplicate_ratio(), 0.0);
        assert_eq!(stats.retransmission_ratio(), 0.0);
    }

    #[test]
    fn test_record_tick() {
        let mut stats = SyncStats::new();
        let outcome = TickOutcome {
            read_requests: 3,
            rewrites: 1,
            list_requests: 1,
            ..TickOutcome::default()
        };
        stats.record_tick(&outcome);
        stats.write_requests = 5;

        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.total_requests(), 10);
        assert!((stats.retransmission_ratio() - 0.4).abs() < 1e-9);
        assert!(stats.summary().contains("Ticks: 1"));
    }
}
