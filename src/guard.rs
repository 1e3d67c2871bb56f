//! 재전송 가드
//!
//! 주기적 틱마다 모든 세션을 등록 순서대로 검사:
//! 1. 리스트 수신이 멈춘 세션 → 가장 낮은 누락 인덱스부터 버스트 재요청
//! 2. ACK 없는 쓰기 → 남은 버스트 예산 안에서 재전송
//! 3. 재시도 예산 소진 → Abandoned (받은 데이터는 유지)

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::message::{ComponentId, Outbound, ParamRef, SessionState, StatusEvent};
use crate::session::{TransmissionSession, TransmissionTracker};
use crate::{Config, Error};

/// 한 틱의 결과
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// 링크 계층으로 보낼 요청
    pub outbound: Vec<Outbound>,

    /// 호출자에게 보낼 상태 이벤트
    pub status: Vec<StatusEvent>,

    /// 인덱스 재요청 수
    pub read_requests: usize,

    /// 리스트 재요청 수
    pub list_requests: usize,

    /// 쓰기 재전송 수
    pub rewrites: usize,

    /// 이번 틱에 포기된 세션 수
    pub abandoned_sessions: usize,

    /// 이번 틱에 포기된 쓰기 수
    pub abandoned_writes: usize,

    /// 전체 리스트 요청 포기
    pub global_abandoned: bool,
}

impl TickOutcome {
    /// 보낸 요청도 상태 이벤트도 없음
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.status.is_empty()
    }
}

/// 재전송 가드
#[derive(Debug, Clone)]
pub struct RetransmissionGuard {
    retransmission_timeout: Duration,
    rewrite_timeout: Duration,
    burst_size: usize,
    max_consecutive_timeouts: u32,
}

impl RetransmissionGuard {
    pub fn new(config: &Config) -> Self {
        Self {
            retransmission_timeout: config.retransmission_timeout(),
            rewrite_timeout: config.rewrite_timeout(),
            burst_size: config.retransmission_burst_request_size.max(1),
            max_consecutive_timeouts: config.max_consecutive_timeouts.max(1),
        }
    }

    /// 틱 실행 (`order`는 컴포넌트 등록 순서)
    pub fn tick(
        &self,
        now: Instant,
        order: &[ComponentId],
        tracker: &mut TransmissionTracker,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        self.retransmit_global(now, tracker, &mut outcome);

        for &component in order {
            let Some(session) = tracker.get_mut(component) else {
                continue;
            };

            // 읽기(리스트 완성)가 쓰기 확인보다 우선
            let mut budget = self.burst_size;
            self.retransmit_reads(now, session, &mut budget, &mut outcome);
            self.rewrite_stale(now, session, &mut budget, &mut outcome);
        }

        outcome
    }

    /// 아직 아무 컴포넌트도 응답하지 않은 전체 리스트 요청
    fn retransmit_global(
        &self,
        now: Instant,
        tracker: &mut TransmissionTracker,
        outcome: &mut TickOutcome,
    ) {
        let Some(global) = tracker.global_request_mut() else {
            return;
        };
        if !global.is_timed_out(now, self.retransmission_timeout) {
            return;
        }

        let timeouts = global.mark_timeout(now);
        if timeouts >= self.max_consecutive_timeouts {
            tracker.resolve_global();
            tracker.set_list_mode(false);
            warn!("전체 리스트 요청 포기: 연속 타임아웃 {}회", timeouts);

            outcome.status.push(StatusEvent::ListRequestFailed {
                error: Error::ListRequestUnanswered { attempts: timeouts },
            });
            outcome.global_abandoned = true;
            return;
        }

        debug!("전체 리스트 재요청: 타임아웃 {}회", timeouts);
        outcome.list_requests += 1;
        outcome
            .outbound
            .push(Outbound::RequestParameterList { component: None });
    }

    fn retransmit_reads(
        &self,
        now: Instant,
        session: &mut TransmissionSession,
        budget: &mut usize,
        outcome: &mut TickOutcome,
    ) {
        if !session.state().is_list_mode() || !session.is_timed_out(now, self.retransmission_timeout) {
            return;
        }

        let component = session.component();
        let timeouts = session.mark_timeout(now);

        if timeouts >= self.max_consecutive_timeouts {
            let missing = session.abandon();
            warn!(
                "컴포넌트 {} 전송 포기: 연속 타임아웃 {}회, 누락 {}개 (수신 {}개 유지)",
                component,
                timeouts,
                missing.len(),
                session.received().len()
            );

            outcome.status.push(StatusEvent::SessionStateChanged {
                component,
                state: SessionState::Abandoned,
                missing_count: missing.len(),
            });
            outcome.status.push(StatusEvent::Fault {
                component,
                error: Error::TransmissionAbandoned { component, missing },
            });
            outcome.abandoned_sessions += 1;
            return;
        }

        if session.state() == SessionState::Receiving && session.size_known() {
            let indices = session.lowest_missing(*budget);
            debug!(
                "재요청 버스트: component={}, indices={:?}, 누락 {}개, 타임아웃 {}회",
                component,
                indices,
                session.missing_reads().len(),
                timeouts
            );

            *budget -= indices.len();
            outcome.read_requests += indices.len();
            outcome
                .outbound
                .extend(indices.into_iter().map(|index| Outbound::RequestParameter {
                    component,
                    param: ParamRef::Index(index),
                }));
        } else {
            // 응답이 전혀 없거나 크기를 아직 모름
            debug!("리스트 재요청: component={}, 타임아웃 {}회", component, timeouts);

            *budget = budget.saturating_sub(1);
            outcome.list_requests += 1;
            outcome.outbound.push(Outbound::RequestParameterList {
                component: Some(component),
            });
        }
    }

    fn rewrite_stale(
        &self,
        now: Instant,
        session: &mut TransmissionSession,
        budget: &mut usize,
        outcome: &mut TickOutcome,
    ) {
        let component = session.component();

        for (name, ack) in session.stale_writes(now, self.rewrite_timeout) {
            if ack.attempts >= self.max_consecutive_timeouts {
                session.abandon_write(&name);
                warn!(
                    "쓰기 포기: component={}, name={}, value={}, 재전송 {}회",
                    component, name, ack.value, ack.attempts
                );

                outcome.status.push(StatusEvent::Fault {
                    component,
                    error: Error::StaleWriteAck {
                        component,
                        name,
                        attempts: ack.attempts,
                    },
                });
                outcome.abandoned_writes += 1;
                continue;
            }

            if *budget == 0 {
                continue;
            }

            debug!(
                "쓰기 재전송: component={}, name={}, value={}, 시도 {}",
                component,
                name,
                ack.value,
                ack.attempts + 1
            );

            session.mark_rewritten(&name, now);
            *budget -= 1;
            outcome.rewrites += 1;
            outcome.outbound.push(Outbound::WriteParameter {
                component,
                name,
                value: ack.value,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(burst: usize, max_timeouts: u32) -> Config {
        Config {
            retransmission_timeout_ms: 500,
            rewrite_timeout_ms: 1000,
            retransmission_burst_request_size: burst,
            max_consecutive_timeouts: max_timeouts,
            ..Config::default()
        }
    }

    fn requested_indices(outcome: &TickOutcome, component: ComponentId) -> Vec<u16> {
        outcome
            .outbound
            .iter()
            .filter_map(|out| match out {
                Outbound::RequestParameter {
                    component: c,
                    param: ParamRef::Index(index),
                } if *c == component => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unanswered_global_request_retried_then_abandoned() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(3, 3));
        let mut tracker = TransmissionTracker::new();
        tracker.set_list_mode(true);
        tracker.start_global(start);

        assert!(guard.tick(start + Duration::from_millis(499), &[], &mut tracker).is_empty());

        for step in 1..=2 {
            let outcome = guard.tick(start + Duration::from_millis(500 * step), &[], &mut tracker);
            assert_eq!(
                outcome.outbound,
                vec![Outbound::RequestParameterList { component: None }]
            );
            assert_eq!(outcome.list_requests, 1);
            assert!(tracker.is_active());
        }

        let outcome = guard.tick(start + Duration::from_millis(1500), &[], &mut tracker);
        assert!(outcome.outbound.is_empty());
        assert!(outcome.global_abandoned);
        assert_eq!(
            outcome.status,
            vec![StatusEvent::ListRequestFailed {
                error: Error::ListRequestUnanswered { attempts: 3 },
            }]
        );
        assert!(!tracker.is_active());
        assert!(!tracker.list_mode());
    }

    #[test]
    fn test_no_burst_before_timeout() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(3, 5));
        let mut tracker = TransmissionTracker::new();
        tracker.start_list(1, start).record_indexed(0, 10, start);

        let outcome = guard.tick(start + Duration::from_millis(499), &[1], &mut tracker);
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_burst_lowest_missing_first() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(3, 5));
        let mut tracker = TransmissionTracker::new();
        let session = tracker.start_list(1, start);
        for index in [0, 2, 5] {
            session.record_indexed(index, 10, start);
        }

        let outcome = guard.tick(start + Duration::from_millis(500), &[1], &mut tracker);
        assert_eq!(requested_indices(&outcome, 1), vec![1, 3, 4]);
        assert_eq!(outcome.read_requests, 3);
        assert_eq!(tracker.get(1).unwrap().consecutive_timeouts(), 1);
    }

    #[test]
    fn test_burst_never_requests_received() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(50, 5));
        let mut tracker = TransmissionTracker::new();
        let session = tracker.start_list(7, start);
        for index in (0..40).step_by(3) {
            session.record_indexed(index, 40, start);
        }

        let outcome = guard.tick(start + Duration::from_secs(1), &[7], &mut tracker);
        let requested = requested_indices(&outcome, 7);
        let session = tracker.get(7).unwrap();

        assert!(requested.len() <= 50);
        assert!(requested.iter().all(|index| !session.received().contains(index)));
        assert_eq!(requested.len(), session.missing_reads().len());
    }

    #[test]
    fn test_burst_bounded_per_component() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(2, 5));
        let mut tracker = TransmissionTracker::new();
        tracker.start_list(1, start).record_indexed(0, 20, start);
        tracker.start_list(2, start).record_indexed(0, 20, start);

        let outcome = guard.tick(start + Duration::from_secs(1), &[2, 1], &mut tracker);
        assert_eq!(requested_indices(&outcome, 1), vec![1, 2]);
        assert_eq!(requested_indices(&outcome, 2), vec![1, 2]);

        // 등록 순서대로 방출
        assert_eq!(outcome.outbound[0].component(), Some(2));
        assert_eq!(outcome.outbound[3].component(), Some(1));
    }

    #[test]
    fn test_reads_take_priority_over_writes() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(2, 5));
        let mut tracker = TransmissionTracker::new();
        let session = tracker.start_list(1, start);
        session.record_indexed(0, 10, start);
        session.expect_write_ack("RTL_ALT", 50.0, start);

        let outcome = guard.tick(start + Duration::from_secs(1), &[1], &mut tracker);
        assert_eq!(outcome.read_requests, 2);
        assert_eq!(outcome.rewrites, 0);

        // 리스트 완료 후에는 쓰기 재전송
        let session = tracker.get_mut(1).unwrap();
        for index in 1..10 {
            session.record_indexed(index, 10, start + Duration::from_secs(1));
        }
        let outcome = guard.tick(start + Duration::from_secs(2), &[1], &mut tracker);
        assert_eq!(
            outcome.outbound,
            vec![Outbound::WriteParameter {
                component: 1,
                name: "RTL_ALT".into(),
                value: 50.0
            }]
        );
    }

    #[test]
    fn test_abandon_after_max_timeouts() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(1, 3));
        let mut tracker = TransmissionTracker::new();
        tracker.start_list(4, start).record_indexed(1, 3, start);

        let step = Duration::from_millis(500);
        let first = guard.tick(start + step, &[4], &mut tracker);
        assert_eq!(requested_indices(&first, 4), vec![0]);
        let second = guard.tick(start + step * 2, &[4], &mut tracker);
        assert_eq!(requested_indices(&second, 4), vec![0]);

        let third = guard.tick(start + step * 3, &[4], &mut tracker);
        assert_eq!(third.abandoned_sessions, 1);
        assert!(third.outbound.is_empty());
        assert!(third.status.contains(&StatusEvent::Fault {
            component: 4,
            error: Error::TransmissionAbandoned {
                component: 4,
                missing: vec![0, 2]
            }
        }));

        let session = tracker.get(4).unwrap();
        assert_eq!(session.state(), SessionState::Abandoned);
        assert!(session.received().contains(&1));

        // Abandoned 세션은 더 이상 재요청하지 않음
        assert!(guard.tick(start + step * 10, &[4], &mut tracker).is_empty());
    }

    #[test]
    fn test_silent_list_request_is_repeated() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(3, 5));
        let mut tracker = TransmissionTracker::new();
        tracker.start_list(3, start);

        let outcome = guard.tick(start + Duration::from_millis(600), &[3], &mut tracker);
        assert_eq!(
            outcome.outbound,
            vec![Outbound::RequestParameterList { component: Some(3) }]
        );
        assert_eq!(outcome.list_requests, 1);
    }

    #[test]
    fn test_write_abandoned_after_budget() {
        let start = Instant::now();
        let guard = RetransmissionGuard::new(&config(5, 2));
        let mut tracker = TransmissionTracker::new();
        tracker.session_mut(1, start).expect_write_ack("GAIN", 0.5, start);

        let step = Duration::from_millis(1000);
        assert_eq!(guard.tick(start + step, &[1], &mut tracker).rewrites, 1);
        assert_eq!(guard.tick(start + step * 2, &[1], &mut tracker).rewrites, 1);

        let outcome = guard.tick(start + step * 3, &[1], &mut tracker);
        assert_eq!(outcome.rewrites, 0);
        assert_eq!(outcome.abandoned_writes, 1);
        assert!(matches!(
            &outcome.status[0],
            StatusEvent::Fault {
                error: Error::StaleWriteAck { attempts: 2, .. },
                ..
            }
        ));
        assert!(tracker.get(1).unwrap().missing_write_acks().is_empty());
    }
}
