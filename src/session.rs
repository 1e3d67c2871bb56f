//! 전송 세션 추적
//!
//! 컴포넌트별 리스트 수신 상태 (selective-repeat 방식)
//! - 예상 개수, 수신 인덱스, 누락 인덱스
//! - 쓰기 ACK 대기 목록
//! - 활동 시각, 연속 타임아웃 횟수

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::message::{ComponentId, ParamIndex, SessionState};

/// 쓰기 ACK 대기 항목
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    /// 가장 최근에 쓴 값
    pub value: f32,

    /// 마지막 전송 시각
    pub last_sent: Instant,

    /// 재전송 횟수
    pub attempts: u32,
}

/// 인덱스 수신 기록 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// 리스트 모드에서 추적됨
    pub tracked: bool,

    /// ListRequested → Receiving 전이
    pub entered_receiving: bool,

    /// 이번 수신으로 Complete 전이
    pub completed: bool,

    /// 이미 받은 인덱스
    pub duplicate: bool,

    /// 예상 개수를 벗어난 인덱스
    pub out_of_range: bool,

    /// 총 개수 변경 (이전 예상 개수)
    pub count_mismatch: Option<u16>,
}

/// 컴포넌트별 전송 세션
#[derive(Debug, Clone)]
pub struct TransmissionSession {
    component: ComponentId,
    state: SessionState,
    size_known: bool,
    expected_count: u16,
    received: BTreeSet<ParamIndex>,
    missing_reads: BTreeSet<ParamIndex>,
    missing_write_acks: BTreeMap<String, WriteAck>,
    last_activity: Instant,
    last_burst: Option<Instant>,
    consecutive_timeouts: u32,
    unresolved: Vec<ParamIndex>,
}

impl TransmissionSession {
    pub fn new(component: ComponentId, now: Instant) -> Self {
        Self {
            component,
            state: SessionState::Idle,
            size_known: false,
            expected_count: 0,
            received: BTreeSet::new(),
            missing_reads: BTreeSet::new(),
            missing_write_acks: BTreeMap::new(),
            last_activity: now,
            last_burst: None,
            consecutive_timeouts: 0,
            unresolved: Vec::new(),
        }
    }

    /// 리스트 요청 시작 (이전 리스트 부기 폐기, 쓰기 ACK는 유지)
    pub fn start_list(&mut self, now: Instant) {
        self.state = SessionState::ListRequested;
        self.size_known = false;
        self.expected_count = 0;
        self.received.clear();
        self.missing_reads.clear();
        self.unresolved.clear();
        self.consecutive_timeouts = 0;
        self.last_activity = now;
        self.last_burst = None;
    }

    /// 수신 이벤트 발생 (타임아웃 카운터 리셋)
    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.consecutive_timeouts = 0;
    }

    /// 인덱스 포함 수신 기록
    pub fn record_indexed(&mut self, index: ParamIndex, count: u16, now: Instant) -> RecordOutcome {
        self.touch(now);

        let mut outcome = RecordOutcome::default();
        if !self.state.is_list_mode() {
            outcome.duplicate = self.received.contains(&index);
            return outcome;
        }
        outcome.tracked = true;

        if self.state == SessionState::ListRequested {
            self.state = SessionState::Receiving;
            outcome.entered_receiving = true;
        }

        if !self.size_known {
            self.size_known = true;
            self.expected_count = count;
            self.recompute_missing();
        } else if count != self.expected_count {
            outcome.count_mismatch = Some(self.expected_count);
            self.expected_count = count;
            self.recompute_missing();
        }

        if index >= self.expected_count {
            outcome.out_of_range = true;
        } else if self.received.insert(index) {
            self.missing_reads.remove(&index);
        } else {
            outcome.duplicate = true;
        }

        if self.missing_reads.is_empty() {
            self.state = SessionState::Complete;
            self.consecutive_timeouts = 0;
            outcome.completed = true;
        }

        outcome
    }

    /// 인덱스 없는 수신 기록 (ListRequested면 크기 미확정 Receiving으로)
    pub fn record_bare(&mut self, now: Instant) -> bool {
        self.touch(now);

        if self.state == SessionState::ListRequested {
            self.state = SessionState::Receiving;
            return true;
        }
        false
    }

    fn recompute_missing(&mut self) {
        self.missing_reads = (0..self.expected_count)
            .filter(|index| !self.received.contains(index))
            .collect();
    }

    /// 쓰기 ACK 대기 등록 (같은 이름이면 최신 값으로 교체)
    pub fn expect_write_ack(&mut self, name: &str, value: f32, now: Instant) {
        self.missing_write_acks.insert(
            name.to_string(),
            WriteAck {
                value,
                last_sent: now,
                attempts: 0,
            },
        );
    }

    /// 쓰기 ACK 확인
    pub fn confirm_write(&mut self, name: &str) -> bool {
        self.missing_write_acks.remove(name).is_some()
    }

    /// 재시도 예산을 다 쓴 쓰기 제거 (스테이징 편집은 저장소에 남음)
    pub fn abandon_write(&mut self, name: &str) -> Option<WriteAck> {
        self.missing_write_acks.remove(name)
    }

    /// 타임아웃 기준 시각 (마지막 수신과 마지막 버스트 중 늦은 쪽)
    fn reference_time(&self) -> Instant {
        match self.last_burst {
            Some(burst) if burst > self.last_activity => burst,
            _ => self.last_activity,
        }
    }

    /// 재요청 타임아웃 경과 여부
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.reference_time()) >= timeout
    }

    /// 타임아웃 기록, 증가된 연속 횟수 반환
    pub fn mark_timeout(&mut self, now: Instant) -> u32 {
        self.consecutive_timeouts += 1;
        self.last_burst = Some(now);
        self.consecutive_timeouts
    }

    /// 전송 포기 (누락 목록은 unresolved로 이동)
    pub fn abandon(&mut self) -> Vec<ParamIndex> {
        self.state = SessionState::Abandoned;
        self.unresolved = std::mem::take(&mut self.missing_reads).into_iter().collect();
        self.unresolved.clone()
    }

    /// 가장 낮은 누락 인덱스부터 최대 limit개
    pub fn lowest_missing(&self, limit: usize) -> Vec<ParamIndex> {
        self.missing_reads.iter().take(limit).copied().collect()
    }

    /// rewrite 타임아웃이 지난 쓰기 (이름순)
    pub fn stale_writes(&self, now: Instant, timeout: Duration) -> Vec<(String, WriteAck)> {
        self.missing_write_acks
            .iter()
            .filter(|(_, ack)| now.saturating_duration_since(ack.last_sent) >= timeout)
            .map(|(name, ack)| (name.clone(), ack.clone()))
            .collect()
    }

    /// 쓰기 재전송 기록
    pub fn mark_rewritten(&mut self, name: &str, now: Instant) {
        if let Some(ack) = self.missing_write_acks.get_mut(name) {
            ack.attempts += 1;
            ack.last_sent = now;
        }
    }

    /// 리스트 수신 중이거나 ACK 대기 중인 쓰기가 있음
    pub fn is_active(&self) -> bool {
        self.state.is_list_mode() || !self.missing_write_acks.is_empty()
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn size_known(&self) -> bool {
        self.size_known
    }

    pub fn expected_count(&self) -> u16 {
        self.expected_count
    }

    pub fn received(&self) -> &BTreeSet<ParamIndex> {
        &self.received
    }

    pub fn missing_reads(&self) -> &BTreeSet<ParamIndex> {
        &self.missing_reads
    }

    pub fn missing_write_acks(&self) -> &BTreeMap<String, WriteAck> {
        &self.missing_write_acks
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Abandoned 시점의 누락 인덱스
    pub fn unresolved(&self) -> &[ParamIndex] {
        &self.unresolved
    }
}

/// 컴포넌트가 하나도 알려지지 않은 상태의 전체 리스트 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalListRequest {
    last_sent: Instant,
    consecutive_timeouts: u32,
}

impl GlobalListRequest {
    pub fn new(now: Instant) -> Self {
        Self {
            last_sent: now,
            consecutive_timeouts: 0,
        }
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_sent) >= timeout
    }

    /// 타임아웃 기록 후 연속 횟수 반환
    pub fn mark_timeout(&mut self, now: Instant) -> u32 {
        self.last_sent = now;
        self.consecutive_timeouts += 1;
        self.consecutive_timeouts
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }
}

/// 컴포넌트 ID → 세션 아레나
#[derive(Debug, Default)]
pub struct TransmissionTracker {
    sessions: HashMap<ComponentId, TransmissionSession>,

    /// 전체 리스트 요청 이후 (새로 관측된 컴포넌트도 리스트 모드로 시작)
    list_mode: bool,

    /// 응답 대기 중인 전체 리스트 요청 (컴포넌트 미확인)
    global_request: Option<GlobalListRequest>,
}

impl TransmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, component: ComponentId) -> Option<&TransmissionSession> {
        self.sessions.get(&component)
    }

    pub fn get_mut(&mut self, component: ComponentId) -> Option<&mut TransmissionSession> {
        self.sessions.get_mut(&component)
    }

    /// 세션 가져오기 또는 생성
    ///
    /// 전체 리스트 모드 중 처음 보는 컴포넌트는 ListRequested로 시작
    pub fn session_mut(&mut self, component: ComponentId, now: Instant) -> &mut TransmissionSession {
        let list_mode = self.list_mode;
        self.sessions.entry(component).or_insert_with(|| {
            let mut session = TransmissionSession::new(component, now);
            if list_mode {
                session.start_list(now);
            }
            session
        })
    }

    /// 리스트 요청 시작 (기존 세션 대체)
    pub fn start_list(&mut self, component: ComponentId, now: Instant) -> &mut TransmissionSession {
        let session = self
            .sessions
            .entry(component)
            .or_insert_with(|| TransmissionSession::new(component, now));
        session.start_list(now);
        session
    }

    pub fn set_list_mode(&mut self, active: bool) {
        self.list_mode = active;
    }

    pub fn list_mode(&self) -> bool {
        self.list_mode
    }

    /// 전체 리스트 요청 응답 대기 시작
    pub fn start_global(&mut self, now: Instant) {
        self.global_request = Some(GlobalListRequest::new(now));
    }

    pub fn global_request(&self) -> Option<&GlobalListRequest> {
        self.global_request.as_ref()
    }

    pub fn global_request_mut(&mut self) -> Option<&mut GlobalListRequest> {
        self.global_request.as_mut()
    }

    /// 전체 리스트 요청 종료 (응답 도착 또는 포기), 대기 중이었는지 반환
    pub fn resolve_global(&mut self) -> bool {
        self.global_request.take().is_some()
    }

    /// 활성 세션 또는 응답 대기 중인 전체 요청 존재 여부
    pub fn is_active(&self) -> bool {
        self.global_request.is_some() || self.sessions.values().any(|session| session.is_active())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.list_mode = false;
        self.global_request = None;
    }
}
