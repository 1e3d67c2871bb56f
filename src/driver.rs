//! 프로토콜 드라이버 (공개 파사드)
//!
//! 레지스트리, 저장소, 세션 추적기, 재전송 가드를 소유하고
//! 모든 상태 변경을 직렬화함 (단일 스레드, 재진입 없음)
//!
//! 송신 요청과 상태 이벤트는 내부 큐에 쌓이고 호출자가 `drain_*`으로 가져감

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::component::{Component, ComponentRegistry};
use crate::guard::RetransmissionGuard;
use crate::message::{
    ComponentId, Inbound, Outbound, ParamIndex, ParamRef, ParameterUpdate, SessionState,
    StatusEvent, StorageAction, UasId,
};
use crate::session::{TransmissionSession, TransmissionTracker};
use crate::stats::SyncStats;
use crate::store::{ParameterStore, Snapshot};
use crate::{Config, Error, Result};

/// 파라미터 동기화 드라이버
#[derive(Debug)]
pub struct ProtocolDriver {
    config: Config,
    registry: ComponentRegistry,
    store: ParameterStore,
    tracker: TransmissionTracker,
    guard: RetransmissionGuard,
    outbound: Vec<Outbound>,
    status: Vec<StatusEvent>,
    stats: SyncStats,
}

impl ProtocolDriver {
    /// 새 드라이버 생성 (설정 검증)
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            guard: RetransmissionGuard::new(&config),
            config,
            registry: ComponentRegistry::new(),
            store: ParameterStore::new(),
            tracker: TransmissionTracker::new(),
            outbound: Vec::new(),
            status: Vec::new(),
            stats: SyncStats::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────
    // 수신 이벤트
    // ─────────────────────────────────────────────────────────────────

    /// 링크 계층 수신 이벤트 적용
    pub fn handle_inbound(&mut self, event: Inbound) {
        self.handle_inbound_at(event, Instant::now());
    }

    pub fn handle_inbound_at(&mut self, event: Inbound, now: Instant) {
        match event {
            Inbound::ComponentAnnounced {
                uas_id,
                component,
                name,
            } => {
                self.add_component_at(uas_id, component, &name, now);
            }
            Inbound::ParameterValue {
                component,
                update,
                name,
                value,
            } => {
                self.add_parameter_at(component, update, &name, value, now);
            }
        }
    }

    /// 컴포넌트 등록 (멱등)
    pub fn add_component(&mut self, uas_id: UasId, component: ComponentId, name: &str) -> bool {
        self.add_component_at(uas_id, component, name, Instant::now())
    }

    pub fn add_component_at(
        &mut self,
        uas_id: UasId,
        component: ComponentId,
        name: &str,
        now: Instant,
    ) -> bool {
        if !self.registry.add_component(uas_id, component, name) {
            return false;
        }

        if self.tracker.resolve_global() {
            debug!("전체 리스트 요청 응답: component={} 알림", component);
        }

        info!("컴포넌트 등록: uas={}, component={}, name={}", uas_id, component, name);

        // 전체 리스트 요청 이후 나타난 컴포넌트도 추적
        if self.tracker.list_mode() {
            self.tracker.session_mut(component, now);
        }
        true
    }

    /// 파라미터 수신 적용
    pub fn add_parameter(
        &mut self,
        component: ComponentId,
        update: ParameterUpdate,
        name: &str,
        value: f32,
    ) {
        self.add_parameter_at(component, update, name, value, Instant::now());
    }

    pub fn add_parameter_at(
        &mut self,
        component: ComponentId,
        update: ParameterUpdate,
        name: &str,
        value: f32,
        now: Instant,
    ) {
        if self.registry.ensure(component) {
            info!("새 컴포넌트 관측: component={}", component);
        }

        if self.tracker.resolve_global() {
            debug!("전체 리스트 요청 응답: component={} 파라미터", component);
        }

        self.stats.params_received += 1;
        let session = self.tracker.session_mut(component, now);

        match update {
            ParameterUpdate::Indexed { index, count } => {
                let outcome = session.record_indexed(index, count, now);

                if outcome.entered_receiving {
                    self.status.push(StatusEvent::SessionStateChanged {
                        component,
                        state: SessionState::Receiving,
                        missing_count: session.missing_reads().len(),
                    });
                }

                if let Some(expected) = outcome.count_mismatch {
                    warn!(
                        "파라미터 개수 변경: component={}, {} → {}, 누락 재계산 {}개",
                        component,
                        expected,
                        count,
                        session.missing_reads().len()
                    );
                    self.stats.count_mismatches += 1;
                    self.status.push(StatusEvent::Fault {
                        component,
                        error: Error::CountMismatch {
                            component,
                            expected,
                            reported: count,
                        },
                    });
                }

                if outcome.out_of_range {
                    warn!(
                        "범위 밖 인덱스: component={}, index={}, count={}",
                        component,
                        index,
                        session.expected_count()
                    );
                }

                if outcome.duplicate {
                    self.stats.duplicates += 1;
                }

                if outcome.completed {
                    info!(
                        "컴포넌트 {} 파라미터 수신 완료: {}개",
                        component,
                        session.received().len()
                    );
                    self.stats.sessions_completed += 1;
                    self.status.push(StatusEvent::SessionStateChanged {
                        component,
                        state: SessionState::Complete,
                        missing_count: 0,
                    });
                }
            }
            ParameterUpdate::Bare => {
                if session.record_bare(now) {
                    self.status.push(StatusEvent::SessionStateChanged {
                        component,
                        state: SessionState::Receiving,
                        missing_count: 0,
                    });
                }
            }
        }

        let applied = self.store.apply(component, name, value);

        if applied.changed {
            self.status.push(StatusEvent::ParameterUpdated {
                component,
                name: name.to_string(),
                value,
            });
        }

        if applied.confirmed {
            session.confirm_write(name);
            debug!("쓰기 확인: component={}, name={}, value={}", component, name, value);
            self.stats.writes_confirmed += 1;
            self.status.push(StatusEvent::WriteConfirmed {
                component,
                name: name.to_string(),
                value,
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // 호출자 요청
    // ─────────────────────────────────────────────────────────────────

    /// 전체 파라미터 리스트 요청 (진행 중 세션은 대체)
    pub fn request_parameter_list(&mut self) {
        self.request_parameter_list_at(Instant::now());
    }

    pub fn request_parameter_list_at(&mut self, now: Instant) {
        self.tracker.set_list_mode(true);

        if self.registry.is_empty() {
            info!("전체 파라미터 리스트 요청 (컴포넌트 미확인)");
            self.stats.list_requests += 1;
            self.tracker.start_global(now);
            self.outbound
                .push(Outbound::RequestParameterList { component: None });
            return;
        }

        self.tracker.resolve_global();

        for &component in self.registry.ids() {
            self.tracker.start_list(component, now);
            self.stats.list_requests += 1;
            self.outbound.push(Outbound::RequestParameterList {
                component: Some(component),
            });
            self.status.push(StatusEvent::SessionStateChanged {
                component,
                state: SessionState::ListRequested,
                missing_count: 0,
            });
        }

        info!("파라미터 리스트 요청: 컴포넌트 {}개", self.registry.len());
    }

    /// 단일 파라미터 요청
    pub fn request_parameter(&mut self, component: ComponentId, param: ParamRef) -> Result<()> {
        self.ensure_known(component)?;

        self.stats.single_requests += 1;
        self.outbound
            .push(Outbound::RequestParameter { component, param });
        Ok(())
    }

    /// 파라미터 한 개 설정 (스테이징 + 쓰기 요청)
    ///
    /// 권한 있는 값은 원격 확인 전까지 바뀌지 않음
    pub fn set_parameter(&mut self, component: ComponentId, name: &str, value: f32) -> Result<()> {
        self.set_parameter_at(component, name, value, Instant::now())
    }

    pub fn set_parameter_at(
        &mut self,
        component: ComponentId,
        name: &str,
        value: f32,
        now: Instant,
    ) -> Result<()> {
        self.ensure_known(component)?;

        self.store.stage(component, name, value);
        self.status.push(StatusEvent::ParameterChangedLocally {
            component,
            name: name.to_string(),
            value,
        });
        self.send_write(component, name, value, now);
        Ok(())
    }

    /// 스테이징된 모든 편집 전송, 전송 수 반환
    pub fn set_parameters(&mut self) -> usize {
        self.set_parameters_at(Instant::now())
    }

    pub fn set_parameters_at(&mut self, now: Instant) -> usize {
        let mut flushed = 0;

        for component in self.registry.ids().to_vec() {
            for (name, value) in self.store.pending_for(component) {
                self.send_write(component, &name, value, now);
                flushed += 1;
            }
        }

        if flushed > 0 {
            info!("스테이징 편집 {}개 전송", flushed);
        }
        flushed
    }

    /// 편집 전송 후 영구 저장소 기록 요청
    pub fn write_parameters(&mut self) -> usize {
        self.write_parameters_at(Instant::now())
    }

    pub fn write_parameters_at(&mut self, now: Instant) -> usize {
        let flushed = self.set_parameters_at(now);
        self.push_storage_action(StorageAction::Write);
        flushed
    }

    /// 영구 저장소에서 다시 읽고 리스트 재요청 (스테이징 편집 유지)
    pub fn read_parameters(&mut self) {
        self.read_parameters_at(Instant::now());
    }

    pub fn read_parameters_at(&mut self, now: Instant) {
        self.push_storage_action(StorageAction::Read);
        self.request_parameter_list_at(now);
    }

    fn push_storage_action(&mut self, action: StorageAction) {
        for &component in self.registry.ids() {
            self.outbound
                .push(Outbound::StorageAction { component, action });
        }
    }

    fn send_write(&mut self, component: ComponentId, name: &str, value: f32, now: Instant) {
        self.tracker
            .session_mut(component, now)
            .expect_write_ack(name, value, now);
        self.stats.write_requests += 1;
        self.outbound.push(Outbound::WriteParameter {
            component,
            name: name.to_string(),
            value,
        });
    }

    fn ensure_known(&self, component: ComponentId) -> Result<()> {
        if self.registry.contains(component) {
            return Ok(());
        }
        warn!("알 수 없는 컴포넌트 요청 무시: component={}", component);
        Err(Error::UnknownComponent { component })
    }

    // ─────────────────────────────────────────────────────────────────
    // 재전송 가드
    // ─────────────────────────────────────────────────────────────────

    /// 재전송 가드 틱, 이번 틱에 큐에 넣은 요청 수 반환
    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> usize {
        let outcome = self.guard.tick(now, self.registry.ids(), &mut self.tracker);
        self.stats.record_tick(&outcome);

        let emitted = outcome.outbound.len();
        self.outbound.extend(outcome.outbound);
        self.status.extend(outcome.status);
        emitted
    }

    /// 리스트 수신 중이거나 ACK 대기 쓰기가 있는지 (가드 활성 조건)
    pub fn is_transmission_active(&self) -> bool {
        self.tracker.is_active()
    }

    // ─────────────────────────────────────────────────────────────────
    // 스냅샷
    // ─────────────────────────────────────────────────────────────────

    /// 권한 있는 값 스냅샷
    pub fn export_snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// 스냅샷을 스테이징 영역에 병합 (쓰기는 `set_parameters`/`write_parameters`로)
    pub fn import_snapshot(&mut self, snapshot: &Snapshot) -> Result<usize> {
        for &component in snapshot.components.keys() {
            self.ensure_known(component)?;
        }

        for (&component, params) in &snapshot.components {
            for (name, &value) in params {
                self.status.push(StatusEvent::ParameterChangedLocally {
                    component,
                    name: name.clone(),
                    value,
                });
            }
        }

        let staged = self.store.stage_snapshot(snapshot);
        info!("스냅샷 스테이징: {}개", staged);
        Ok(staged)
    }

    // ─────────────────────────────────────────────────────────────────
    // 조회
    // ─────────────────────────────────────────────────────────────────

    /// 권한 있는 값
    pub fn value(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.store.value(component, name)
    }

    /// 스테이징된 값
    pub fn pending_value(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.store.pending(component, name)
    }

    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    pub fn session(&self, component: ComponentId) -> Option<&TransmissionSession> {
        self.tracker.get(component)
    }

    /// 세션 상태 (세션이 없으면 Idle)
    pub fn session_state(&self, component: ComponentId) -> SessionState {
        self.tracker
            .get(component)
            .map_or(SessionState::Idle, |session| session.state())
    }

    /// 누락 인덱스 (오름차순)
    pub fn missing_reads(&self, component: ComponentId) -> Vec<ParamIndex> {
        self.tracker
            .get(component)
            .map(|session| session.missing_reads().iter().copied().collect())
            .unwrap_or_default()
    }

    /// ACK 대기 중인 쓰기 이름
    pub fn missing_write_acks(&self, component: ComponentId) -> Vec<String> {
        self.tracker
            .get(component)
            .map(|session| session.missing_write_acks().keys().cloned().collect())
            .unwrap_or_default()
    }

    /// 등록 순서대로 컴포넌트
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.registry.iter()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// 쌓인 송신 요청 가져오기
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// 쌓인 상태 이벤트 가져오기
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.status)
    }

    /// 전체 리셋 (컴포넌트, 세션, 값, 편집, 큐)
    pub fn clear(&mut self) {
        self.registry.clear();
        self.store.clear();
        self.tracker.clear();
        self.outbound.clear();
        self.status.clear();
        self.stats = SyncStats::new();
        info!("파라미터 동기화 상태 초기화");
    }
}
