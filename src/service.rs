//! 비동기 동기화 서비스
//!
//! - 드라이버는 단일 태스크에서만 접근 (모든 변경 직렬화)
//! - 타이머 태스크가 주기적으로 틱 명령 전송
//! - 송신 요청/상태 이벤트는 mpsc 채널로 전달
//! - 명령 루프는 소비자를 기다리지 않음 (전달 태스크가 대신 대기)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::driver::ProtocolDriver;
use crate::message::{ComponentId, Inbound, Outbound, ParamRef, SessionState, StatusEvent};
use crate::stats::SyncStats;
use crate::store::Snapshot;
use crate::{Config, Error, Result};

/// 링크 계층으로 보낼 송신 요청 수신기
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// 상태 이벤트 수신기
pub type StatusReceiver = mpsc::Receiver<StatusEvent>;

/// 내부 명령
enum ServiceCmd {
    Inbound(Inbound),
    RequestList,
    RequestParameter {
        component: ComponentId,
        param: ParamRef,
        reply: oneshot::Sender<Result<()>>,
    },
    SetParameter {
        component: ComponentId,
        name: String,
        value: f32,
        reply: oneshot::Sender<Result<()>>,
    },
    SetParameters(oneshot::Sender<usize>),
    WriteParameters(oneshot::Sender<usize>),
    ReadParameters,
    Export(oneshot::Sender<Snapshot>),
    Import(Snapshot, oneshot::Sender<Result<usize>>),
    Value {
        component: ComponentId,
        name: String,
        reply: oneshot::Sender<Option<f32>>,
    },
    State {
        component: ComponentId,
        reply: oneshot::Sender<SessionState>,
    },
    Clear,
    Tick,
    Stop,
}

/// 내부 큐에서 공개 채널로 순서대로 전달 (소비자가 느리면 여기서만 대기)
async fn forward<T: Send + 'static>(
    mut pending: mpsc::UnboundedReceiver<T>,
    tx: mpsc::Sender<T>,
    label: &'static str,
) {
    while let Some(item) = pending.recv().await {
        if tx.send(item).await.is_err() {
            debug!("{} 채널 닫힘", label);
            break;
        }
    }
}

/// 동기화 서비스 핸들 (외부에서 제어용)
#[derive(Clone)]
pub struct ParamSyncService {
    cmd_tx: mpsc::Sender<ServiceCmd>,
    stats: Arc<RwLock<SyncStats>>,
    running: Arc<AtomicBool>,
}

impl ParamSyncService {
    /// 서비스 시작 (tokio 런타임 안에서 호출)
    pub fn start(config: Config) -> Result<(Self, OutboundReceiver, StatusReceiver)> {
        let mut driver = ProtocolDriver::new(config.clone())?;

        // 채널 생성
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ServiceCmd>(1000);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(config.outbound_channel_capacity);
        let (status_tx, status_rx) = mpsc::channel::<StatusEvent>(config.status_channel_capacity);

        // 명령 루프 → 전달 태스크 (링크 계층이 handle_inbound로 명령 채널을 채워도 순환 대기 없음)
        let (outbound_queue, outbound_pending) = mpsc::unbounded_channel::<Outbound>();
        let (status_queue, status_pending) = mpsc::unbounded_channel::<StatusEvent>();
        tokio::spawn(forward(outbound_pending, outbound_tx, "송신"));
        tokio::spawn(forward(status_pending, status_tx, "상태"));

        // 공유 상태
        let stats = Arc::new(RwLock::new(SyncStats::new()));
        let running = Arc::new(AtomicBool::new(true));

        info!(
            "ParamSync service started: timeout={}ms, rewrite={}ms, burst={}, max_timeouts={}",
            config.retransmission_timeout_ms,
            config.rewrite_timeout_ms,
            config.retransmission_burst_request_size,
            config.max_consecutive_timeouts
        );

        // 틱 타이머 태스크
        let cmd_tx_tick = cmd_tx.clone();
        let running_tick = running.clone();
        let tick_interval = config.tick_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while running_tick.load(Ordering::SeqCst) {
                interval.tick().await;
                if cmd_tx_tick.send(ServiceCmd::Tick).await.is_err() {
                    break;
                }
            }
        });

        // 메인 처리 태스크
        let stats_main = stats.clone();
        let running_main = running.clone();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    ServiceCmd::Inbound(event) => driver.handle_inbound(event),
                    ServiceCmd::RequestList => driver.request_parameter_list(),
                    ServiceCmd::RequestParameter {
                        component,
                        param,
                        reply,
                    } => {
                        let _ = reply.send(driver.request_parameter(component, param));
                    }
                    ServiceCmd::SetParameter {
                        component,
                        name,
                        value,
                        reply,
                    } => {
                        let _ = reply.send(driver.set_parameter(component, &name, value));
                    }
                    ServiceCmd::SetParameters(reply) => {
                        let _ = reply.send(driver.set_parameters());
                    }
                    ServiceCmd::WriteParameters(reply) => {
                        let _ = reply.send(driver.write_parameters());
                    }
                    ServiceCmd::ReadParameters => driver.read_parameters(),
                    ServiceCmd::Export(reply) => {
                        let _ = reply.send(driver.export_snapshot());
                    }
                    ServiceCmd::Import(snapshot, reply) => {
                        let _ = reply.send(driver.import_snapshot(&snapshot));
                    }
                    ServiceCmd::Value {
                        component,
                        name,
                        reply,
                    } => {
                        let _ = reply.send(driver.value(component, &name));
                    }
                    ServiceCmd::State { component, reply } => {
                        let _ = reply.send(driver.session_state(component));
                    }
                    ServiceCmd::Clear => driver.clear(),
                    ServiceCmd::Tick => {
                        // 활성 세션이 없으면 가드 비활성
                        if driver.is_transmission_active() {
                            driver.tick();
                        }
                    }
                    ServiceCmd::Stop => {
                        break;
                    }
                }

                // 송신 요청/상태 이벤트 전달 (버리지 않음)
                for out in driver.drain_outbound() {
                    if outbound_queue.send(out).is_err() {
                        warn!("송신 전달 태스크 종료됨");
                        break;
                    }
                }
                for event in driver.drain_status() {
                    if status_queue.send(event).is_err() {
                        warn!("상태 전달 태스크 종료됨");
                        break;
                    }
                }

                // 통계 업데이트
                *stats_main.write() = driver.stats().clone();
            }

            running_main.store(false, Ordering::SeqCst);
            info!("ParamSync service stopped");
        });

        let service = Self {
            cmd_tx,
            stats,
            running,
        };

        Ok((service, outbound_rx, status_rx))
    }

    async fn send(&self, cmd: ServiceCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ServiceStopped)
    }

    async fn request<T>(&self, cmd: ServiceCmd, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(cmd).await?;
        rx.await.map_err(|_| Error::ChannelError)
    }

    /// 링크 계층 수신 이벤트 전달
    pub async fn handle_inbound(&self, event: Inbound) -> Result<()> {
        self.send(ServiceCmd::Inbound(event)).await
    }

    /// 전체 파라미터 리스트 요청
    pub async fn request_parameter_list(&self) -> Result<()> {
        self.send(ServiceCmd::RequestList).await
    }

    /// 단일 파라미터 요청
    pub async fn request_parameter(&self, component: ComponentId, param: ParamRef) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ServiceCmd::RequestParameter {
                component,
                param,
                reply,
            },
            rx,
        )
        .await?
    }

    /// 파라미터 한 개 설정
    pub async fn set_parameter(&self, component: ComponentId, name: &str, value: f32) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ServiceCmd::SetParameter {
                component,
                name: name.to_string(),
                value,
                reply,
            },
            rx,
        )
        .await?
    }

    /// 스테이징 편집 전송
    pub async fn set_parameters(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(ServiceCmd::SetParameters(reply), rx).await
    }

    /// 스테이징 편집 전송 + 영구 저장소 기록
    pub async fn write_parameters(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(ServiceCmd::WriteParameters(reply), rx).await
    }

    /// 영구 저장소 읽기 + 리스트 재요청
    pub async fn read_parameters(&self) -> Result<()> {
        self.send(ServiceCmd::ReadParameters).await
    }

    pub async fn export_snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.request(ServiceCmd::Export(reply), rx).await
    }

    pub async fn import_snapshot(&self, snapshot: Snapshot) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(ServiceCmd::Import(snapshot, reply), rx).await?
    }

    /// 권한 있는 값 조회
    pub async fn value(&self, component: ComponentId, name: &str) -> Result<Option<f32>> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ServiceCmd::Value {
                component,
                name: name.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// 세션 상태 조회
    pub async fn session_state(&self, component: ComponentId) -> Result<SessionState> {
        let (reply, rx) = oneshot::channel();
        self.request(ServiceCmd::State { component, reply }, rx).await
    }

    /// 전체 리셋
    pub async fn clear(&self) -> Result<()> {
        self.send(ServiceCmd::Clear).await
    }

    /// 정지
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(ServiceCmd::Stop).await;
    }

    /// 통계 반환
    pub fn get_stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sim::SimulatedAgent;

    fn fast_config() -> Config {
        Config {
            retransmission_timeout_ms: 40,
            rewrite_timeout_ms: 60,
            retransmission_burst_request_size: 4,
            max_consecutive_timeouts: 50,
            tick_interval_ms: 10,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_component_surfaced() {
        let (service, _outbound_rx, _status_rx) = ParamSyncService::start(fast_config()).unwrap();

        let result = service.set_parameter(3, "RTL_ALT", 50.0).await;
        assert_eq!(result, Err(Error::UnknownComponent { component: 3 }));

        service.stop().await;
    }

    #[tokio::test]
    async fn test_lossy_sync_completes() {
        let (service, outbound_rx, mut status_rx) = ParamSyncService::start(fast_config()).unwrap();

        let agent = SimulatedAgent::new(1, 42)
            .with_component(1, "autopilot", SimulatedAgent::generate_params("AP", 30))
            .with_loss(0.2);

        for event in agent.announce() {
            service.handle_inbound(event).await.unwrap();
        }
        spawn_link(&service, outbound_rx, agent);

        service.request_parameter_list().await.unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = status_rx.recv().await {
                if let StatusEvent::SessionStateChanged { state, .. } = event {
                    if state == SessionState::Complete || state == SessionState::Abandoned {
                        return state;
                    }
                }
            }
            SessionState::Idle
        })
        .await
        .unwrap();

        assert_eq!(completed, SessionState::Complete);
        assert_eq!(service.value(1, "AP_29").await.unwrap(), Some(14.5));
        assert_eq!(service.export_snapshot().await.unwrap().len(), 30);

        service.stop().await;
    }

    /// 링크 계층 역할 태스크
    fn spawn_link(
        service: &ParamSyncService,
        mut outbound_rx: OutboundReceiver,
        mut agent: SimulatedAgent,
    ) {
        let link = service.clone();
        tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                for event in agent.respond(&out) {
                    if link.handle_inbound(event).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn test_status_events_survive_slow_consumer() {
        let config = Config {
            status_channel_capacity: 16,
            ..fast_config()
        };
        let (service, outbound_rx, mut status_rx) = ParamSyncService::start(config).unwrap();

        let agent = SimulatedAgent::new(1, 7)
            .with_component(1, "autopilot", SimulatedAgent::generate_params("AP", 200));
        for event in agent.announce() {
            service.handle_inbound(event).await.unwrap();
        }
        spawn_link(&service, outbound_rx, agent);
        service.request_parameter_list().await.unwrap();

        // 상태 채널은 읽지 않은 채로 완료까지 대기
        tokio::time::timeout(Duration::from_secs(10), async {
            while service.session_state(1).await.unwrap() != SessionState::Complete {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (updated, saw_complete) = tokio::time::timeout(Duration::from_secs(10), async {
            let mut updated = 0;
            let mut saw_complete = false;
            while updated < 200 || !saw_complete {
                match status_rx.recv().await {
                    Some(StatusEvent::ParameterUpdated { .. }) => updated += 1,
                    Some(StatusEvent::SessionStateChanged {
                        state: SessionState::Complete,
                        ..
                    }) => saw_complete = true,
                    Some(_) => {}
                    None => break,
                }
            }
            (updated, saw_complete)
        })
        .await
        .unwrap();

        assert!(saw_complete);
        assert_eq!(updated, 200);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_large_write_flush_does_not_stall_commands() {
        let config = Config {
            rewrite_timeout_ms: 1000,
            outbound_channel_capacity: 4,
            status_channel_capacity: 4,
            ..fast_config()
        };
        let (service, outbound_rx, _status_rx) = ParamSyncService::start(config).unwrap();

        let count = 3000;
        let agent = SimulatedAgent::new(1, 8)
            .with_component(1, "autopilot", SimulatedAgent::generate_params("P", count));
        for event in agent.announce() {
            service.handle_inbound(event).await.unwrap();
        }

        let mut snapshot = Snapshot::new();
        for i in 0..count {
            snapshot.insert(1, &format!("P_{}", i), i as f32 * 0.5 + 1.0);
        }
        assert_eq!(service.import_snapshot(snapshot).await.unwrap(), count);

        spawn_link(&service, outbound_rx, agent);
        assert_eq!(service.write_parameters().await.unwrap(), count);

        let first = tokio::time::timeout(Duration::from_secs(10), service.value(1, "P_0")).await;
        assert!(first.is_ok());

        let last = (count - 1) as f32 * 0.5 + 1.0;
        tokio::time::timeout(Duration::from_secs(20), async {
            while service.value(1, "P_2999").await.unwrap() != Some(last) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        service.stop().await;
    }
}
