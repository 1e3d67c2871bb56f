//! paramsync 시뮬레이터 - 손실 링크 위 파라미터 동기화 데모
//!
//! 시뮬레이션 에이전트와 동기화 서비스를 연결하고
//! 전체 리스트 수신 → 파라미터 쓰기 → 확인까지 실행
//!
//! 사용법:
//!   cargo run --release --bin paramsync-sim -- [OPTIONS]
//!
//! 예시:
//!   # 기본 (컴포넌트 2개, 파라미터 200개씩, 손실 10%)
//!   cargo run --release --bin paramsync-sim
//!
//!   # 손실 40% + 작은 버스트
//!   RUST_LOG=debug cargo run --release --bin paramsync-sim -- --loss 0.4 --burst 2

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use paramsync::{Config, ParamSyncService, SessionState, SimulatedAgent, StatusEvent};

/// 시뮬레이터 설정
struct SimConfig {
    components: u8,
    params: usize,
    loss: f64,
    seed: u64,
    edit_value: f32,
    config: Config,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            components: 2,
            params: 200,
            loss: 0.1,
            seed: 1,
            edit_value: 42.0,
            config: Config {
                retransmission_timeout_ms: 100,
                rewrite_timeout_ms: 200,
                tick_interval_ms: 20,
                ..Config::default()
            },
        }
    }
}

fn parse_args() -> SimConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--components" | "-c" => {
                if i + 1 < args.len() {
                    config.components = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--params" | "-p" => {
                if i + 1 < args.len() {
                    config.params = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--loss" | "-l" => {
                if i + 1 < args.len() {
                    config.loss = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--seed" => {
                if i + 1 < args.len() {
                    config.seed = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--burst" | "-b" => {
                if i + 1 < args.len() {
                    config.config.retransmission_burst_request_size =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout" | "-t" => {
                if i + 1 < args.len() {
                    config.config.retransmission_timeout_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-timeouts" => {
                if i + 1 < args.len() {
                    config.config.max_consecutive_timeouts =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--edit-value" => {
                if i + 1 < args.len() {
                    config.edit_value = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"paramsync-sim - 손실 링크 파라미터 동기화 시뮬레이터

사용법:
  cargo run --release --bin paramsync-sim -- [OPTIONS]

옵션:
  -c, --components <N>    컴포넌트 수 (기본: 2)
  -p, --params <N>        컴포넌트당 파라미터 수 (기본: 200)
  -l, --loss <RATIO>      손실률 0.0~1.0 (기본: 0.1)
  --seed <N>              RNG 시드 (기본: 1)
  -b, --burst <N>         틱당 컴포넌트별 재요청 수 (기본: 5)
  -t, --timeout <MS>      재요청 타임아웃 (기본: 100)
  --max-timeouts <N>      연속 타임아웃 허용 횟수 (기본: 10)
  --edit-value <VALUE>    동기화 후 쓸 값 (기본: 42.0)
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sim = parse_args();

    info!("paramsync simulator starting...");
    info!("Components: {}, params/component: {}", sim.components, sim.params);
    info!("Loss: {:.1}%, seed: {}", sim.loss * 100.0, sim.seed);
    info!(
        "Burst: {}, timeout: {}ms, max timeouts: {}",
        sim.config.retransmission_burst_request_size,
        sim.config.retransmission_timeout_ms,
        sim.config.max_consecutive_timeouts
    );

    // 원격 에이전트 구성
    let mut agent = SimulatedAgent::new(1, sim.seed).with_loss(sim.loss);
    for id in 1..=sim.components {
        let prefix = format!("C{}", id);
        agent = agent.with_component(
            id,
            &format!("component-{}", id),
            SimulatedAgent::generate_params(&prefix, sim.params),
        );
    }

    let (service, mut outbound_rx, mut status_rx) = ParamSyncService::start(sim.config.clone())?;

    for event in agent.announce() {
        service.handle_inbound(event).await?;
    }

    // ─────────────────────────────────────────────────────────────────
    // 링크 계층: 송신 요청 → 에이전트 → 수신 이벤트
    // ─────────────────────────────────────────────────────────────────
    let link = service.clone();
    let link_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            for event in agent.respond(&out) {
                if link.handle_inbound(event).await.is_err() {
                    return agent;
                }
            }
        }
        agent
    });

    // ─────────────────────────────────────────────────────────────────
    // 1단계: 전체 리스트 수신
    // ─────────────────────────────────────────────────────────────────
    let started = Instant::now();
    service.request_parameter_list().await?;

    let mut finished: HashSet<u8> = HashSet::new();
    let mut abandoned = 0;

    while finished.len() < sim.components as usize {
        match tokio::time::timeout(Duration::from_secs(60), status_rx.recv()).await {
            Ok(Some(StatusEvent::SessionStateChanged {
                component,
                state,
                missing_count,
            })) => match state {
                SessionState::Complete => {
                    info!("컴포넌트 {} 완료 ({:.2}s)", component, started.elapsed().as_secs_f64());
                    finished.insert(component);
                }
                SessionState::Abandoned => {
                    warn!("컴포넌트 {} 포기: 누락 {}개", component, missing_count);
                    finished.insert(component);
                    abandoned += 1;
                }
                _ => {}
            },
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                warn!("리스트 수신 대기 타임아웃");
                break;
            }
        }
    }

    let snapshot = service.export_snapshot().await?;
    info!(
        "리스트 수신 종료: {}개 파라미터, 포기 {}개 컴포넌트",
        snapshot.len(),
        abandoned
    );

    // ─────────────────────────────────────────────────────────────────
    // 2단계: 파라미터 쓰기 + 영구 저장
    // ─────────────────────────────────────────────────────────────────
    let edit_name = "C1_0";
    service.set_parameter(1, edit_name, sim.edit_value).await?;
    service.write_parameters().await?;

    let confirmed = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = status_rx.recv().await {
            match event {
                StatusEvent::WriteConfirmed { name, value, .. } if name == edit_name => {
                    return Some(value);
                }
                StatusEvent::Fault { error, .. } => warn!("{}", error),
                _ => {}
            }
        }
        None
    })
    .await;

    match confirmed {
        Ok(Some(value)) => info!("쓰기 확인: {} = {}", edit_name, value),
        _ => warn!("쓰기 확인 실패: {}", edit_name),
    }

    info!("{}", service.get_stats().summary());

    service.stop().await;
    drop(service);

    if let Ok(agent) = link_task.await {
        info!("링크: 전달 {}개, 손실 {}개", agent.delivered, agent.dropped);
    }

    Ok(())
}
