//! 손실 링크 위의 원격 에이전트 시뮬레이터
//!
//! 송신 요청을 받아 수신 이벤트로 응답. 요청과 응답 모두 손실률 적용
//! 시드 고정 RNG라 재현 가능

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::message::{
    ComponentId, Inbound, Outbound, ParamIndex, ParamRef, ParameterUpdate, StorageAction, UasId,
};

/// 시뮬레이션 컴포넌트
#[derive(Debug, Clone)]
struct SimComponent {
    name: String,

    /// RAM 값 (인덱스 순서)
    params: Vec<(String, f32)>,

    /// 영구 저장소 값
    stored: Vec<(String, f32)>,
}

/// 시뮬레이션 원격 에이전트
#[derive(Debug)]
pub struct SimulatedAgent {
    uas_id: UasId,
    components: BTreeMap<ComponentId, SimComponent>,
    loss_rate: f64,
    rng: StdRng,

    /// 전달된 메시지 수
    pub delivered: u64,

    /// 손실된 메시지 수
    pub dropped: u64,
}

impl SimulatedAgent {
    pub fn new(uas_id: UasId, seed: u64) -> Self {
        Self {
            uas_id,
            components: BTreeMap::new(),
            loss_rate: 0.0,
            rng: StdRng::seed_from_u64(seed),
            delivered: 0,
            dropped: 0,
        }
    }

    /// 손실률 설정 (0.0 ~ 1.0)
    pub fn with_loss(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }

    /// 컴포넌트 추가
    pub fn with_component(mut self, id: ComponentId, name: &str, params: Vec<(String, f32)>) -> Self {
        self.components.insert(
            id,
            SimComponent {
                name: name.to_string(),
                stored: params.clone(),
                params,
            },
        );
        self
    }

    /// `prefix_0..prefix_{count-1}` 이름의 파라미터 생성
    pub fn generate_params(prefix: &str, count: usize) -> Vec<(String, f32)> {
        (0..count)
            .map(|i| (format!("{}_{}", prefix, i), i as f32 * 0.5))
            .collect()
    }

    pub fn set_loss_rate(&mut self, loss_rate: f64) {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
    }

    /// 원격 RAM 값
    pub fn value(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.components
            .get(&component)?
            .params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// 원격 영구 저장소 값
    pub fn stored_value(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.components
            .get(&component)?
            .stored
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn param_count(&self, component: ComponentId) -> usize {
        self.components
            .get(&component)
            .map_or(0, |c| c.params.len())
    }

    /// 컴포넌트 발표 (손실 없음)
    pub fn announce(&self) -> Vec<Inbound> {
        self.components
            .iter()
            .map(|(&component, c)| Inbound::ComponentAnnounced {
                uas_id: self.uas_id,
                component,
                name: c.name.clone(),
            })
            .collect()
    }

    fn lose(&mut self) -> bool {
        let lost = self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate);
        if lost {
            self.dropped += 1;
        } else {
            self.delivered += 1;
        }
        lost
    }

    fn indexed_value(&self, component: ComponentId, index: usize) -> Option<Inbound> {
        let c = self.components.get(&component)?;
        let (name, value) = c.params.get(index)?;
        Some(Inbound::ParameterValue {
            component,
            update: ParameterUpdate::Indexed {
                index: index as ParamIndex,
                count: c.params.len() as u16,
            },
            name: name.clone(),
            value: *value,
        })
    }

    fn position(&self, component: ComponentId, name: &str) -> Option<usize> {
        self.components
            .get(&component)?
            .params
            .iter()
            .position(|(n, _)| n == name)
    }

    /// 송신 요청 처리, 살아남은 응답 반환
    pub fn respond(&mut self, request: &Outbound) -> Vec<Inbound> {
        if self.lose() {
            return Vec::new();
        }

        let replies: Vec<Inbound> = match request {
            Outbound::RequestParameterList { component } => {
                let targets: Vec<ComponentId> = match component {
                    Some(id) => vec![*id],
                    None => self.components.keys().copied().collect(),
                };
                targets
                    .into_iter()
                    .flat_map(|id| {
                        (0..self.param_count(id))
                            .filter_map(|index| self.indexed_value(id, index))
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
            Outbound::RequestParameter { component, param } => {
                let index = match param {
                    ParamRef::Index(index) => Some(*index as usize),
                    ParamRef::Name(name) => self.position(*component, name),
                };
                index
                    .and_then(|index| self.indexed_value(*component, index))
                    .into_iter()
                    .collect()
            }
            Outbound::WriteParameter {
                component,
                name,
                value,
            } => {
                let Some(index) = self.position(*component, name) else {
                    return Vec::new();
                };
                if let Some(c) = self.components.get_mut(component) {
                    c.params[index].1 = *value;
                }
                self.indexed_value(*component, index).into_iter().collect()
            }
            Outbound::StorageAction { component, action } => {
                if let Some(c) = self.components.get_mut(component) {
                    match action {
                        StorageAction::Write => c.stored = c.params.clone(),
                        StorageAction::Read => c.params = c.stored.clone(),
                    }
                }
                Vec::new()
            }
        };

        replies.into_iter().filter(|_| !self.lose()).collect()
    }
}
