//! 파라미터 저장소
//!
//! - 권한 있는 값: 원격에서 확인된 값만 기록
//! - 스테이징: 확인 전 로컬 편집 (권한 있는 값은 건드리지 않음)

use std::collections::{BTreeMap, HashMap};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::message::ComponentId;
use crate::{Error, Result};

/// 쓰기 확인용 값 비교 (f32 왕복 오차 허용)
///
/// NaN은 NaN끼리, 무한대는 같은 부호끼리만 일치
pub fn values_match(a: f32, b: f32) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= f32::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// 수신 값 적용 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    /// 권한 있는 값이 새로 생기거나 바뀜
    pub changed: bool,

    /// 대기 중인 편집이 이 값으로 확인됨
    pub confirmed: bool,
}

/// 파라미터 스냅샷 (component → name → value)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub components: BTreeMap<ComponentId, BTreeMap<String, f32>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component: ComponentId, name: &str, value: f32) {
        self.components
            .entry(component)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn get(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.components.get(&component)?.get(name).copied()
    }

    /// 전체 항목 수
    pub fn len(&self) -> usize {
        self.components.values().map(|params| params.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 바이트로 직렬화 (bincode 페이로드 + CRC32 트레일러)
    pub fn to_bytes(&self) -> Result<Bytes> {
        let payload = bincode::serialize(self)?;
        let mut buf = BytesMut::with_capacity(payload.len() + 4);
        buf.put_slice(&payload);
        buf.put_u32_le(crc32fast::hash(&payload));
        Ok(buf.freeze())
    }

    /// 바이트에서 역직렬화 (CRC 검증)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Serialization("snapshot too short".into()));
        }

        let (payload, trailer) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let got = crc32fast::hash(payload);
        if expected != got {
            return Err(Error::ChecksumMismatch { expected, got });
        }

        Ok(bincode::deserialize(payload)?)
    }
}

/// 권한 있는 값 + 스테이징 영역
#[derive(Debug, Default)]
pub struct ParameterStore {
    values: HashMap<ComponentId, BTreeMap<String, f32>>,
    pending: HashMap<ComponentId, BTreeMap<String, f32>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 원격 확인 값 적용
    ///
    /// 스테이징 값과 같으면 편집을 지움 (쓰기 확인)
    pub fn apply(&mut self, component: ComponentId, name: &str, value: f32) -> ApplyOutcome {
        let previous = self
            .values
            .entry(component)
            .or_default()
            .insert(name.to_string(), value);

        let changed = previous.map_or(true, |prev| prev.to_bits() != value.to_bits());

        let mut confirmed = false;
        if let Some(edits) = self.pending.get_mut(&component) {
            if edits.get(name).is_some_and(|staged| values_match(*staged, value)) {
                edits.remove(name);
                confirmed = true;
            }
            if edits.is_empty() {
                self.pending.remove(&component);
            }
        }

        ApplyOutcome { changed, confirmed }
    }

    /// 로컬 편집 스테이징
    pub fn stage(&mut self, component: ComponentId, name: &str, value: f32) {
        self.pending
            .entry(component)
            .or_default()
            .insert(name.to_string(), value);
    }

    /// 권한 있는 값
    pub fn value(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.values.get(&component)?.get(name).copied()
    }

    /// 스테이징된 값
    pub fn pending(&self, component: ComponentId, name: &str) -> Option<f32> {
        self.pending.get(&component)?.get(name).copied()
    }

    /// 컴포넌트의 스테이징 편집 (이름순)
    pub fn pending_for(&self, component: ComponentId) -> Vec<(String, f32)> {
        self.pending
            .get(&component)
            .map(|edits| edits.iter().map(|(n, v)| (n.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// 컴포넌트의 권한 있는 값 (이름순)
    pub fn parameters(&self, component: ComponentId) -> Option<&BTreeMap<String, f32>> {
        self.values.get(&component)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|edits| edits.len()).sum()
    }

    pub fn parameter_count(&self) -> usize {
        self.values.values().map(|params| params.len()).sum()
    }

    /// 권한 있는 값 스냅샷
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            components: self
                .values
                .iter()
                .map(|(component, params)| (*component, params.clone()))
                .collect(),
        }
    }

    /// 스냅샷을 스테이징 영역에 병합 (권한 있는 값은 그대로)
    pub fn stage_snapshot(&mut self, snapshot: &Snapshot) -> usize {
        let mut staged = 0;
        for (component, params) in &snapshot.components {
            for (name, value) in params {
                self.stage(*component, name, *value);
                staged += 1;
            }
        }
        staged
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_does_not_touch_authoritative() {
        let mut store = ParameterStore::new();
        store.apply(1, "RTL_ALT", 30.0);
        store.stage(1, "RTL_ALT", 50.0);

        assert_eq!(store.value(1, "RTL_ALT"), Some(30.0));
        assert_eq!(store.pending(1, "RTL_ALT"), Some(50.0));
    }

    #[test]
    fn test_matching_echo_confirms_edit() {
        let mut store = ParameterStore::new();
        store.stage(1, "RTL_ALT", 50.0);

        let outcome = store.apply(1, "RTL_ALT", 42.0);
        assert!(outcome.changed);
        assert!(!outcome.confirmed);
        assert_eq!(store.pending(1, "RTL_ALT"), Some(50.0));

        let outcome = store.apply(1, "RTL_ALT", 50.0);
        assert!(outcome.confirmed);
        assert_eq!(store.pending(1, "RTL_ALT"), None);
        assert_eq!(store.value(1, "RTL_ALT"), Some(50.0));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_non_finite_values_match() {
        assert!(values_match(f32::NAN, f32::NAN));
        assert!(!values_match(f32::NAN, 1.0));
        assert!(!values_match(0.0, f32::NAN));
        assert!(values_match(f32::INFINITY, f32::INFINITY));
        assert!(!values_match(f32::INFINITY, f32::NEG_INFINITY));
        assert!(!values_match(f32::INFINITY, f32::MAX));
    }

    #[test]
    fn test_nan_echo_confirms_edit() {
        let mut store = ParameterStore::new();
        store.stage(1, "SCALE", f32::NAN);

        let outcome = store.apply(1, "SCALE", f32::NAN);
        assert!(outcome.confirmed);
        assert_eq!(store.pending_count(), 0);
        assert!(store.value(1, "SCALE").unwrap().is_nan());
    }

    #[test]
    fn test_duplicate_apply_unchanged() {
        let mut store = ParameterStore::new();
        assert!(store.apply(2, "GAIN", 1.5).changed);
        assert!(!store.apply(2, "GAIN", 1.5).changed);
    }

    #[test]
    fn test_snapshot_bytes() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(1, "RTL_ALT", 50.0);
        snapshot.insert(5, "IMU_RATE", 200.0);

        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), snapshot);

        let mut corrupted = bytes.to_vec();
        corrupted[0] ^= 0xFF;
        assert!(matches!(
            Snapshot::from_bytes(&corrupted),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_stage_snapshot() {
        let mut store = ParameterStore::new();
        let mut snapshot = Snapshot::new();
        snapshot.insert(1, "A", 1.0);
        snapshot.insert(1, "B", 2.0);

        assert_eq!(store.stage_snapshot(&snapshot), 2);
        assert_eq!(store.parameter_count(), 0);
        assert_eq!(store.pending_for(1), vec![("A".to_string(), 1.0), ("B".to_string(), 2.0)]);
    }
}
