//! 컴포넌트 레지스트리
//!
//! 등록 순서를 유지 (재전송 가드가 이 순서로 순회)

use std::collections::HashMap;

use crate::message::{ComponentId, UasId};

/// 원격 컴포넌트 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// 컴포넌트 ID
    pub id: ComponentId,

    /// 표시 이름
    pub name: String,

    /// 발표한 에이전트 (암묵 등록이면 None)
    pub uas_id: Option<UasId>,
}

/// 알려진 컴포넌트 목록
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: HashMap<ComponentId, Component>,
    order: Vec<ComponentId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 컴포넌트 등록 (새로 추가되면 true)
    ///
    /// 암묵 등록된 항목은 발표 정보로 채움, 그 외 기존 항목은 유지
    pub fn add_component(&mut self, uas_id: UasId, id: ComponentId, name: &str) -> bool {
        if let Some(existing) = self.components.get_mut(&id) {
            if existing.uas_id.is_none() {
                existing.name = name.to_string();
                existing.uas_id = Some(uas_id);
            }
            return false;
        }

        self.insert(Component {
            id,
            name: name.to_string(),
            uas_id: Some(uas_id),
        })
    }

    /// 처음 관측된 컴포넌트 암묵 등록
    pub fn ensure(&mut self, id: ComponentId) -> bool {
        self.insert(Component {
            id,
            name: format!("Component #{}", id),
            uas_id: None,
        })
    }

    fn insert(&mut self, component: Component) -> bool {
        if self.components.contains_key(&component.id) {
            return false;
        }
        self.order.push(component.id);
        self.components.insert(component.id, component);
        true
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub fn get(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    /// 등록 순서대로 ID 목록
    pub fn ids(&self) -> &[ComponentId] {
        &self.order
    }

    /// 등록 순서대로 순회
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.order.iter().filter_map(|id| self.components.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.components.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        assert!(registry.add_component(1, 5, "IMU"));
        assert!(!registry.add_component(1, 5, "renamed"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(5).unwrap().name, "IMU");
    }

    #[test]
    fn test_registration_order() {
        let mut registry = ComponentRegistry::new();
        registry.add_component(1, 9, "camera");
        registry.ensure(2);
        registry.add_component(1, 4, "gimbal");

        assert_eq!(registry.ids(), &[9, 2, 4]);
        assert_eq!(registry.get(2).unwrap().name, "Component #2");
        assert_eq!(registry.get(2).unwrap().uas_id, None);
    }

    #[test]
    fn test_announce_fills_implicit_entry() {
        let mut registry = ComponentRegistry::new();
        assert!(registry.ensure(7));
        assert!(!registry.add_component(3, 7, "camera"));

        let component = registry.get(7).unwrap();
        assert_eq!(component.name, "camera");
        assert_eq!(component.uas_id, Some(3));
        assert_eq!(registry.ids(), &[7]);

        // 발표된 항목은 암묵 등록으로 덮어쓰지 않음
        assert!(!registry.ensure(7));
        assert_eq!(registry.get(7).unwrap().name, "camera");
    }
}
