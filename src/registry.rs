use rustc_hash::FxHashMap;

use crate::reflect::ObjectRef;

/// Unique identifier for a registered entity, stable across reloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(pub u64);

/// Live domain objects independent of the entry point's own graph
#[derive(Debug, Default)]
pub struct EntityRegistry {
    next_key: u64,
    entities: FxHashMap<EntityKey, ObjectRef>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under a fresh key
    pub fn spawn(&mut self, object: ObjectRef) -> EntityKey {
        let mut key = EntityKey(self.next_key);
        while self.entities.contains_key(&key) {
            key = EntityKey(key.0.wrapping_add(1));
        }
        self.next_key = key.0.wrapping_add(1);
        self.entities.insert(key, object);
        key
    }

    /// Register under a caller-chosen key, returning what it replaced
    pub fn register(&mut self, key: EntityKey, object: ObjectRef) -> Option<ObjectRef> {
        self.next_key = self.next_key.max(key.0.saturating_add(1));
        self.entities.insert(key, object)
    }

    pub fn unregister(&mut self, key: EntityKey) -> Option<ObjectRef> {
        self.entities.remove(&key)
    }

    pub fn get(&self, key: EntityKey) -> Option<&ObjectRef> {
        self.entities.get(&key)
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.contains_key(&key)
    }

    /// Current members as an owned list, detached from later mutation
    pub fn snapshot(&self) -> Vec<(EntityKey, ObjectRef)> {
        self.entities
            .iter()
            .map(|(&key, object)| (key, object.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &ObjectRef)> {
        self.entities.iter().map(|(&key, object)| (key, object))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{MemberDesc, TypeDecl, TypeKind, TypeRef, TypeTable};
    use crate::module::ModuleId;

    fn object() -> ObjectRef {
        let table = TypeTable::bind(
            ModuleId(99),
            vec![TypeDecl {
                name: "game::Crate".to_string(),
                kind: TypeKind::Class,
                members: vec![MemberDesc::new("weight", TypeRef::f32())],
                hooks: None,
            }],
        );
        table.instantiate(table.get("game::Crate").unwrap())
    }

    #[test]
    fn test_spawn_assigns_distinct_keys() {
        let mut registry = EntityRegistry::new();
        let a = registry.spawn(object());
        let b = registry.spawn(object());

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_advances_key_counter() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityKey(10), object());

        let next = registry.spawn(object());
        assert_eq!(next, EntityKey(11));
    }

    #[test]
    fn test_register_at_max_key_does_not_overflow() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityKey(u64::MAX), object());

        let next = registry.spawn(object());
        assert_ne!(next, EntityKey(u64::MAX));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = EntityRegistry::new();
        let key = registry.spawn(object());

        let snapshot = registry.snapshot();
        registry.unregister(key);

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }
}
