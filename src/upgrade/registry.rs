use crate::registry::{EntityKey, EntityRegistry};

use super::Upgrader;

/// Outcome of migrating the entity registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryReport {
    /// Entities replaced by their new-generation counterpart
    pub replaced: usize,
    /// Entities from modules that were not reloaded
    pub untouched: usize,
    /// Entities whose type no longer exists; unregistered
    pub dropped: Vec<EntityKey>,
}

/// Replace every registered entity of the retired generation with its
/// migrated counterpart, under the same key.
///
/// Shares the upgrader's identity map, so entities already reached from
/// the entry point (or from each other) are not migrated twice.
pub fn migrate_registry(upgrader: &mut Upgrader<'_>, registry: &mut EntityRegistry) -> RegistryReport {
    let mut report = RegistryReport::default();

    // The walk rewrites the registry, so iterate a detached copy
    for (key, old) in registry.snapshot() {
        if !upgrader.is_reloaded(&old.type_handle()) {
            report.untouched += 1;
            continue;
        }

        match upgrader.upgrade_object(&old) {
            Ok(new) => {
                registry.register(key, new);
                report.replaced += 1;
            }
            Err(reason) => {
                log::warn!(
                    "Entity {:?} of type '{}' cannot be migrated ({}), unregistering",
                    key,
                    old.type_name(),
                    reason
                );
                registry.unregister(key);
                report.dropped.push(key);
            }
        }
    }

    log::debug!(
        "Registry migration: {} replaced, {} untouched, {} dropped",
        report.replaced,
        report.untouched,
        report.dropped.len()
    );

    report
}
