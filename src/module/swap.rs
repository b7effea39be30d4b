use crate::error::HotloadResult;
use crate::reflect::ObjectRef;
use crate::registry::EntityRegistry;
use crate::upgrade::{migrate_registry, MigrationReport, RegistryReport, Upgrader};

use super::{GameContext, GameHooks, HookFn, Module, ModuleId};

struct Current {
    module: Module,
    entry: ObjectRef,
}

/// Result of one committed swap
#[derive(Debug, Clone)]
pub struct SwapReport {
    pub module: String,
    pub generation: ModuleId,
    pub previous: Option<ModuleId>,
    pub migration: MigrationReport,
    pub registry: RegistryReport,
    /// Retired generations released by this swap
    pub unloaded: usize,
}

/// Owns everything the simulation and the reload pipeline share: the
/// entity registry, the current module with its entry point, and the
/// retired generations waiting to be unloaded.
///
/// All mutation happens on the thread that runs the simulation; a swap
/// is one uninterrupted call.
#[derive(Default)]
pub struct HotloadContext {
    registry: EntityRegistry,
    current: Option<Current>,
    retired: Vec<Module>,
}

impl HotloadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn current_module(&self) -> Option<&Module> {
        self.current.as_ref().map(|c| &c.module)
    }

    pub fn entry_point(&self) -> Option<&ObjectRef> {
        self.current.as_ref().map(|c| &c.entry)
    }

    /// Generations swapped out but still referenced
    pub fn retired(&self) -> &[Module] {
        &self.retired
    }

    /// Make `new` the current module.
    ///
    /// The new entry point is constructed without running module code,
    /// then populated from the old entry point and the registry through
    /// one shared upgrader. Only after the whole pass completes is the
    /// new module committed and the old one retired. The very first
    /// module gets its `startup` hook instead of a migration.
    pub fn swap(&mut self, new: Module) -> HotloadResult<SwapReport> {
        let new_entry = new.construct_entry_point();

        let mut migration = MigrationReport::default();
        let mut registry = RegistryReport::default();

        if let Some(current) = &self.current {
            let mut upgrader = Upgrader::new(current.module.id(), &new);
            upgrader.migrate(Some(&current.entry), Some(&new_entry))?;
            registry = migrate_registry(&mut upgrader, &mut self.registry);
            upgrader.sever_sources();
            migration = upgrader.finish();
        }

        let previous = self.current.replace(Current {
            module: new.clone(),
            entry: new_entry,
        });
        let first_load = previous.is_none();
        let previous = previous.map(|old| {
            let id = old.module.id();
            self.retired.push(old.module);
            id
        });

        log::info!(
            "Swapped in module '{}' {} ({} objects migrated, {} members skipped)",
            new.name(),
            new.id(),
            migration.objects_migrated,
            migration.skips.len()
        );

        if first_load {
            self.startup();
        }

        let unloaded = self.collect_retired();

        Ok(SwapReport {
            module: new.name().to_string(),
            generation: new.id(),
            previous,
            migration,
            registry,
            unloaded,
        })
    }

    /// Release retired generations no live object refers to
    pub fn collect_retired(&mut self) -> usize {
        let before = self.retired.len();
        self.retired.retain(|module| {
            if module.is_unreferenced() {
                log::info!("Unloading retired module '{}' {}", module.name(), module.id());
                false
            } else {
                true
            }
        });
        before - self.retired.len()
    }

    pub fn startup(&mut self) {
        self.dispatch(|hooks| hooks.startup, 0.0);
    }

    pub fn update(&mut self, delta_time: f32) {
        self.dispatch(|hooks| hooks.update, delta_time);
    }

    pub fn frame_update(&mut self, delta_time: f32) {
        self.dispatch(|hooks| hooks.frame_update, delta_time);
    }

    pub fn shutdown(&mut self) {
        self.dispatch(|hooks| hooks.shutdown, 0.0);
    }

    fn dispatch(&mut self, pick: fn(&GameHooks) -> HookFn, delta_time: f32) {
        let Some(current) = &self.current else {
            return;
        };

        let entry = current.entry.clone();
        let Some(hook) = entry.type_handle().hooks().map(pick) else {
            return;
        };

        let mut ctx = GameContext {
            registry: &mut self.registry,
            types: current.module.types(),
            delta_time,
        };
        hook(&entry, &mut ctx);
    }
}
