/// Object Graph Upgrade
///
/// Copies state from objects of a retired module generation into fresh
/// instances of the corresponding types in the new generation. Members
/// are matched by name; anything that cannot be carried across is left
/// at its zero value and recorded as a `MigrationSkip`.
///
/// One `Upgrader` spans a whole reload pass. Its identity map ensures
/// every old object is migrated at most once, so aliasing survives and
/// cycles terminate, including across the entry point and the registry.

pub mod copiers;
pub mod registry;

use rustc_hash::FxHashMap;

use crate::error::{HotloadError, HotloadResult};
use crate::module::{Module, ModuleId};
use crate::reflect::{ObjectId, ObjectRef, TypeHandle, TypeKind, TypeRef, TypeTable, Value};

pub use copiers::{default_chain, CopierChain, MemberCopier};
pub use registry::{migrate_registry, RegistryReport};

/// Why a member was left at its default
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The new type has no member of that name
    MemberRemoved,
    /// The new member is synthesized or opted out
    TargetExcluded,
    /// No copier handles the declared type
    Unhandled(TypeRef),
    /// The old value does not fit the new declared type
    Mismatch { expected: String, found: String },
    /// The referenced type no longer exists
    TypeRemoved(String),
    /// The referenced type switched between struct and class
    KindChanged(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MemberRemoved => write!(f, "member removed"),
            SkipReason::TargetExcluded => write!(f, "target member excluded from migration"),
            SkipReason::Unhandled(ty) => write!(f, "no copier for {:?}", ty),
            SkipReason::Mismatch { expected, found } => {
                write!(f, "cannot convert {} to {}", found, expected)
            }
            SkipReason::TypeRemoved(name) => write!(f, "type {} removed", name),
            SkipReason::KindChanged(name) => write!(f, "type {} changed kind", name),
        }
    }
}

/// A member that was not migrated
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSkip {
    /// `Type.member` path, with element suffixes for collections
    pub path: String,
    pub reason: SkipReason,
}

/// Short description of a value, for skip reports
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Primitive(p) => format!("{:?}", p.kind()),
        Value::Text(_) => "text".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::List(_) => "list".to_string(),
        Value::Map(_) => "map".to_string(),
        Value::Struct(s) => format!("struct {}", s.type_handle().name()),
        Value::Object(o) => format!("object {}", o.type_name()),
    }
}

/// Totals of one upgrade pass
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub objects_migrated: usize,
    pub skips: Vec<MigrationSkip>,
}

/// Graph migrator for one reload pass
pub struct Upgrader<'m> {
    old_module: ModuleId,
    new_module: &'m Module,
    chain: CopierChain,

    // old identity -> (old object kept alive for the pass, new object)
    identity: FxHashMap<ObjectId, (ObjectRef, ObjectRef)>,

    context: Vec<String>,
    skips: Vec<MigrationSkip>,
}

impl<'m> Upgrader<'m> {
    pub fn new(old_module: ModuleId, new_module: &'m Module) -> Self {
        Self::with_chain(old_module, new_module, default_chain())
    }

    pub fn with_chain(old_module: ModuleId, new_module: &'m Module, chain: CopierChain) -> Self {
        Self {
            old_module,
            new_module,
            chain,
            identity: FxHashMap::default(),
            context: Vec::new(),
            skips: Vec::new(),
        }
    }

    pub fn new_types(&self) -> &'m TypeTable {
        self.new_module.types()
    }

    /// Whether a type belongs to the generation being replaced
    pub fn is_reloaded(&self, ty: &TypeHandle) -> bool {
        ty.module() == self.old_module
    }

    /// Previously migrated counterpart of an old object
    pub fn migrated(&self, old: &ObjectRef) -> Option<&ObjectRef> {
        self.identity.get(&old.id()).map(|(_, new)| new)
    }

    pub fn objects_migrated(&self) -> usize {
        self.identity.len()
    }

    pub fn skips(&self) -> &[MigrationSkip] {
        &self.skips
    }

    /// Populate `new` from `old`.
    ///
    /// Returns the object that now represents `old`: `new` itself, or the
    /// instance created earlier in this pass if `old` was already seen.
    /// A missing `old` is a no-op; a missing `new` is a caller error.
    pub fn migrate(&mut self, old: Option<&ObjectRef>, new: Option<&ObjectRef>) -> HotloadResult<Option<ObjectRef>> {
        let Some(old) = old else {
            return Ok(None);
        };

        if let Some(existing) = self.migrated(old) {
            return Ok(Some(existing.clone()));
        }

        let new = new.ok_or_else(|| HotloadError::MigrationTargetMissing {
            type_name: old.type_name(),
        })?;

        // Recorded before the members are walked so back-references
        // resolve to the object under construction
        self.identity.insert(old.id(), (old.clone(), new.clone()));

        let (old_ty, old_fields) = {
            let instance = old.read();
            (instance.type_handle().clone(), instance.fields().to_vec())
        };
        let new_ty = new.type_handle();

        self.migrate_members(&old_ty, &old_fields, &new_ty, &mut |index, value| {
            new.write().set_slot(index, value);
        });

        Ok(Some(new.clone()))
    }

    /// Counterpart of an old object, creating and migrating it on first
    /// sight. Objects of modules that were not reloaded are returned
    /// unchanged.
    pub fn upgrade_object(&mut self, old: &ObjectRef) -> Result<ObjectRef, SkipReason> {
        if let Some(existing) = self.migrated(old) {
            return Ok(existing.clone());
        }

        let old_ty = old.type_handle();
        if !self.is_reloaded(&old_ty) {
            return Ok(old.clone());
        }

        let new_ty = match self.new_types().get(old_ty.name()) {
            Some(ty) if ty.kind() == TypeKind::Class => ty.clone(),
            Some(_) => return Err(SkipReason::KindChanged(old_ty.name().to_string())),
            None => return Err(SkipReason::TypeRemoved(old_ty.name().to_string())),
        };

        let new = self.new_types().instantiate(&new_ty);
        match self.migrate(Some(old), Some(&new)) {
            Ok(Some(object)) => Ok(object),
            // Unreachable with both sides supplied
            _ => Ok(new),
        }
    }

    /// Run the copier chain for one value against a declared type
    pub fn copy_value(&mut self, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        let chain = self.chain.clone();
        match chain.iter().find(|copier| copier.can_handle(target)) {
            Some(copier) => copier.copy(self, old, target).map_err(|reason| {
                log::trace!("{} copier rejected {}: {}", copier.name(), describe(old), reason);
                reason
            }),
            None => Err(SkipReason::Unhandled(target.clone())),
        }
    }

    /// Walk the old members, matching new members by name.
    /// `assign` receives the new slot index and its migrated value.
    pub fn migrate_members(
        &mut self,
        old_ty: &TypeHandle,
        old_fields: &[Value],
        new_ty: &TypeHandle,
        assign: &mut dyn FnMut(usize, Value),
    ) {
        for (member, old_value) in old_ty.members().iter().zip(old_fields) {
            if !member.migrates() {
                continue;
            }

            self.context.push(format!("{}.{}", old_ty.name(), member.name));

            match new_ty.member(&member.name) {
                None => self.note_skip(String::new(), SkipReason::MemberRemoved),
                Some((_, target)) if !target.migrates() => {
                    self.note_skip(String::new(), SkipReason::TargetExcluded)
                }
                Some((index, target)) => {
                    let target_ty = target.ty.clone();
                    match self.copy_value(old_value, &target_ty) {
                        Ok(value) => assign(index, value),
                        Err(reason) => self.note_skip(String::new(), reason),
                    }
                }
            }

            self.context.pop();
        }
    }

    /// Record a skip at the current member path plus `suffix`
    pub fn note_skip(&mut self, suffix: String, reason: SkipReason) {
        let mut path = self.context.last().cloned().unwrap_or_default();
        path.push_str(&suffix);

        log::trace!("Migration skipped {}: {}", path, reason);
        self.skips.push(MigrationSkip { path, reason });
    }

    /// Empty every migrated old instance. Reference cycles among retired
    /// objects would otherwise keep their generation loaded forever.
    pub fn sever_sources(&mut self) {
        for (old, _) in self.identity.values() {
            let mut instance = old.write();
            if instance.type_handle().module() == self.old_module {
                instance.sever();
            }
        }
    }

    pub fn finish(self) -> MigrationReport {
        MigrationReport {
            objects_migrated: self.identity.len(),
            skips: self.skips,
        }
    }
}
