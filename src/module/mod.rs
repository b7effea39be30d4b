/// Reloadable Modules
///
/// A module is one generation of compiled game logic. It declares its
/// types through `ModuleBuilder`, exports the declaration with
/// `export_module!`, and is turned into a `Module` by a loader. Exactly
/// one exported class carries `GameHooks`; the host dispatches through
/// an instance of it every frame.

pub mod loader;
pub mod swap;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::collaborators::ConsoleDecl;
use crate::error::{HotloadError, HotloadResult};
use crate::reflect::{MemberDesc, ObjectRef, TypeDecl, TypeHandle, TypeKind, TypeRef, TypeTable};
use crate::registry::EntityRegistry;

pub use loader::{DylibLoader, ModuleLoad};
pub use swap::{HotloadContext, SwapReport};

/// Module API version
pub const MODULE_API_VERSION: u32 = 1;

/// Symbol returning the API version a module was built against
pub const API_VERSION_SYMBOL: &[u8] = b"hotload_module_api_version\0";

/// Symbol returning a boxed `ModuleDecl`
pub const DECLARE_SYMBOL: &[u8] = b"hotload_module_declare\0";

/// Function types for module entry points
pub type ModuleApiVersionFn = unsafe extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
pub type ModuleDeclareFn = unsafe extern "C" fn() -> *mut ModuleDecl;

/// Generation identifier, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

fn next_module_id() -> ModuleId {
    ModuleId(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
}

/// State handed to lifecycle hooks
pub struct GameContext<'a> {
    pub registry: &'a mut EntityRegistry,
    /// Types of the module the hook belongs to
    pub types: &'a TypeTable,
    pub delta_time: f32,
}

impl GameContext<'_> {
    /// Zero-valued instance of a class of the running module
    pub fn create(&self, type_name: &str) -> Option<ObjectRef> {
        self.types
            .get(type_name)
            .filter(|ty| ty.kind() == TypeKind::Class)
            .map(|ty| self.types.instantiate(ty))
    }
}

/// Lifecycle hook implemented by module code
pub type HookFn = fn(&ObjectRef, &mut GameContext<'_>);

/// The Game capability: lifecycle callbacks of the entry point
#[derive(Clone, Copy)]
pub struct GameHooks {
    pub startup: HookFn,
    pub update: HookFn,
    pub frame_update: HookFn,
    pub shutdown: HookFn,
}

fn noop_hook(_: &ObjectRef, _: &mut GameContext<'_>) {}

impl Default for GameHooks {
    fn default() -> Self {
        Self {
            startup: noop_hook,
            update: noop_hook,
            frame_update: noop_hook,
            shutdown: noop_hook,
        }
    }
}

/// Everything a module exports, as produced by its declare function
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub name: String,
    pub types: Vec<TypeDecl>,
    pub console: Vec<ConsoleDecl>,
}

/// Declares the members of one type
pub struct TypeBuilder {
    members: Vec<MemberDesc>,
}

impl TypeBuilder {
    fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, ty: TypeRef) -> Self {
        self.members.push(MemberDesc::new(name, ty));
        self
    }

    /// A compiler-generated member, never migrated
    pub fn synthesized(mut self, name: &str, ty: TypeRef) -> Self {
        let mut member = MemberDesc::new(name, ty);
        member.synthesized = true;
        self.members.push(member);
        self
    }

    /// A member explicitly excluded from migration
    pub fn no_migrate(mut self, name: &str, ty: TypeRef) -> Self {
        let mut member = MemberDesc::new(name, ty);
        member.no_migrate = true;
        self.members.push(member);
        self
    }
}

/// Builds a `ModuleDecl`
pub struct ModuleBuilder {
    decl: ModuleDecl,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            decl: ModuleDecl {
                name: name.into(),
                types: Vec::new(),
                console: Vec::new(),
            },
        }
    }

    fn push(mut self, name: &str, kind: TypeKind, hooks: Option<GameHooks>, members: TypeBuilder) -> Self {
        self.decl.types.push(TypeDecl {
            name: name.to_string(),
            kind,
            members: members.members,
            hooks,
        });
        self
    }

    pub fn structure(self, name: &str, members: impl FnOnce(TypeBuilder) -> TypeBuilder) -> Self {
        self.push(name, TypeKind::Struct, None, members(TypeBuilder::new()))
    }

    pub fn class(self, name: &str, members: impl FnOnce(TypeBuilder) -> TypeBuilder) -> Self {
        self.push(name, TypeKind::Class, None, members(TypeBuilder::new()))
    }

    /// The class implementing the Game capability
    pub fn entry_point(
        self,
        name: &str,
        hooks: GameHooks,
        members: impl FnOnce(TypeBuilder) -> TypeBuilder,
    ) -> Self {
        self.push(name, TypeKind::Class, Some(hooks), members(TypeBuilder::new()))
    }

    pub fn console(mut self, decl: ConsoleDecl) -> Self {
        self.decl.console.push(decl);
        self
    }

    pub fn build(self) -> ModuleDecl {
        self.decl
    }
}

/// Export a module declaration from a reloadable cdylib.
///
/// ```ignore
/// fn declare() -> hotload_engine::module::ModuleDecl { ... }
/// hotload_engine::export_module!(declare);
/// ```
#[macro_export]
macro_rules! export_module {
    ($declare:path) => {
        #[no_mangle]
        pub extern "C" fn hotload_module_api_version() -> u32 {
            $crate::module::MODULE_API_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn hotload_module_declare() -> *mut $crate::module::ModuleDecl {
            Box::into_raw(Box::new($declare()))
        }
    };
}

struct ModuleInner {
    id: ModuleId,
    name: String,
    types: TypeTable,
    entry: usize,
    console: Vec<ConsoleDecl>,

    // Dropped last: type descriptors hold hook pointers into this library
    library: Option<libloading::Library>,
}

/// Handle to a loaded module generation
#[derive(Clone)]
pub struct Module(Arc<ModuleInner>);

impl Module {
    /// Bind a declaration to a fresh generation and resolve its entry point.
    ///
    /// `library` is the image the declaration came from, kept open for as
    /// long as the module lives. `None` for modules linked into the host.
    pub fn from_decl(decl: ModuleDecl, library: Option<libloading::Library>) -> HotloadResult<Self> {
        let id = next_module_id();
        let types = TypeTable::bind(id, decl.types);

        let entry = {
            let mut games = types
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_game() && t.kind() == TypeKind::Class);
            let (entry, entry_ty) = games.next().ok_or_else(|| HotloadError::EntryPointMissing {
                module: decl.name.clone(),
            })?;

            if let Some((_, extra)) = games.next() {
                log::warn!(
                    "Module '{}' exports more than one entry point; using '{}', ignoring '{}'",
                    decl.name,
                    entry_ty.name(),
                    extra.name()
                );
            }

            log::debug!(
                "Bound module '{}' {} with {} types, entry point '{}'",
                decl.name,
                id,
                types.len(),
                entry_ty.name()
            );
            entry
        };

        Ok(Self(Arc::new(ModuleInner {
            id,
            name: decl.name,
            types,
            entry,
            console: decl.console,
            library,
        })))
    }

    pub fn id(&self) -> ModuleId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn types(&self) -> &TypeTable {
        &self.0.types
    }

    pub fn entry_type(&self) -> &TypeHandle {
        self.0.types.at(self.0.entry)
    }

    pub fn console(&self) -> &[ConsoleDecl] {
        &self.0.console
    }

    pub fn is_dynamic(&self) -> bool {
        self.0.library.is_some()
    }

    /// Whether a type was exported by this generation
    pub fn owns(&self, ty: &TypeHandle) -> bool {
        ty.module() == self.0.id
    }

    /// Construct the entry point without running any hook
    pub fn construct_entry_point(&self) -> ObjectRef {
        self.0.types.instantiate(self.entry_type())
    }

    /// No live instance references any of this module's types
    pub fn is_unreferenced(&self) -> bool {
        self.0.types.is_unreferenced()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("types", &self.0.types.len())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}
