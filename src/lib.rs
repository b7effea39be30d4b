pub mod build;
pub mod collaborators;
pub mod compiler;
pub mod config;
pub mod error;
pub mod host;
pub mod module;
pub mod reflect;
pub mod registry;
pub mod upgrade;

pub use build::{BuildOrchestrator, BuildOutcome, ChangeKind, ChangeSet, PendingSwap, ProjectLayout};
pub use collaborators::{ConsoleDecl, ConsoleRegistry, LogSink, NotificationSink, NullConsole, Severity};
pub use compiler::{BuildState, CargoCompiler, CompileResult, CompiledModule, Compiler, Diagnostic};
pub use config::{HotloadConfig, RetryPolicy};
pub use error::{HotloadError, HotloadResult};
pub use host::{HotloadHost, ReloadEvent};
pub use module::{
    DylibLoader, GameContext, GameHooks, HotloadContext, Module, ModuleBuilder, ModuleDecl, ModuleId, ModuleLoad,
    SwapReport,
};
pub use reflect::{ObjectRef, StructValue, TypeRef, Value};
pub use registry::{EntityKey, EntityRegistry};
pub use upgrade::{MigrationReport, MigrationSkip, SkipReason, Upgrader};
