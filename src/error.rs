//! Hotload error handling
//!
//! Error type and result alias shared by the loader, swapper, compiler
//! adapter and orchestrator, plus small constructors for the common cases.

use std::path::PathBuf;

/// Result type for hotload operations
pub type HotloadResult<T> = Result<T, HotloadError>;

/// Errors raised by the reload pipeline.
///
/// Build diagnostics and migration skips are not errors; they travel as
/// data (`CompileResult::Failure`, `MigrationSkip`).
#[derive(Debug, thiserror::Error)]
pub enum HotloadError {
    #[error("IO error on {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to load module image {path}: {error}")]
    LoadFailed { path: PathBuf, error: String },

    #[error("Module symbol {symbol} unavailable: {error}")]
    SymbolMissing { symbol: &'static str, error: String },

    #[error("Module API version mismatch: got {found}, expected {expected}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    #[error("Module declaration was null")]
    NullDeclaration,

    /// The new module exports no type with the Game capability. This is a
    /// contract violation, not a build failure.
    #[error("Module '{module}' exports no entry point type")]
    EntryPointMissing { module: String },

    #[error("Migration of '{type_name}' has no target instance")]
    MigrationTargetMissing { type_name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Build runtime error: {0}")]
    Runtime(String),
}

/// Build an IO error bound to the path that caused it
pub fn io_error(path: impl Into<PathBuf>, error: std::io::Error) -> HotloadError {
    HotloadError::Io {
        path: path.into(),
        error,
    }
}

/// Build a module load error
pub fn load_error(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> HotloadError {
    HotloadError::LoadFailed {
        path: path.into(),
        error: error.to_string(),
    }
}

/// Build a missing-symbol error
pub fn symbol_error(symbol: &'static str, error: impl std::fmt::Display) -> HotloadError {
    HotloadError::SymbolMissing {
        symbol,
        error: error.to_string(),
    }
}
