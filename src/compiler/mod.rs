/// Compiler Facade
///
/// Builds the game project into a loadable image. Implementations must
/// be callable from a background thread; the orchestrator never runs two
/// builds at once.

pub mod cargo;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::build::{ChangeKind, ChangeSet};
use crate::config::RetryPolicy;

pub use cargo::CargoCompiler;

/// Loadable image produced by a successful build
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub name: String,
    pub image: Vec<u8>,
    /// Debug symbols stored next to the image, when the toolchain emits them
    pub symbols: Option<Vec<u8>>,
}

/// One compiler error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<PathBuf>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.message)
    }
}

/// What a successful build was made from, reused by the next
/// incremental build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildState {
    pub generation: u64,
    pub sources: BTreeSet<PathBuf>,
    pub references: Vec<PathBuf>,
}

impl BuildState {
    /// Source set after applying `changes`. A changed path that no longer
    /// exists on disk is treated as removed.
    pub fn apply(&self, changes: &ChangeSet) -> BTreeSet<PathBuf> {
        let mut sources = self.sources.clone();
        for (path, kind) in changes.iter() {
            match kind {
                ChangeKind::Created => {
                    sources.insert(path.to_path_buf());
                }
                ChangeKind::Changed if path.exists() => {
                    sources.insert(path.to_path_buf());
                }
                ChangeKind::Changed | ChangeKind::Deleted => {
                    sources.remove(path);
                }
            }
        }
        sources
    }
}

#[derive(Debug, Clone)]
pub enum CompileResult {
    Success(CompiledModule, BuildState),
    Failure(Vec<Diagnostic>),
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Success(..))
    }
}

pub trait Compiler: Send + Sync {
    /// Compile `sources` from scratch against `references`
    fn build(&self, sources: &[PathBuf], references: &[PathBuf]) -> CompileResult;

    /// Compile the state of `previous` with `changes` applied.
    /// A different reference set than `previous` was built with requires
    /// a full build.
    fn incremental_build(&self, previous: &BuildState, changes: &ChangeSet, references: &[PathBuf]) -> CompileResult;
}

/// Read a file, retrying transient failures with exponential backoff.
/// A missing file fails immediately.
pub fn read_with_retry(path: &Path, policy: &RetryPolicy) -> io::Result<Vec<u8>> {
    retry_with_backoff(path, policy, || std::fs::read(path))
}

/// Run `op` until it succeeds, it reports `NotFound`, or the policy's
/// attempts run out. Delays double from the initial backoff up to the cap.
pub fn retry_with_backoff<T>(
    path: &Path,
    policy: &RetryPolicy,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let mut delay = Duration::from_millis(policy.initial_backoff_ms);
    let cap = Duration::from_millis(policy.max_backoff_ms);
    let attempts = policy.attempts.max(1);

    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                log::warn!(
                    "Reading {} failed (attempt {}/{}): {}, retrying in {:?}",
                    path.display(),
                    attempt,
                    attempts,
                    e,
                    delay
                );
                thread::sleep(delay);
                delay = (delay * 2).min(cap);
                attempt += 1;
            }
        }
    }
}
