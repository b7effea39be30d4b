use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;

use crate::collaborators::{NotificationSink, Severity};
use crate::compiler::{BuildState, CompileResult, CompiledModule, Compiler, Diagnostic};
use crate::error::{HotloadError, HotloadResult};

use super::queue::{BuildMode, BuildQueue, BuildRequest};
use super::watcher::FileWatcher;
use super::{scan_sources, ChangeKind};

/// Paths the orchestrator builds from
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub source_root: PathBuf,
    pub descriptor: PathBuf,
    pub references: Vec<PathBuf>,
}

impl ProjectLayout {
    pub fn new(source_root: impl Into<PathBuf>, descriptor: impl Into<PathBuf>) -> Self {
        Self {
            source_root: normalize(source_root.into()),
            descriptor: normalize(descriptor.into()),
            references: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: Vec<PathBuf>) -> Self {
        self.references = references;
        self
    }

    pub fn is_descriptor(&self, path: &Path) -> bool {
        path == self.descriptor || normalize(path.to_path_buf()) == self.descriptor
    }
}

// Watch events carry absolute paths
fn normalize(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// A compiled image waiting for the host to swap it in. The build that
/// produced it stays in flight until `acknowledge` is called or the
/// value is dropped.
#[derive(Debug)]
pub struct PendingSwap {
    pub compiled: CompiledModule,
    pub generation: u64,
    ack: oneshot::Sender<bool>,
}

impl PendingSwap {
    /// Pending swap plus the receiving end of its acknowledgement
    pub fn new(compiled: CompiledModule, generation: u64) -> (Self, oneshot::Receiver<bool>) {
        let (ack, acked) = oneshot::channel();
        (
            Self {
                compiled,
                generation,
                ack,
            },
            acked,
        )
    }

    /// Report whether the swap was applied
    pub fn acknowledge(self, applied: bool) {
        // The build task may have been torn down with the runtime
        let _ = self.ack.send(applied);
    }
}

/// What a finished build hands to the host
#[derive(Debug)]
pub enum BuildOutcome {
    Ready(PendingSwap),
    Failed(Vec<Diagnostic>),
}

struct Shared {
    queue: Mutex<BuildQueue>,
    compiler: Arc<dyn Compiler>,
    layout: ProjectLayout,
    outcomes: Sender<BuildOutcome>,
    sink: Arc<dyn NotificationSink>,
    handle: Handle,
}

impl Shared {
    fn on_change(self: &Arc<Self>, path: PathBuf, kind: ChangeKind) {
        let is_descriptor = self.layout.is_descriptor(&path);
        let request = self.queue.lock().record(path, kind, is_descriptor);
        if let Some(request) = request {
            self.spawn(request);
        }
    }

    fn spawn(self: &Arc<Self>, request: BuildRequest) {
        let shared = self.clone();
        self.handle.spawn(async move { shared.run(request).await });
    }

    /// Build task: runs the request, then any follow-up the queue hands
    /// back, until the queue goes idle
    async fn run(self: Arc<Self>, mut request: BuildRequest) {
        loop {
            let state = self.execute(request).await;
            let next = self.queue.lock().finish(state);
            match next {
                Some(follow_up) => request = follow_up,
                None => break,
            }
        }
    }

    async fn execute(&self, request: BuildRequest) -> Option<BuildState> {
        let kind = if request.is_full() { "full" } else { "incremental" };
        log::info!("Build started ({}, {} changes)", kind, request.changes.len());
        self.sink.notify("Build started", kind, Severity::Info);

        let compiler = self.compiler.clone();
        let layout = self.layout.clone();
        let compiled = tokio::task::spawn_blocking(move || match &request.mode {
            BuildMode::Full => compiler.build(&scan_sources(&layout.source_root), &layout.references),
            BuildMode::Incremental(previous) => {
                compiler.incremental_build(previous, &request.changes, &layout.references)
            }
        })
        .await;

        let result = match compiled {
            Ok(result) => result,
            Err(e) => {
                log::error!("Build task failed: {}", e);
                let diagnostic = Diagnostic::new(&self.layout.descriptor, 0, format!("build task failed: {}", e));
                self.report_failure(vec![diagnostic]);
                return None;
            }
        };

        match result {
            CompileResult::Failure(diagnostics) => {
                self.report_failure(diagnostics);
                None
            }
            CompileResult::Success(module, state) => {
                let message = format!("{} generation {}", module.name, state.generation);
                self.sink.notify("Build succeeded", &message, Severity::Info);

                let (pending, acked) = PendingSwap::new(module, state.generation);

                if self.outcomes.send(BuildOutcome::Ready(pending)).is_err() {
                    log::warn!("Host is gone, build generation {} discarded", state.generation);
                    return Some(state);
                }

                match acked.await {
                    Ok(true) => log::info!("Build generation {} swapped in", state.generation),
                    Ok(false) => log::warn!("Build generation {} was rejected by the host", state.generation),
                    Err(_) => log::warn!("Build generation {} dropped without a swap", state.generation),
                }

                // The compiler's state advanced even if the swap failed
                Some(state)
            }
        }
    }

    fn report_failure(&self, diagnostics: Vec<Diagnostic>) {
        log::error!("Build failed with {} errors", diagnostics.len());
        let message = diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        self.sink.notify("Build failed", &message, Severity::Error);

        let _ = self.outcomes.send(BuildOutcome::Failed(diagnostics));
    }
}

/// Watches the project and runs background builds, one at a time.
///
/// Successful builds are delivered to the host as `BuildOutcome::Ready`;
/// the build task waits for the host's acknowledgement before the next
/// build may start.
pub struct BuildOrchestrator {
    shared: Arc<Shared>,
    watchers: Vec<FileWatcher>,
    runtime: Option<Runtime>,
}

impl BuildOrchestrator {
    /// Orchestrator with its own background runtime
    pub fn new(
        compiler: Arc<dyn Compiler>,
        layout: ProjectLayout,
        sink: Arc<dyn NotificationSink>,
    ) -> HotloadResult<(Self, Receiver<BuildOutcome>)> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("hotload-build")
            .enable_time()
            .build()
            .map_err(|e| HotloadError::Runtime(e.to_string()))?;

        let (mut orchestrator, outcomes) = Self::with_handle(runtime.handle().clone(), compiler, layout, sink);
        orchestrator.runtime = Some(runtime);
        Ok((orchestrator, outcomes))
    }

    /// Orchestrator spawning onto an existing runtime
    pub fn with_handle(
        handle: Handle,
        compiler: Arc<dyn Compiler>,
        layout: ProjectLayout,
        sink: Arc<dyn NotificationSink>,
    ) -> (Self, Receiver<BuildOutcome>) {
        let (outcomes_tx, outcomes_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            queue: Mutex::new(BuildQueue::new()),
            compiler,
            layout,
            outcomes: outcomes_tx,
            sink,
            handle,
        });

        (
            Self {
                shared,
                watchers: Vec::new(),
                runtime: None,
            },
            outcomes_rx,
        )
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.shared.layout
    }

    /// Start watching the source tree and the project descriptor, each
    /// with its own debouncer
    pub fn watch(&mut self, debounce: Duration) -> HotloadResult<()> {
        let shared = self.shared.clone();
        let mut sources = FileWatcher::new(debounce, move |event| shared.on_change(event.path, event.kind))?;
        sources.watch_dir(&self.shared.layout.source_root)?;

        let shared = self.shared.clone();
        let mut descriptor = FileWatcher::new(debounce, move |event| shared.on_change(event.path, event.kind))?;
        descriptor.watch_file(&self.shared.layout.descriptor)?;

        log::info!(
            "Watching {} and {}",
            self.shared.layout.source_root.display(),
            self.shared.layout.descriptor.display()
        );

        self.watchers.push(sources);
        self.watchers.push(descriptor);
        Ok(())
    }

    /// Feed a change as if it came from a watcher
    pub fn notify_change(&self, path: impl Into<PathBuf>, kind: ChangeKind) {
        self.shared.on_change(path.into(), kind);
    }

    /// Queue a full build, e.g. for the initial load
    pub fn request_full_build(&self) {
        let request = self.shared.queue.lock().request_full();
        if let Some(request) = request {
            self.shared.spawn(request);
        }
    }

    pub fn is_building(&self) -> bool {
        self.shared.queue.lock().phase() != super::BuildPhase::Idle
    }

    pub fn builds_started(&self) -> u64 {
        self.shared.queue.lock().builds_started()
    }
}

impl Drop for BuildOrchestrator {
    fn drop(&mut self) {
        // Stop feeding events before the runtime goes away
        self.watchers.clear();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
