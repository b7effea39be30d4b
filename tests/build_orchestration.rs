//! Orchestrator behaviour against a scripted compiler: one build at a
//! time, follow-up coalescing, full vs incremental selection and failure
//! reporting. No toolchain is invoked.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use hotload_engine::{
    BuildOrchestrator, BuildState, ChangeKind, ChangeSet, CompileResult, CompiledModule, Compiler, Diagnostic,
    GameHooks, HotloadHost, HotloadResult, Module, ModuleBuilder, ModuleLoad, NotificationSink, NullConsole,
    ProjectLayout, ReloadEvent, Severity, TypeRef,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Full { sources: usize },
    Incremental { changes: usize },
}

/// Compiler that sleeps, records what it was asked and never touches disk
struct ScriptedCompiler {
    delay: Duration,
    fail: AtomicBool,
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    generation: AtomicU64,
}

impl ScriptedCompiler {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            generation: AtomicU64::new(1),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn compile(&self, call: Call, sources: BTreeSet<PathBuf>, references: &[PathBuf]) -> CompileResult {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.calls.lock().push(call);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return CompileResult::Failure(vec![Diagnostic::new("src/lib.rs", 1, "expected item")]);
        }

        let state = BuildState {
            generation: self.generation.fetch_add(1, Ordering::SeqCst),
            sources,
            references: references.to_vec(),
        };
        let module = CompiledModule {
            name: "game".to_string(),
            image: Vec::new(),
            symbols: None,
        };
        CompileResult::Success(module, state)
    }
}

impl Compiler for ScriptedCompiler {
    fn build(&self, sources: &[PathBuf], references: &[PathBuf]) -> CompileResult {
        let call = Call::Full { sources: sources.len() };
        self.compile(call, sources.iter().cloned().collect(), references)
    }

    fn incremental_build(&self, previous: &BuildState, changes: &ChangeSet, references: &[PathBuf]) -> CompileResult {
        let call = Call::Incremental { changes: changes.len() };
        self.compile(call, previous.apply(changes), references)
    }
}

struct GameLoader;

impl ModuleLoad for GameLoader {
    fn load(&mut self, _compiled: &CompiledModule) -> HotloadResult<Module> {
        let decl = ModuleBuilder::new("game")
            .entry_point("game::MyGame", GameHooks::default(), |t| t.field("score", TypeRef::i32()))
            .build();
        Module::from_decl(decl, None)
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    notes: Arc<Mutex<Vec<(String, Severity)>>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, title: &str, _message: &str, severity: Severity) {
        self.notes.lock().push((title.to_string(), severity));
    }
}

fn project() -> (TempDir, ProjectLayout) {
    let temp_dir = TempDir::new().expect("Failed to create temp project");
    let src = temp_dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("lib.rs"), "pub fn tick() {}\n").unwrap();
    fs::write(temp_dir.path().join("Cargo.toml"), "[package]\nname = \"game\"\n").unwrap();

    let layout = ProjectLayout::new(&src, temp_dir.path().join("Cargo.toml"));
    (temp_dir, layout)
}

fn next_event(host: &mut HotloadHost<GameLoader>) -> ReloadEvent {
    host.wait(Duration::from_secs(5)).expect("no build outcome within 5s")
}

fn wait_idle(orchestrator: &BuildOrchestrator) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while orchestrator.is_building() {
        assert!(Instant::now() < deadline, "orchestrator never went idle");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn source(layout: &ProjectLayout, name: &str) -> PathBuf {
    layout.source_root.join(name)
}

#[test]
fn test_burst_during_build_runs_one_follow_up() {
    let (_dir, layout) = project();
    let compiler = ScriptedCompiler::new(Duration::from_millis(150));
    let sink = Arc::new(RecordingSink::default());
    let (orchestrator, outcomes) = BuildOrchestrator::new(compiler.clone(), layout.clone(), sink.clone()).unwrap();
    let mut host = HotloadHost::new(GameLoader, outcomes, sink, Box::new(NullConsole));

    orchestrator.request_full_build();
    assert!(orchestrator.is_building());

    for i in 0..10 {
        orchestrator.notify_change(source(&layout, &format!("burst_{}.rs", i)), ChangeKind::Created);
    }
    // Repeats fold into the same pending entry
    orchestrator.notify_change(source(&layout, "burst_3.rs"), ChangeKind::Changed);

    assert!(matches!(next_event(&mut host), ReloadEvent::Swapped(_)));
    assert!(matches!(next_event(&mut host), ReloadEvent::Swapped(_)));
    wait_idle(&orchestrator);

    assert_eq!(
        compiler.calls(),
        vec![Call::Full { sources: 1 }, Call::Incremental { changes: 10 }]
    );
    assert_eq!(compiler.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.builds_started(), 2);

    // Nothing else was queued
    assert!(host.wait(Duration::from_millis(200)).is_none());
}

#[test]
fn test_failed_build_reports_and_next_change_retries() {
    let (_dir, layout) = project();
    let compiler = ScriptedCompiler::new(Duration::from_millis(10));
    compiler.fail.store(true, Ordering::SeqCst);
    let sink = RecordingSink::default();
    let (orchestrator, outcomes) =
        BuildOrchestrator::new(compiler.clone(), layout.clone(), Arc::new(sink.clone())).unwrap();
    let mut host = HotloadHost::new(GameLoader, outcomes, Arc::new(sink.clone()), Box::new(NullConsole));

    orchestrator.request_full_build();
    let ReloadEvent::BuildFailed(diagnostics) = next_event(&mut host) else {
        panic!("expected a build failure");
    };
    assert_eq!(diagnostics[0].line, 1);
    assert!(host.context().current_module().is_none());
    assert!(sink
        .notes
        .lock()
        .iter()
        .any(|(title, severity)| title == "Build failed" && *severity == Severity::Error));

    wait_idle(&orchestrator);
    compiler.fail.store(false, Ordering::SeqCst);
    orchestrator.notify_change(source(&layout, "lib.rs"), ChangeKind::Changed);

    assert!(matches!(next_event(&mut host), ReloadEvent::Swapped(_)));
    // No successful build to increment from yet
    assert_eq!(compiler.calls().last(), Some(&Call::Full { sources: 1 }));
}

#[test]
fn test_descriptor_change_forces_full_build() {
    let (dir, layout) = project();
    let compiler = ScriptedCompiler::new(Duration::from_millis(10));
    let sink = Arc::new(RecordingSink::default());
    let (orchestrator, outcomes) = BuildOrchestrator::new(compiler.clone(), layout.clone(), sink.clone()).unwrap();
    let mut host = HotloadHost::new(GameLoader, outcomes, sink, Box::new(NullConsole));

    orchestrator.request_full_build();
    assert!(matches!(next_event(&mut host), ReloadEvent::Swapped(_)));
    wait_idle(&orchestrator);

    orchestrator.notify_change(dir.path().join("Cargo.toml"), ChangeKind::Changed);
    assert!(matches!(next_event(&mut host), ReloadEvent::Swapped(_)));

    assert_eq!(
        compiler.calls(),
        vec![Call::Full { sources: 1 }, Call::Full { sources: 1 }]
    );
}

#[test]
fn test_dropped_outcome_does_not_wedge_the_queue() {
    let (_dir, layout) = project();
    let compiler = ScriptedCompiler::new(Duration::from_millis(10));
    let sink = Arc::new(RecordingSink::default());
    let (orchestrator, outcomes) = BuildOrchestrator::new(compiler.clone(), layout.clone(), sink).unwrap();

    orchestrator.request_full_build();
    // Receive the pending swap and discard it without acknowledging
    let outcome = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
    drop(outcome);
    wait_idle(&orchestrator);

    orchestrator.notify_change(source(&layout, "lib.rs"), ChangeKind::Changed);
    let outcome = outcomes.recv_timeout(Duration::from_secs(5)).unwrap();
    drop(outcome);

    assert_eq!(compiler.calls().last(), Some(&Call::Incremental { changes: 1 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orchestrator_on_existing_runtime() {
    let (_dir, layout) = project();
    let compiler = ScriptedCompiler::new(Duration::from_millis(20));
    let sink = Arc::new(RecordingSink::default());
    let (orchestrator, outcomes) = BuildOrchestrator::with_handle(
        tokio::runtime::Handle::current(),
        compiler.clone(),
        layout.clone(),
        sink.clone(),
    );
    let mut host = HotloadHost::new(GameLoader, outcomes, sink, Box::new(NullConsole));

    orchestrator.request_full_build();
    let mut swaps = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while swaps < 1 && Instant::now() < deadline {
        swaps += host
            .poll()
            .iter()
            .filter(|e| matches!(e, ReloadEvent::Swapped(_)))
            .count();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(swaps, 1);

    while orchestrator.is_building() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    orchestrator.notify_change(source(&layout, "extra.rs"), ChangeKind::Created);
    while swaps < 2 && Instant::now() < deadline {
        swaps += host
            .poll()
            .iter()
            .filter(|e| matches!(e, ReloadEvent::Swapped(_)))
            .count();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(swaps, 2);
    assert_eq!(compiler.calls()[1], Call::Incremental { changes: 1 });
}

