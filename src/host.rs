use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::build::{BuildOutcome, PendingSwap};
use crate::collaborators::{ConsoleRegistry, NotificationSink, Severity};
use crate::compiler::Diagnostic;
use crate::error::HotloadError;
use crate::module::{HotloadContext, ModuleLoad, SwapReport};

/// What one applied build outcome did
#[derive(Debug)]
pub enum ReloadEvent {
    Swapped(SwapReport),
    BuildFailed(Vec<Diagnostic>),
    /// The image compiled but could not be loaded or swapped in
    Rejected(HotloadError),
}

/// Simulation-side end of the reload pipeline.
///
/// Build outcomes queue up on the channel and are only applied from
/// `poll`/`wait`, which the simulation calls between ticks, so a swap
/// never interleaves with game updates.
pub struct HotloadHost<L: ModuleLoad> {
    context: HotloadContext,
    loader: L,
    outcomes: Receiver<BuildOutcome>,
    sink: Arc<dyn NotificationSink>,
    console: Box<dyn ConsoleRegistry>,
}

impl<L: ModuleLoad> HotloadHost<L> {
    pub fn new(
        loader: L,
        outcomes: Receiver<BuildOutcome>,
        sink: Arc<dyn NotificationSink>,
        console: Box<dyn ConsoleRegistry>,
    ) -> Self {
        Self {
            context: HotloadContext::new(),
            loader,
            outcomes,
            sink,
            console,
        }
    }

    pub fn context(&self) -> &HotloadContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HotloadContext {
        &mut self.context
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Apply every outcome that has arrived, without blocking
    pub fn poll(&mut self) -> Vec<ReloadEvent> {
        let mut events = Vec::new();
        while let Ok(outcome) = self.outcomes.try_recv() {
            events.push(self.apply(outcome));
        }
        events
    }

    /// Block until one outcome arrives and apply it
    pub fn wait(&mut self, timeout: Duration) -> Option<ReloadEvent> {
        match self.outcomes.recv_timeout(timeout) {
            Ok(outcome) => Some(self.apply(outcome)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("Build outcome channel closed");
                None
            }
        }
    }

    fn apply(&mut self, outcome: BuildOutcome) -> ReloadEvent {
        match outcome {
            // Already reported by the orchestrator
            BuildOutcome::Failed(diagnostics) => ReloadEvent::BuildFailed(diagnostics),
            BuildOutcome::Ready(pending) => self.swap(pending),
        }
    }

    fn swap(&mut self, pending: PendingSwap) -> ReloadEvent {
        let result = self
            .loader
            .load(&pending.compiled)
            .and_then(|module| self.context.swap(module));

        match result {
            Ok(report) => {
                if let Some(module) = self.context.current_module() {
                    self.console.clear_game_owned();
                    self.console.register(module.console());
                }

                let message = format!(
                    "{} {}: {} objects migrated, {} members reset, {} entities dropped",
                    report.module,
                    report.generation,
                    report.migration.objects_migrated,
                    report.migration.skips.len(),
                    report.registry.dropped.len()
                );
                self.sink.notify("Reloaded", &message, Severity::Info);
                pending.acknowledge(true);
                ReloadEvent::Swapped(report)
            }
            Err(error) => {
                let severity = match error {
                    HotloadError::EntryPointMissing { .. } => Severity::Critical,
                    _ => Severity::Error,
                };
                log::error!("Swap of '{}' failed: {}", pending.compiled.name, error);
                self.sink.notify("Reload failed", &error.to_string(), severity);
                pending.acknowledge(false);
                ReloadEvent::Rejected(error)
            }
        }
    }

    pub fn update(&mut self, delta_time: f32) {
        self.context.update(delta_time);
    }

    pub fn frame_update(&mut self, delta_time: f32) {
        self.context.frame_update(delta_time);
    }

    /// Run the shutdown hook of the current module
    pub fn shutdown(&mut self) {
        self.context.shutdown();
    }
}
