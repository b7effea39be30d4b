use std::path::PathBuf;

use crate::compiler::BuildState;

use super::{ChangeKind, ChangeSet};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Idle,
    Building,
    /// Building, with more changes waiting for one follow-up build
    BuildingFollowUp,
}

#[derive(Debug, Clone)]
pub enum BuildMode {
    Full,
    /// Reuse the state of the last successful build
    Incremental(BuildState),
}

/// One build to run, with the changes it consumes
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub mode: BuildMode,
    pub changes: ChangeSet,
}

impl BuildRequest {
    pub fn is_full(&self) -> bool {
        matches!(self.mode, BuildMode::Full)
    }
}

/// Decides when builds start and what they consume.
///
/// Holds the invariant that at most one build is in flight: a change
/// arriving while building only marks a follow-up, and finishing a build
/// starts at most one follow-up with everything accumulated meanwhile.
#[derive(Debug, Default)]
pub struct BuildQueue {
    building: bool,
    follow_up: bool,
    pending: ChangeSet,
    full_requested: bool,
    // What the active build consumed, handed back if it fails
    in_flight: ChangeSet,
    in_flight_full: bool,
    last_success: Option<BuildState>,
    builds_started: u64,
}

impl BuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> BuildPhase {
        match (self.building, self.follow_up) {
            (false, _) => BuildPhase::Idle,
            (true, false) => BuildPhase::Building,
            (true, true) => BuildPhase::BuildingFollowUp,
        }
    }

    pub fn builds_started(&self) -> u64 {
        self.builds_started
    }

    pub fn last_success(&self) -> Option<&BuildState> {
        self.last_success.as_ref()
    }

    /// Changes waiting for the next build
    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    /// Record a change. Returns the build to start, if one can start now.
    ///
    /// Descriptor changes are not part of the change set; they force the
    /// next build to be a full one.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind, is_descriptor: bool) -> Option<BuildRequest> {
        if is_descriptor {
            self.full_requested = true;
        } else {
            self.pending.record(path, kind);
        }
        self.request()
    }

    /// Ask for a full build, e.g. at startup
    pub fn request_full(&mut self) -> Option<BuildRequest> {
        self.full_requested = true;
        self.request()
    }

    fn request(&mut self) -> Option<BuildRequest> {
        if self.building {
            if !self.follow_up {
                log::debug!("Build in flight, follow-up requested");
            }
            self.follow_up = true;
            None
        } else {
            Some(self.start())
        }
    }

    fn start(&mut self) -> BuildRequest {
        self.building = true;
        self.builds_started += 1;

        let changes = std::mem::take(&mut self.pending);
        let full = std::mem::take(&mut self.full_requested);
        self.in_flight = changes.clone();
        self.in_flight_full = full;

        let mode = match &self.last_success {
            Some(state) if !full && !changes.is_empty() => BuildMode::Incremental(state.clone()),
            _ => BuildMode::Full,
        };

        log::debug!(
            "Starting {} build #{} with {} changes",
            if matches!(mode, BuildMode::Full) { "full" } else { "incremental" },
            self.builds_started,
            changes.len()
        );

        BuildRequest { mode, changes }
    }

    /// Mark the active build finished, successful builds passing their
    /// state. Returns the follow-up build, if one was requested.
    ///
    /// A failed build returns its changes to the pending set, ahead of
    /// anything recorded since, so the next build still covers them.
    pub fn finish(&mut self, state: Option<BuildState>) -> Option<BuildRequest> {
        self.building = false;
        let consumed = std::mem::take(&mut self.in_flight);
        let consumed_full = std::mem::take(&mut self.in_flight_full);

        match state {
            Some(state) => self.last_success = Some(state),
            None => {
                let newer = std::mem::replace(&mut self.pending, consumed);
                self.pending.merge(newer);
                self.full_requested |= consumed_full;
            }
        }

        if std::mem::take(&mut self.follow_up) {
            Some(self.start())
        } else {
            None
        }
    }
}
