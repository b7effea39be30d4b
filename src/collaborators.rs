//! Boundaries to subsystems outside the reload core: the user-facing
//! notification surface and the console command/variable registry.

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    /// Build diagnostics
    Error,
    /// Broken module contract, e.g. no entry point
    Critical,
}

/// Receives build and swap notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Sink that forwards notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info => log::info!("{}: {}", title, message),
            Severity::Warning => log::warn!("{}: {}", title, message),
            Severity::Error | Severity::Critical => log::error!("{}: {}", title, message),
        }
    }
}

/// Kind of console declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Command,
    Variable,
}

/// A command or variable a module declares for the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleDecl {
    pub name: String,
    pub help: String,
    pub kind: ConsoleKind,

    /// Owned by reloadable game code; cleared before every re-registration
    pub game_owned: bool,
}

impl ConsoleDecl {
    pub fn command(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: ConsoleKind::Command,
            game_owned: true,
        }
    }

    pub fn variable(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: ConsoleKind::Variable,
            game_owned: true,
        }
    }
}

/// The console subsystem as seen from the reload core
pub trait ConsoleRegistry: Send {
    /// Drop every declaration tagged as owned by game code
    fn clear_game_owned(&mut self);

    fn register(&mut self, decls: &[ConsoleDecl]);
}

/// Console that accepts and forgets everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl ConsoleRegistry for NullConsole {
    fn clear_game_owned(&mut self) {}

    fn register(&mut self, decls: &[ConsoleDecl]) {
        log::trace!("Ignoring {} console declarations", decls.len());
    }
}
