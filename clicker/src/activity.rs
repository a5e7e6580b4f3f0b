use std::sync::mpsc;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl Severity {
    pub fn prefix(self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
            Severity::Success => "✅",
        }
    }
}

pub trait ActivityLog: Send + Sync {
    fn log(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }

    fn success(&self, message: &str) {
        self.log(Severity::Success, message);
    }
}

pub type SharedLog = Arc<dyn ActivityLog>;

pub fn format_entry(severity: Severity, message: &str) -> String {
    format!(
        "[{}]: {} {}",
        chrono::Local::now().format("%H:%M:%S"),
        severity.prefix(),
        message
    )
}

fn mirror(severity: Severity, message: &str) {
    match severity {
        Severity::Info | Severity::Success => log::info!("{}", message),
        Severity::Warning => log::warn!("{}", message),
        Severity::Error => log::error!("{}", message),
    }
}

/// Prints entries to standard output. Used before any window exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutLog;

impl ActivityLog for StdoutLog {
    fn log(&self, severity: Severity, message: &str) {
        mirror(severity, message);
        println!("{}", format_entry(severity, message));
    }
}

/// Hands formatted lines to whoever owns the receiving end (typically a log
/// view drained on the UI thread).
pub struct ChannelLog {
    tx: mpsc::Sender<String>,
}

impl ChannelLog {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl ActivityLog for ChannelLog {
    fn log(&self, severity: Severity, message: &str) {
        mirror(severity, message);
        // Receiver gone means the view closed; nothing left to show it to.
        let _ = self.tx.send(format_entry(severity, message));
    }
}
