// Single-flight update checks on a worker thread. Results come back as
// events over an unbounded channel so the owner applies them on its own
// thread. Per check: VersionFetched, UpdateAvailable if newer, CheckCompleted.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::activity::SharedLog;
use crate::version::{is_newer_version, ReleaseInfo, VersionResolver};

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Whatever version the lookup produced, the default included. A check
    /// stopped before its lookup reports the default.
    VersionFetched(String),
    UpdateAvailable(ReleaseInfo),
    /// `success == false` only for internal failures of the check itself.
    CheckCompleted { success: bool, message: String },
    /// Startup resolution of the running version finished off-thread.
    CurrentVersionResolved(String),
}

pub struct UpdateChecker {
    resolver: VersionResolver,
    current_version: String,
    timeout: Duration,
    include_prerelease: bool,
    log: SharedLog,
    events: UnboundedSender<UpdateEvent>,
    in_flight: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl UpdateChecker {
    pub fn new(
        resolver: VersionResolver,
        current_version: String,
        timeout: Duration,
        include_prerelease: bool,
        log: SharedLog,
        events: UnboundedSender<UpdateEvent>,
    ) -> Self {
        Self {
            resolver,
            current_version,
            timeout,
            include_prerelease,
            log,
            events,
            in_flight: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Applies to checks started afterwards.
    pub fn set_current_version(&mut self, version: String) {
        self.current_version = version;
    }

    pub fn is_checking(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Starts a check unless one is already running. Returns whether it started.
    pub fn check_for_updates(&mut self, silent: bool) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.log.info("Update check already in progress.");
            return false;
        }
        if !silent {
            self.log.info("Checking for updates...");
        }

        // The previous worker has already cleared in_flight, so this join is short.
        if let Some(prev) = self.worker.take() {
            let _ = prev.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let job = CheckJob {
            resolver: self.resolver.clone(),
            current_version: self.current_version.clone(),
            timeout: self.timeout,
            include_prerelease: self.include_prerelease,
            log: self.log.clone(),
            events: self.events.clone(),
            in_flight: self.in_flight.clone(),
            running: self.running.clone(),
            fetched: Cell::new(false),
        };
        self.worker = Some(thread::spawn(move || job.run()));
        true
    }

    /// Blocks until the current check (if any) has delivered all its events.
    pub fn wait(&mut self) {
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }

    /// Asks an in-flight check to skip whatever it has not started yet, then joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wait();
    }
}

impl Drop for UpdateChecker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct CheckJob {
    resolver: VersionResolver,
    current_version: String,
    timeout: Duration,
    include_prerelease: bool,
    log: SharedLog,
    events: UnboundedSender<UpdateEvent>,
    in_flight: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    fetched: Cell<bool>,
}

impl CheckJob {
    fn send_fetched(&self, version: String) {
        self.fetched.set(true);
        let _ = self.events.send(UpdateEvent::VersionFetched(version));
    }

    fn run(self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.check()));
        let (success, message) = match outcome {
            Ok(Some(message)) => (true, message),
            Ok(None) => (true, "Update check cancelled".to_string()),
            Err(_) => (false, "Update check failed unexpectedly".to_string()),
        };
        if !self.fetched.get() {
            self.send_fetched(self.resolver.default_version().to_string());
        }
        self.in_flight.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(UpdateEvent::CheckCompleted { success, message });
    }

    /// Completion message, or `None` if stopped before the lookup began.
    fn check(&self) -> Option<String> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        self.log.info("Starting update check...");

        let info = self
            .resolver
            .fetch_latest_release(self.timeout, self.include_prerelease);
        self.send_fetched(info.version.clone());

        if !info.success {
            let reason = info.error.as_deref().unwrap_or("unknown error");
            log::debug!("update check: fetch failed: {}", reason);
            return Some(format!("Failed to fetch update information: {}", reason));
        }

        // Keep the cache fresh even when nothing new was published.
        self.resolver.cache_latest_version(&info.version);

        if is_newer_version(&info.version, &self.current_version) {
            let version = info.version.clone();
            let _ = self.events.send(UpdateEvent::UpdateAvailable(info));
            Some(format!("Update available: v{}", version))
        } else {
            Some(format!("You're up to date! (v{})", self.current_version))
        }
    }
}
