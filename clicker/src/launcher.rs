// Once the lock is held it is released on the way out, whether the main
// loop returns, fails or panics.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::activity::SharedLog;
use crate::compat::{check_compatibility, SystemProbe};
use crate::config::AppConfig;
use crate::dialogs::{Dialogs, InstanceChoice};
use crate::singleton::{ActivationRequest, SingletonLock};
use crate::store::Store;
use crate::version::panic_message;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Releases the lock when dropped, unwinding included.
struct LockGuard(Arc<SingletonLock>);

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.0.release_lock();
    }
}

pub struct Launcher<'a> {
    cfg: Arc<AppConfig>,
    log: SharedLog,
    dialogs: &'a dyn Dialogs,
    probe: &'a dyn SystemProbe,
}

impl<'a> Launcher<'a> {
    pub fn new(
        cfg: Arc<AppConfig>,
        log: SharedLog,
        dialogs: &'a dyn Dialogs,
        probe: &'a dyn SystemProbe,
    ) -> Self {
        Self {
            cfg,
            log,
            dialogs,
            probe,
        }
    }

    pub fn launch<F>(&self, main_loop: F) -> i32
    where
        F: FnOnce(Arc<SingletonLock>, UnboundedReceiver<ActivationRequest>) -> anyhow::Result<()>,
    {
        let store = Store::new(self.cfg.paths());
        let require_admin = self.cfg.require_admin || store.load_admin_mode();
        let report = check_compatibility(self.probe, require_admin, self.log.as_ref());
        if !report.compatible {
            self.dialogs
                .show_error("Compatibility Error", &report.errors.join("\n"));
            return EXIT_FAILURE;
        }
        if !report.warnings.is_empty() {
            self.dialogs
                .show_warning("Compatibility Warning", &report.warnings.join("\n"));
        }

        store.ensure_directory();

        let (tx, rx) = unbounded_channel();
        let lock = Arc::new(SingletonLock::new(
            &self.cfg,
            store.paths(),
            self.log.clone(),
            tx,
        ));

        if lock.acquire_lock().is_none() {
            match self.dialogs.choose_instance_action(&self.cfg.app_name) {
                InstanceChoice::Exit => {
                    self.log.info("Another instance is already running. Exiting.");
                    return EXIT_OK;
                }
                InstanceChoice::Activate => {
                    if lock.activate_existing() {
                        return EXIT_OK;
                    }
                    self.dialogs.show_error(
                        "Activation Failed",
                        "Could not bring the running instance to the front.",
                    );
                    return EXIT_FAILURE;
                }
                InstanceChoice::ForceNew => {
                    if lock.force_new_instance().is_none() {
                        self.dialogs.show_error(
                            "Lock Error",
                            "Could not acquire the instance lock even after forcing a new instance.",
                        );
                        return EXIT_FAILURE;
                    }
                    self.log.warn("Forced a new instance; the previous lock was discarded");
                }
            }
        }

        let _guard = LockGuard(lock.clone());
        match catch_unwind(AssertUnwindSafe(|| main_loop(lock.clone(), rx))) {
            Ok(Ok(())) => EXIT_OK,
            Ok(Err(e)) => {
                self.log.error(&format!("Application error: {:#}", e));
                self.dialogs.show_error("Application Error", &format!("{:#}", e));
                EXIT_FAILURE
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                self.log.error(&format!("Application crashed: {}", msg));
                self.dialogs.show_error("Application Error", &msg);
                EXIT_FAILURE
            }
        }
    }
}
