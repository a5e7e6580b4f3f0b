// Headless main window. All state changes happen on the thread running
// `Shell::run`; workers (update checks, version lookup, the lock listener)
// only post events to it.

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::Instant;

use crate::activity::SharedLog;
use crate::config::AppConfig;
use crate::engine::{ClickEngine, ClickPerformer, ClickSettings};
use crate::hotkey::{HotkeyManager, HotkeyRegistrar};
use crate::singleton::{ActivationRequest, SingletonLock};
use crate::store::Store;
use crate::update::{UpdateChecker, UpdateEvent};
use crate::version::{timeout_from_secs, VersionResolver};

pub const HELP: &str = "commands: start | stop | toggle | check | hotkey <combo> | status | show | hide | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Check,
    Hotkey(String),
    Status,
    Show,
    Hide,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "toggle" => Command::Toggle,
        "check" => Command::Check,
        "hotkey" => Command::Hotkey(rest.to_string()),
        "status" => Command::Status,
        "show" => Command::Show,
        "hide" => Command::Hide,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '{}'. {}", other, HELP)),
    };
    Ok(Some(cmd))
}

fn spawn_version_lookup(
    resolver: VersionResolver,
    events: tokio::sync::mpsc::UnboundedSender<UpdateEvent>,
) {
    let spawned = thread::Builder::new()
        .name("version-lookup".to_string())
        .spawn(move || {
            let v = resolver.fetch_current_version();
            let _ = events.send(UpdateEvent::CurrentVersionResolved(v));
        });
    if let Err(e) = spawned {
        log::warn!("shell: version lookup not started: {}", e);
    }
}

pub struct Shell {
    cfg: Arc<AppConfig>,
    store: Store,
    lock: Arc<SingletonLock>,
    log: SharedLog,
    activations: UnboundedReceiver<ActivationRequest>,
    checker: UpdateChecker,
    updates: UnboundedReceiver<UpdateEvent>,
    engine: ClickEngine,
    hotkeys: HotkeyManager,
    latest: Option<String>,
    visible: bool,
}

impl Shell {
    /// Only local sources are read here. When neither the shipped override
    /// nor the cache has a version, the default is shown until the remote
    /// lookup posts `CurrentVersionResolved`.
    pub fn new(
        cfg: Arc<AppConfig>,
        lock: Arc<SingletonLock>,
        activations: UnboundedReceiver<ActivationRequest>,
        log: SharedLog,
        performer: Arc<dyn ClickPerformer>,
        registrar: Box<dyn HotkeyRegistrar>,
    ) -> Self {
        let paths = cfg.paths();
        let store = Store::new(paths.clone());
        let resolver = VersionResolver::new(cfg.clone(), paths);
        let (tx, updates) = unbounded_channel();

        let current = match resolver.get_offline_version() {
            Some(v) => v,
            None => {
                spawn_version_lookup(resolver.clone(), tx.clone());
                resolver.default_version().to_string()
            }
        };

        let checker = UpdateChecker::new(
            resolver,
            current,
            timeout_from_secs(cfg.update_timeout_secs),
            cfg.include_prerelease,
            log.clone(),
            tx,
        );
        let engine = ClickEngine::new(
            ClickSettings::from_defaults(&cfg.click),
            performer,
            log.clone(),
        );
        let mut hotkeys = HotkeyManager::new(store.clone(), &cfg.hotkey, registrar, log.clone());
        hotkeys.register_current();

        log.info(&format!(
            "{} v{} ready (hotkey {})",
            cfg.app_name,
            checker.current_version(),
            hotkeys.current()
        ));

        Self {
            cfg,
            store,
            lock,
            log,
            activations,
            checker,
            updates,
            engine,
            hotkeys,
            latest: None,
            visible: true,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn latest_version(&self) -> Option<&str> {
        self.latest.as_deref()
    }

    pub fn engine(&self) -> &ClickEngine {
        &self.engine
    }

    pub fn status_line(&self) -> String {
        let clicking = if self.engine.is_running() {
            format!("clicking (cycle {})", self.engine.cycles())
        } else {
            "idle".to_string()
        };
        let port = self
            .lock
            .bound_addr()
            .map(|a| a.port().to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "v{} | latest: {} | {} | hotkey {} | lock port {}",
            self.checker.current_version(),
            self.latest
                .as_deref()
                .map(|v| format!("v{}", v))
                .unwrap_or_else(|| "unknown".to_string()),
            clicking,
            self.hotkeys.current(),
            port
        )
    }

    pub fn handle_activation(&mut self) {
        self.visible = true;
        self.log.info("Brought to front by another launch");
    }

    pub fn handle_update_event(&mut self, ev: UpdateEvent) {
        match ev {
            UpdateEvent::VersionFetched(v) => {
                self.store.record_update_check(chrono::Local::now());
                self.latest = Some(v);
            }
            UpdateEvent::UpdateAvailable(info) => {
                self.log.success(&format!(
                    "New version v{} is available: {}",
                    info.version, info.download_url
                ));
                if let Some(first) = info.release_notes.lines().find(|l| !l.trim().is_empty()) {
                    self.log.info(first.trim());
                }
            }
            UpdateEvent::CheckCompleted { success, message } => {
                if success {
                    self.log.info(&message);
                } else {
                    self.log.error(&message);
                }
            }
            UpdateEvent::CurrentVersionResolved(v) => {
                if v != self.checker.current_version() {
                    self.log.info(&format!("Running version resolved: v{}", v));
                    self.checker.set_current_version(v);
                }
            }
        }
    }

    fn start_clicking(&mut self) {
        if cfg!(windows) && !self.store.load_admin_mode() {
            self.log
                .error("Admin mode required for clicking on this system");
            return;
        }
        self.engine.start();
    }

    /// Returns `false` once the shell should exit.
    pub fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Start => self.start_clicking(),
            Command::Stop => self.engine.stop(),
            Command::Toggle => {
                if self.engine.is_running() {
                    self.engine.stop();
                } else {
                    self.start_clicking();
                }
            }
            Command::Check => {
                self.checker.check_for_updates(false);
            }
            Command::Hotkey(combo) => {
                self.hotkeys.update_hotkey(&combo);
            }
            Command::Status => {
                let line = self.status_line();
                self.log.info(&line);
            }
            Command::Show => self.visible = true,
            Command::Hide => self.visible = false,
            Command::Help => self.log.info(HELP),
            Command::Quit => return false,
        }
        true
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build tokio runtime")?;
        rt.block_on(self.event_loop());
        // A pending stdin read must not hold up exit.
        rt.shutdown_background();
        self.shutdown();
        Ok(())
    }

    async fn event_loop(&mut self) {
        let period = self.cfg.update_check_interval();
        let mut periodic = tokio::time::interval_at(Instant::now() + period, period);
        let initial = tokio::time::sleep(self.cfg.initial_check_delay());
        tokio::pin!(initial);
        let mut initial_pending = true;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                Some(_) = self.activations.recv() => self.handle_activation(),
                Some(ev) = self.updates.recv() => self.handle_update_event(ev),
                _ = &mut initial, if initial_pending => {
                    initial_pending = false;
                    self.checker.check_for_updates(true);
                }
                _ = periodic.tick() => {
                    self.checker.check_for_updates(true);
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => match parse_command(&line) {
                        Ok(Some(cmd)) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => self.log.warn(&e),
                    },
                    Ok(None) => {
                        log::debug!("shell: stdin closed, waiting for Ctrl-C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        log::warn!("shell: stdin read failed: {}", e);
                        stdin_open = false;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    self.log.info("Interrupted");
                    break;
                }
            }
        }
    }

    /// Stops background work and gives up the instance lock.
    pub fn shutdown(&mut self) {
        self.log.info("Shutting down");
        self.checker.stop();
        self.engine.shutdown();
        self.hotkeys.unregister();
        self.lock.release_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ChannelLog;
    use crate::engine::LogClick;
    use crate::hotkey::LoggingRegistrar;
    use crate::singleton::LockState;
    use crate::store::write_file;
    use crate::test_support::{dead_port, test_config, CannedServer};
    use crate::version::ReleaseInfo;
    use std::time::Duration;

    fn shell(dir: &std::path::Path) -> (Shell, std::sync::mpsc::Receiver<String>) {
        let api_base = format!("http://127.0.0.1:{}", dead_port());
        shell_with(dir, &api_base, Some("2.0.0"))
    }

    fn shell_with(
        dir: &std::path::Path,
        api_base: &str,
        local_version: Option<&str>,
    ) -> (Shell, std::sync::mpsc::Receiver<String>) {
        let cfg = test_config(dir, api_base);
        if let Some(v) = local_version {
            assert!(write_file(&cfg.local_version_file, v));
        }
        let (log, rx) = ChannelLog::channel();
        let log: SharedLog = Arc::new(log);
        let (tx, activations) = unbounded_channel();
        let lock = Arc::new(SingletonLock::new(&cfg, &cfg.paths(), log.clone(), tx));
        lock.acquire_lock().unwrap();
        let s = Shell::new(
            cfg,
            lock,
            activations,
            log,
            Arc::new(LogClick),
            Box::new(LoggingRegistrar::default()),
        );
        (s, rx)
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("START"), Ok(Some(Command::Start)));
        assert_eq!(
            parse_command("hotkey  Alt + G "),
            Ok(Some(Command::Hotkey("Alt + G".to_string())))
        );
        assert_eq!(parse_command("hotkey"), Ok(Some(Command::Hotkey(String::new()))));
        assert_eq!(parse_command("exit"), Ok(Some(Command::Quit)));
        assert!(parse_command("jump").unwrap_err().starts_with("Unknown command 'jump'"));
    }

    #[test]
    fn startup_uses_local_version() {
        let dir = tempfile::tempdir().unwrap();
        let (s, rx) = shell(dir.path());
        assert!(s.status_line().starts_with("v2.0.0 | latest: unknown | idle | hotkey Ctrl+F"));
        let lines: Vec<String> = rx.try_iter().collect();
        assert!(lines.iter().any(|l| l.contains("v2.0.0 ready")), "{lines:?}");
    }

    #[test]
    fn slow_release_server_does_not_delay_startup() {
        let server = CannedServer::start_with_delay(
            200,
            r#"[{"tag_name": "v3.1.0", "prerelease": false}]"#,
            Duration::from_millis(1500),
        );
        let dir = tempfile::tempdir().unwrap();

        let started = std::time::Instant::now();
        let (mut s, rx) = shell_with(dir.path(), &server.base, None);
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert!(s.status_line().starts_with("v1.0.0 |"), "{}", s.status_line());

        let deadline = std::time::Instant::now() + Duration::from_secs(8);
        let resolved = loop {
            match s.updates.try_recv() {
                Ok(ev @ UpdateEvent::CurrentVersionResolved(_)) => break ev,
                Ok(_) => {}
                Err(_) => {
                    assert!(std::time::Instant::now() < deadline, "version never resolved");
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        };
        s.handle_update_event(resolved);
        assert!(s.status_line().starts_with("v3.1.0 |"), "{}", s.status_line());
        assert_eq!(server.hits(), 1);
        let lines: Vec<String> = rx.try_iter().collect();
        assert!(lines.iter().any(|l| l.ends_with("Running version resolved: v3.1.0")), "{lines:?}");
        s.shutdown();
    }

    #[test]
    fn update_events_refresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, rx) = shell(dir.path());
        let store = Store::new(test_config(dir.path(), "").paths());
        assert!(store.last_update_check().is_none());

        s.handle_update_event(UpdateEvent::VersionFetched("2.1.0".to_string()));
        assert_eq!(s.latest_version(), Some("2.1.0"));
        assert!(store.last_update_check().is_some());

        s.handle_update_event(UpdateEvent::UpdateAvailable(ReleaseInfo {
            version: "2.1.0".to_string(),
            download_url: "https://example.test/r/2.1.0".to_string(),
            release_notes: "\n  Faster clicks\nmore".to_string(),
            prerelease: false,
            success: true,
            error: None,
        }));
        s.handle_update_event(UpdateEvent::CheckCompleted {
            success: false,
            message: "Update check failed unexpectedly".to_string(),
        });

        let lines: Vec<String> = rx.try_iter().collect();
        let n = lines.len();
        assert!(lines[n - 3].ends_with("✅ New version v2.1.0 is available: https://example.test/r/2.1.0"));
        assert!(lines[n - 2].ends_with("ℹ️ Faster clicks"));
        assert!(lines[n - 1].ends_with("❌ Update check failed unexpectedly"));
    }

    #[test]
    fn commands_drive_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, _rx) = shell(dir.path());

        assert!(s.handle_command(Command::Hide));
        assert!(!s.is_visible());
        s.handle_activation();
        assert!(s.is_visible());

        assert!(s.handle_command(Command::Hotkey("Alt+G".to_string())));
        assert!(s.status_line().contains("hotkey Alt+G"));
        assert!(s.handle_command(Command::Hotkey("Nope+".to_string())));
        assert!(s.status_line().contains("hotkey Alt+G"));

        if !cfg!(windows) {
            assert!(s.handle_command(Command::Toggle));
            assert!(s.engine().is_running());
            assert!(s.handle_command(Command::Stop));
            assert!(!s.engine().is_running());
        }

        assert!(!s.handle_command(Command::Quit));
        s.shutdown();
    }

    #[test]
    fn shutdown_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (mut s, _rx) = shell(dir.path());
        let lock = s.lock.clone();
        assert_eq!(lock.state(), LockState::Held);
        s.shutdown();
        assert_eq!(lock.state(), LockState::Released);
        assert!(!lock.lockfile_path().exists());
    }
}
