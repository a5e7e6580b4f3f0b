// Holding the lock means holding a listening socket on 127.0.0.1. The lock
// file only records which port to probe; a file whose port does not answer
// is stale and gets removed before anyone tries to bind.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::activity::SharedLog;
use crate::config::AppConfig;
use crate::consts::LOCK_HOST;
use crate::paths::AppPaths;
use crate::store::{read_file, remove_file, write_file};

const CONN_READ_TIMEOUT: Duration = Duration::from_millis(500);
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquiring,
    Held,
    Released,
}

/// Another process asked this one to come to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRequest;

struct Inner {
    state: LockState,
    bound: Option<SocketAddr>,
    running: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

pub struct SingletonLock {
    port: u16,
    lockfile: PathBuf,
    probe_timeout: Duration,
    connect_timeout: Duration,
    activate_timeout: Duration,
    accept_poll: Duration,
    log: SharedLog,
    activations: UnboundedSender<ActivationRequest>,
    inner: Mutex<Inner>,
}

impl SingletonLock {
    pub fn new(
        cfg: &AppConfig,
        paths: &AppPaths,
        log: SharedLog,
        activations: UnboundedSender<ActivationRequest>,
    ) -> Self {
        Self {
            port: cfg.lock_port,
            lockfile: paths.lock_file.clone(),
            probe_timeout: cfg.probe_timeout(),
            connect_timeout: cfg.connect_timeout(),
            activate_timeout: cfg.activate_timeout(),
            accept_poll: cfg.accept_poll(),
            log,
            activations,
            inner: Mutex::new(Inner {
                state: LockState::Unlocked,
                bound: None,
                running: Arc::new(AtomicBool::new(false)),
                listener: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lockfile_path(&self) -> &Path {
        &self.lockfile
    }

    pub fn state(&self) -> LockState {
        self.inner().state
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.inner().bound
    }

    /// Port recorded in the lock file, if any.
    pub fn recorded_port(&self) -> Option<u16> {
        read_file(&self.lockfile)?.parse().ok()
    }

    /// Becomes the primary instance, or returns `None` when another live
    /// instance answers on the recorded port or the bind fails.
    pub fn acquire_lock(&self) -> Option<SocketAddr> {
        self.acquire(false)
    }

    /// With `any_port`, a configured port held by someone else is replaced
    /// by an OS-assigned one. The lock file records whichever was bound.
    fn acquire(&self, any_port: bool) -> Option<SocketAddr> {
        let mut inner = self.inner();
        if inner.state == LockState::Held {
            return inner.bound;
        }
        inner.state = LockState::Acquiring;

        self.cleanup_stale_lock();

        if let Some(port) = self.recorded_port() {
            if is_listening(port, self.connect_timeout) {
                log::info!("singleton: instance already listening on port {}", port);
                inner.state = LockState::Unlocked;
                return None;
            }
        }

        let listener = match create_listener(self.port) {
            Ok(l) => l,
            Err(e) if any_port && self.port != 0 => {
                self.log.warn(&format!(
                    "Port {} is busy ({}); using a free port instead",
                    self.port, e
                ));
                match create_listener(0) {
                    Ok(l) => l,
                    Err(e) => {
                        self.log.error(&format!("Failed to bind a free port: {}", e));
                        inner.state = LockState::Unlocked;
                        return None;
                    }
                }
            }
            Err(e) => {
                self.log
                    .error(&format!("Failed to bind to port {}: {}", self.port, e));
                inner.state = LockState::Unlocked;
                return None;
            }
        };
        let addr = match listener.local_addr() {
            Ok(a) => a,
            Err(e) => {
                self.log.error(&format!("Failed to read lock address: {}", e));
                inner.state = LockState::Unlocked;
                return None;
            }
        };

        if !write_file(&self.lockfile, &addr.port().to_string()) {
            self.log.warn(&format!(
                "Lock file {} could not be written; other instances will not find this one",
                self.lockfile.display()
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let ctx = ListenerCtx {
            running: running.clone(),
            poll: self.accept_poll,
            activations: self.activations.clone(),
        };
        let handle = thread::Builder::new()
            .name("singleton-listener".to_string())
            .spawn(move || ctx.run(listener));
        match handle {
            Ok(h) => inner.listener = Some(h),
            Err(e) => {
                self.log
                    .error(&format!("Failed to start activation listener: {}", e));
                remove_file(&self.lockfile);
                inner.state = LockState::Unlocked;
                return None;
            }
        }

        log::info!("singleton: holding {} (lock file {})", addr, self.lockfile.display());
        inner.running = running;
        inner.bound = Some(addr);
        inner.state = LockState::Held;
        Some(addr)
    }

    /// Idempotent. Stops the listener, closes the socket, removes the lock
    /// file unless it now names another live instance (one that forced its
    /// way in after this one).
    pub fn release_lock(&self) {
        let mut inner = self.inner();
        inner.running.store(false, Ordering::SeqCst);
        if let Some(h) = inner.listener.take() {
            join_with_timeout(h, LISTENER_JOIN_TIMEOUT);
        }
        let own = inner.bound.take().map(|a| a.port());
        match self.recorded_port() {
            Some(p) if Some(p) != own && is_listening(p, self.probe_timeout) => {
                log::info!("singleton: lock file names live port {}, leaving it", p);
            }
            _ => {
                if remove_file(&self.lockfile) {
                    log::debug!("singleton: removed {}", self.lockfile.display());
                }
            }
        }
        inner.state = LockState::Released;
    }

    /// Drops any partial state and the lock file, then tries once more,
    /// falling back to a free port if the configured one is still held.
    pub fn force_new_instance(&self) -> Option<SocketAddr> {
        self.release_lock();
        remove_file(&self.lockfile);
        self.acquire(true)
    }

    /// Sends the activation sentinel to whichever instance the lock file names.
    pub fn activate_existing(&self) -> bool {
        let Some(port) = self.recorded_port() else {
            self.log
                .error("Failed to activate existing instance: no lock file");
            return false;
        };
        match send_activate(port, self.activate_timeout) {
            Ok(()) => {
                log::info!("singleton: sent activation to port {}", port);
                true
            }
            Err(e) => {
                self.log
                    .error(&format!("Failed to activate existing instance: {}", e));
                false
            }
        }
    }

    fn cleanup_stale_lock(&self) {
        let Some(raw) = read_file(&self.lockfile) else {
            return;
        };
        let stale = match raw.parse::<u16>() {
            Ok(port) => !is_listening(port, self.probe_timeout),
            Err(_) => true,
        };
        if stale && remove_file(&self.lockfile) {
            self.log.info("Cleaned up stale lock file");
        }
    }
}

fn create_listener(port: u16) -> io::Result<TcpListener> {
    // std enables SO_REUSEADDR for listeners on Unix.
    let listener = TcpListener::bind(SocketAddr::from((LOCK_HOST, port)))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        if self.state() == LockState::Held {
            self.release_lock();
        }
    }
}

pub fn is_listening(port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from((LOCK_HOST, port));
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

pub fn send_activate(port: u16, timeout: Duration) -> io::Result<()> {
    let addr = SocketAddr::from((LOCK_HOST, port));
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(utils::ACTIVATE)?;
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("singleton: listener did not stop within {:?}", timeout);
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}

struct ListenerCtx {
    running: Arc<AtomicBool>,
    poll: Duration,
    activations: UnboundedSender<ActivationRequest>,
}

impl ListenerCtx {
    fn run(self, listener: TcpListener) {
        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("singleton: connection from {}", peer);
                    self.handle(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(self.poll),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("singleton: accept failed, listener exiting: {}", e);
                    break;
                }
            }
        }
        log::debug!("singleton: listener stopped");
    }

    fn handle(&self, stream: TcpStream) {
        // Accepted sockets may inherit non-blocking mode (Windows does).
        if stream.set_nonblocking(false).is_err()
            || stream.set_read_timeout(Some(CONN_READ_TIMEOUT)).is_err()
        {
            return;
        }
        let mut buf = Vec::with_capacity(utils::ACTIVATE.len());
        // A timeout still leaves whatever arrived in `buf`.
        let _ = (&stream)
            .take(utils::ACTIVATE_READ_LIMIT as u64)
            .read_to_end(&mut buf);
        if utils::is_activate(&buf) {
            log::info!("singleton: activation requested");
            let _ = self.activations.send(ActivationRequest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ChannelLog;
    use crate::test_support::{dead_port, test_config};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn lock_with(cfg: &AppConfig) -> (SingletonLock, UnboundedReceiver<ActivationRequest>) {
        let (log, _rx) = ChannelLog::channel();
        let (tx, rx) = unbounded_channel();
        (SingletonLock::new(cfg, &cfg.paths(), Arc::new(log), tx), rx)
    }

    fn count_activations(rx: &mut UnboundedReceiver<ActivationRequest>, wait: Duration) -> usize {
        let deadline = Instant::now() + wait;
        let mut n = 0;
        while Instant::now() < deadline {
            match rx.try_recv() {
                Ok(_) => n += 1,
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
        n
    }

    #[test]
    fn second_acquire_sees_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (a, _ra) = lock_with(&cfg);
        let (b, _rb) = lock_with(&cfg);

        let addr = a.acquire_lock().expect("first acquire");
        assert_eq!(a.state(), LockState::Held);
        assert_eq!(read_file(a.lockfile_path()), Some(addr.port().to_string()));

        assert_eq!(b.acquire_lock(), None);
        assert_eq!(b.state(), LockState::Unlocked);
        // The probe must not have been mistaken for a stale file.
        assert_eq!(b.recorded_port(), Some(addr.port()));

        a.release_lock();
        assert!(b.acquire_lock().is_some());
        b.release_lock();
    }

    #[test]
    fn stale_lock_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);
        let stale = dead_port();
        assert!(write_file(lock.lockfile_path(), &stale.to_string()));

        let addr = lock.acquire_lock().expect("acquire over stale file");
        assert_eq!(lock.recorded_port(), Some(addr.port()));
        lock.release_lock();
    }

    #[test]
    fn garbage_lock_file_is_treated_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);
        assert!(write_file(lock.lockfile_path(), "not-a-port"));
        assert!(lock.acquire_lock().is_some());
        lock.release_lock();
    }

    #[test]
    fn activate_sentinel_raises_one_notification_and_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, mut rx) = lock_with(&cfg);
        let addr = lock.acquire_lock().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"ACTIVATE").unwrap();
        client.shutdown(Shutdown::Write).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert!(reply.is_empty(), "listener must not reply: {reply:?}");

        assert_eq!(count_activations(&mut rx, Duration::from_millis(300)), 1);
        lock.release_lock();
    }

    #[test]
    fn other_payloads_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, mut rx) = lock_with(&cfg);
        let addr = lock.acquire_lock().unwrap();

        for payload in [&b"HELLO"[..], b"ACTIVATE\n", b""] {
            let mut c = TcpStream::connect(addr).unwrap();
            c.write_all(payload).unwrap();
            drop(c);
        }
        assert_eq!(count_activations(&mut rx, Duration::from_millis(300)), 0);

        // Listener is still serving afterwards.
        assert!(send_activate(addr.port(), Duration::from_secs(1)).is_ok());
        assert_eq!(count_activations(&mut rx, Duration::from_millis(300)), 1);
        lock.release_lock();
    }

    #[test]
    fn activate_existing_reaches_primary() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (primary, mut rx) = lock_with(&cfg);
        let (second, _r2) = lock_with(&cfg);
        primary.acquire_lock().unwrap();

        assert!(second.acquire_lock().is_none());
        assert!(second.activate_existing());
        assert_eq!(count_activations(&mut rx, Duration::from_millis(300)), 1);
        primary.release_lock();
    }

    #[test]
    fn activate_without_lock_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);
        assert!(!lock.activate_existing());

        assert!(write_file(lock.lockfile_path(), &dead_port().to_string()));
        assert!(!lock.activate_existing());
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);

        lock.release_lock();
        assert!(!lock.lockfile_path().exists());

        let addr = lock.acquire_lock().unwrap();
        lock.release_lock();
        lock.release_lock();
        assert_eq!(lock.state(), LockState::Released);
        assert!(!lock.lockfile_path().exists());
        assert!(!is_listening(addr.port(), Duration::from_millis(200)));
    }

    #[test]
    fn bind_failure_is_not_acquired() {
        let dir = tempfile::tempdir().unwrap();
        let squatter = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = squatter.local_addr().unwrap().port();
        let cfg = AppConfig {
            lock_port: port,
            ..(*test_config(dir.path(), "http://127.0.0.1:9")).clone()
        };
        let (lock, _rx) = lock_with(&cfg);

        assert_eq!(lock.acquire_lock(), None);
        assert_eq!(lock.state(), LockState::Unlocked);
        assert!(!lock.lockfile_path().exists());
    }

    #[test]
    fn force_new_instance_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);
        assert!(write_file(lock.lockfile_path(), &dead_port().to_string()));

        let addr = lock.force_new_instance().expect("forced acquire");
        assert_eq!(lock.state(), LockState::Held);
        assert_eq!(lock.recorded_port(), Some(addr.port()));
        lock.release_lock();
    }

    fn fixed_port_config(dir: &Path) -> AppConfig {
        AppConfig {
            lock_port: dead_port(),
            ..(*test_config(dir, "http://127.0.0.1:9")).clone()
        }
    }

    #[test]
    fn force_new_on_fixed_port_displaces_live_primary() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = fixed_port_config(dir.path());
        let (first, _r1) = lock_with(&cfg);
        let (second, _r2) = lock_with(&cfg);
        let first_addr = first.acquire_lock().unwrap();
        assert_eq!(first_addr.port(), cfg.lock_port);

        assert!(second.acquire_lock().is_none());
        let second_addr = second.force_new_instance().expect("forced past live primary");
        assert_ne!(second_addr.port(), cfg.lock_port);
        assert_eq!(second.recorded_port(), Some(second_addr.port()));

        // The displaced primary shutting down must not orphan the newcomer.
        first.release_lock();
        assert_eq!(second.recorded_port(), Some(second_addr.port()));

        second.release_lock();
        assert!(!second.lockfile_path().exists());
    }

    #[test]
    fn release_without_holding_keeps_live_owner_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (owner, _r1) = lock_with(&cfg);
        let (other, _r2) = lock_with(&cfg);
        let addr = owner.acquire_lock().unwrap();

        other.release_lock();
        assert_eq!(owner.recorded_port(), Some(addr.port()));
        owner.release_lock();
        assert!(!owner.lockfile_path().exists());
    }

    #[test]
    fn drop_releases_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path(), "http://127.0.0.1:9");
        let (lock, _rx) = lock_with(&cfg);
        lock.acquire_lock().unwrap();
        let path = lock.lockfile_path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }
}
