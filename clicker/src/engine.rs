use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::activity::SharedLog;
use crate::config::ClickDefaults;
use crate::consts::MIN_CLICK_DELAY_SECS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickSettings {
    pub clicks: u32,
    /// 0 repeats until stopped.
    pub max_loops: u32,
    pub click_delay: Duration,
    pub cycle_delay: Duration,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            clicks: 1,
            max_loops: 0,
            click_delay: Duration::from_secs(1),
            cycle_delay: Duration::from_millis(500),
        }
    }
}

fn parse_count(s: &str, default: u32) -> u32 {
    s.trim().parse::<u32>().unwrap_or(default)
}

fn parse_delay(s: &str, default: Duration) -> Duration {
    let secs = match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => default.as_secs_f64(),
    };
    Duration::from_secs_f64(secs.max(MIN_CLICK_DELAY_SECS))
}

impl ClickSettings {
    /// Never fails: each malformed field takes its default.
    pub fn parse(click_count: &str, loop_count: &str, click_delay: &str, cycle_delay: &str) -> Self {
        let d = Self::default();
        Self {
            clicks: parse_count(click_count, d.clicks).max(1),
            max_loops: parse_count(loop_count, d.max_loops),
            click_delay: parse_delay(click_delay, d.click_delay),
            cycle_delay: parse_delay(cycle_delay, d.cycle_delay),
        }
    }

    pub fn from_defaults(c: &ClickDefaults) -> Self {
        Self::parse(&c.click_count, &c.loop_count, &c.click_delay, &c.cycle_delay)
    }
}

/// The synthetic click itself.
pub trait ClickPerformer: Send + Sync {
    fn click(&self) -> anyhow::Result<()>;
}

/// Stands in for a real input backend: every click is a debug log line.
#[derive(Debug, Default)]
pub struct LogClick;

impl ClickPerformer for LogClick {
    fn click(&self) -> anyhow::Result<()> {
        log::debug!("click");
        Ok(())
    }
}

pub struct ClickEngine {
    settings: Arc<Mutex<ClickSettings>>,
    performer: Arc<dyn ClickPerformer>,
    log: SharedLog,
    // Fresh flag per run so a worker still finishing its last sleep cannot
    // be revived by the next start.
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl ClickEngine {
    pub fn new(settings: ClickSettings, performer: Arc<dyn ClickPerformer>, log: SharedLog) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            performer,
            log,
            running: Arc::new(AtomicBool::new(false)),
            cycles: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed cycles of the current (or last) run.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> ClickSettings {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes effect at the start of the next cycle.
    pub fn set_settings(&self, settings: ClickSettings) {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        if let Some(prev) = self.worker.take() {
            if !prev.is_finished() {
                log::debug!("engine: previous run still winding down");
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();
        self.cycles.store(0, Ordering::SeqCst);

        let run = ClickRun {
            settings: self.settings.clone(),
            performer: self.performer.clone(),
            log: self.log.clone(),
            running,
            cycles: self.cycles.clone(),
        };
        match thread::Builder::new()
            .name("click-loop".to_string())
            .spawn(move || run.run())
        {
            Ok(h) => {
                self.worker = Some(h);
                self.log.info("Started clicking");
                true
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.log.error(&format!("Failed to start clicker: {}", e));
                false
            }
        }
    }

    /// Lets the current click or sleep finish.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.log.info("Stopped clicking");
        }
    }

    pub fn toggle(&mut self) -> bool {
        if self.is_running() {
            self.stop();
            false
        } else {
            self.start()
        }
    }

    /// Stops and waits for the worker to exit.
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ClickEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct ClickRun {
    settings: Arc<Mutex<ClickSettings>>,
    performer: Arc<dyn ClickPerformer>,
    log: SharedLog,
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
}

impl ClickRun {
    fn active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(self) {
        let mut done: u64 = 0;
        'cycles: while self.active() {
            let s = *self.settings.lock().unwrap_or_else(|e| e.into_inner());
            if s.max_loops != 0 && done >= u64::from(s.max_loops) {
                break;
            }
            for _ in 0..s.clicks {
                if !self.active() {
                    break 'cycles;
                }
                if let Err(e) = self.performer.click() {
                    self.log.error(&format!("Clicker error: {}", e));
                    break 'cycles;
                }
                thread::sleep(s.click_delay);
            }
            if !self.active() {
                break;
            }
            done += 1;
            self.cycles.store(done, Ordering::SeqCst);
            log::debug!("engine: cycle {} complete", done);
            thread::sleep(s.cycle_delay);
        }

        if self.running.swap(false, Ordering::SeqCst) {
            self.log
                .info(&format!("Clicking finished after {} cycles", done));
        }
    }
}
