use anyhow::Context;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consts::{
    APP_DIR_NAME, APP_NAME, CACHE_TTL_SECS, DEFAULT_HOTKEY, DEFAULT_VERSION, GITHUB_API_BASE,
    GITHUB_REPO, LOCAL_VERSION_FILE, LOCK_PORT,
};
use crate::paths::{default_data_dir, AppPaths};

/// Raw click settings as the user typed them. Parsed leniently by the engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ClickDefaults {
    pub click_count: String,
    pub loop_count: String,
    pub click_delay: String,
    pub cycle_delay: String,
}

impl Default for ClickDefaults {
    fn default() -> Self {
        Self {
            click_count: "1".to_string(),
            loop_count: "0".to_string(),
            click_delay: "1".to_string(),
            cycle_delay: "0.5".to_string(),
        }
    }
}

/// Process-wide settings. Built once at startup and shared read-only.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    /// `owner/name`; empty disables remote lookups.
    pub github_repo: String,
    pub api_base: String,
    pub default_version: String,

    /// 0 asks the OS for a free port; the bound port is what gets persisted.
    pub lock_port: u16,
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub activate_timeout_ms: u64,
    pub accept_poll_ms: u64,

    pub update_check_interval_secs: u64,
    pub initial_check_delay_secs: u64,
    pub update_timeout_secs: f64,
    pub startup_fetch_timeout_secs: f64,
    pub include_prerelease: bool,
    pub cache_ttl_secs: i64,

    pub hotkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub local_version_file: PathBuf,
    pub require_admin: bool,

    pub click: ClickDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            github_repo: GITHUB_REPO.to_string(),
            api_base: GITHUB_API_BASE.to_string(),
            default_version: DEFAULT_VERSION.to_string(),
            lock_port: LOCK_PORT,
            probe_timeout_ms: 200,
            connect_timeout_ms: 500,
            activate_timeout_ms: 1000,
            accept_poll_ms: 100,
            update_check_interval_secs: 24 * 60 * 60,
            initial_check_delay_secs: 10,
            update_timeout_secs: 5.0,
            startup_fetch_timeout_secs: 10.0,
            include_prerelease: false,
            cache_ttl_secs: CACHE_TTL_SECS,
            hotkey: DEFAULT_HOTKEY.to_string(),
            data_dir: None,
            local_version_file: PathBuf::from(LOCAL_VERSION_FILE),
            require_admin: false,
            click: ClickDefaults::default(),
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn paths(&self) -> AppPaths {
        AppPaths::new(self.data_dir(), self.lock_port)
    }

    pub fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/releases",
            self.api_base.trim_end_matches('/'),
            self.github_repo.trim_matches('/')
        )
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.app_name.replace(' ', "-"), env!("CARGO_PKG_VERSION"))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn activate_timeout(&self) -> Duration {
        Duration::from_millis(self.activate_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.update_check_interval_secs.max(60))
    }

    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_secs(self.initial_check_delay_secs)
    }
}

pub fn config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
    base.join(APP_DIR_NAME).join("config.toml")
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&s).context("parse config")?;
    Ok(cfg)
}

/// Missing file means defaults; a file that exists but does not parse is an error.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() {
        log::debug!("config: {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    load_config(path)
}
