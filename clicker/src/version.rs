use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use url::Url;

use crate::config::AppConfig;
use crate::consts::GITHUB_ACCEPT;
use crate::paths::AppPaths;
use crate::store::{read_file, write_file};

pub use utils::is_newer_version;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    pub release_notes: String,
    pub prerelease: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl ReleaseInfo {
    /// Failed lookup carrying the default version as a safe stand-in.
    pub fn failure(default_version: &str, error: &FetchError) -> Self {
        Self {
            version: default_version.to_string(),
            download_url: String::new(),
            release_notes: String::new(),
            prerelease: false,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid timeout value")]
    InvalidTimeout,
    #[error("Missing GitHub repository configuration")]
    MissingRepository,
    #[error("No releases found")]
    NoReleases,
    #[error("No suitable releases found")]
    NoSuitableRelease,
    #[error("No valid version found")]
    NoValidVersion,
    #[error("Invalid API response format")]
    InvalidResponse,
    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("Request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("GitHub returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl FetchError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e)
        } else if let Some(status) = e.status() {
            FetchError::Status(status)
        } else if e.is_builder() {
            FetchError::Client(e)
        } else {
            FetchError::Request(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    prerelease: Option<bool>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Seconds from config into a timeout. Anything not strictly positive is invalid.
pub fn timeout_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn is_loopback(url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => match u.host() {
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
            None => false,
        },
        Err(_) => false,
    }
}

pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct VersionResolver {
    cfg: Arc<AppConfig>,
    paths: AppPaths,
}

impl VersionResolver {
    pub fn new(cfg: Arc<AppConfig>, paths: AppPaths) -> Self {
        Self { cfg, paths }
    }

    pub fn default_version(&self) -> &str {
        &self.cfg.default_version
    }

    fn is_default(&self, v: &str) -> bool {
        v == self.cfg.default_version
    }

    /// Shipped `VERSION.txt` wins when it holds a real version and is mirrored
    /// into the persisted slot. Otherwise the persisted slot, then the default.
    pub fn detect_local_version(&self) -> String {
        if let Some(v) = read_file(&self.cfg.local_version_file) {
            if !self.is_default(&v) {
                write_file(&self.paths.version_file, &v);
                return v;
            }
        }
        read_file(&self.paths.version_file).unwrap_or_else(|| self.cfg.default_version.clone())
    }

    pub fn get_cached_latest(&self) -> Option<String> {
        self.get_cached_latest_at(utils::now_secs())
    }

    /// Cached version if it is not the sentinel and `now - ts < ttl`.
    pub fn get_cached_latest_at(&self, now: i64) -> Option<String> {
        let content = read_file(&self.paths.version_cache_file)?;
        let mut lines = content.lines();
        let version = lines.next()?.trim();
        let ts: i64 = match lines.next()?.trim().parse() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("version cache: bad timestamp: {}", e);
                return None;
            }
        };
        if version.is_empty() || self.is_default(version) {
            return None;
        }
        if now.saturating_sub(ts) >= self.cfg.cache_ttl_secs {
            log::debug!("version cache: expired (ts={})", ts);
            return None;
        }
        Some(version.to_string())
    }

    pub fn cache_latest_version(&self, version: &str) -> bool {
        self.cache_latest_version_at(version, utils::now_secs())
    }

    pub fn cache_latest_version_at(&self, version: &str, now: i64) -> bool {
        write_file(&self.paths.version_cache_file, &format!("{}\n{}", version, now))
    }

    pub fn fetch_latest_release(&self, timeout: Duration, include_prerelease: bool) -> ReleaseInfo {
        let result = catch_unwind(AssertUnwindSafe(|| self.try_fetch(timeout, include_prerelease)))
            .unwrap_or_else(|p| Err(FetchError::Unexpected(panic_message(p.as_ref()))));
        match result {
            Ok(info) => info,
            Err(e) => {
                log::debug!("fetch_latest_release: {}", e);
                ReleaseInfo::failure(&self.cfg.default_version, &e)
            }
        }
    }

    fn try_fetch(&self, timeout: Duration, include_prerelease: bool) -> Result<ReleaseInfo, FetchError> {
        if timeout.is_zero() {
            return Err(FetchError::InvalidTimeout);
        }
        if self.cfg.github_repo.trim().is_empty() {
            return Err(FetchError::MissingRepository);
        }

        let url = self.cfg.releases_url();
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(self.cfg.user_agent());
        if is_loopback(&url) {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(FetchError::Client)?;

        log::debug!("fetch_latest_release: GET {} timeout={:?}", url, timeout);
        let resp = client
            .get(&url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .map_err(FetchError::from_reqwest)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }
        let text = resp.text().map_err(FetchError::from_reqwest)?;
        let releases: serde_json::Value = serde_json::from_str(&text)?;
        let releases = match releases {
            serde_json::Value::Array(items) => items,
            _ => return Err(FetchError::InvalidResponse),
        };
        if releases.is_empty() {
            return Err(FetchError::NoReleases);
        }

        let latest = releases
            .into_iter()
            .filter_map(|item| serde_json::from_value::<ReleaseEntry>(item).ok())
            .find(|r| {
                let tag_ok = r.tag_name.as_deref().is_some_and(|t| !t.trim().is_empty());
                // A release without the flag counts as a pre-release.
                tag_ok && (include_prerelease || !r.prerelease.unwrap_or(true))
            })
            .ok_or(FetchError::NoSuitableRelease)?;

        let tag = latest.tag_name.unwrap_or_default();
        let version = tag.trim().trim_start_matches('v').to_string();
        if version.is_empty() {
            return Err(FetchError::NoValidVersion);
        }

        Ok(ReleaseInfo {
            version,
            download_url: latest.html_url.unwrap_or_else(|| {
                format!("https://github.com/{}/releases/latest", self.cfg.github_repo)
            }),
            release_notes: latest
                .body
                .unwrap_or_else(|| "No release notes available".to_string()),
            prerelease: latest.prerelease.unwrap_or(false),
            success: true,
            error: None,
        })
    }

    /// Local override, then valid cache. Never touches the network.
    pub fn get_offline_version(&self) -> Option<String> {
        let local = self.detect_local_version();
        if !self.is_default(&local) {
            return Some(local);
        }
        let cached = self.get_cached_latest()?;
        write_file(&self.paths.version_file, &cached);
        Some(cached)
    }

    /// Remote leg of [`get_current_version`](Self::get_current_version):
    /// a fresh fetch (cached and persisted on success), else the default.
    pub fn fetch_current_version(&self) -> String {
        let info = self.fetch_latest_release(
            timeout_from_secs(self.cfg.startup_fetch_timeout_secs),
            self.cfg.include_prerelease,
        );
        if info.success {
            self.cache_latest_version(&info.version);
            write_file(&self.paths.version_file, &info.version);
            return info.version;
        }
        if let Some(e) = &info.error {
            log::info!("get_current_version: remote lookup failed: {}", e);
        }
        self.cfg.default_version.clone()
    }

    /// Local override, then valid cache, then a fresh fetch, then the default.
    /// Blocks on the network in the third case.
    pub fn get_current_version(&self) -> String {
        self.get_offline_version()
            .unwrap_or_else(|| self.fetch_current_version())
    }
}
