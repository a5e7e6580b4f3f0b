// Small text files under the data directory. Nothing in here returns an
// error to the caller: a failed read yields the default, a failed write is
// logged and dropped.

use std::io;
use std::path::Path;

use crate::paths::AppPaths;

/// Trimmed file contents, or `None` when missing, unreadable or blank.
pub fn read_file(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Err(e) => {
            log::error!("read {}: {}", path.display(), e);
            None
        }
    }
}

pub fn read_or(path: &Path, default: &str) -> String {
    read_file(path).unwrap_or_else(|| default.to_string())
}

/// Overwrites `path` with the trimmed `content`. Returns whether it landed.
pub fn write_file(path: &Path, content: &str) -> bool {
    match try_write(path, content) {
        Ok(()) => {
            log::debug!("wrote {}: {:?}", path.display(), content.trim());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            log::warn!("permission denied writing {}: {}", path.display(), e);
            if let Err(e) = repair_permissions(path) {
                log::error!("repair permissions for {}: {}", path.display(), e);
                return false;
            }
            match try_write(path, content) {
                Ok(()) => {
                    log::debug!("repaired permissions and wrote {}", path.display());
                    true
                }
                Err(e) => {
                    log::error!("write {} after repair: {}", path.display(), e);
                    false
                }
            }
        }
        Err(e) => {
            log::error!("write {}: {}", path.display(), e);
            false
        }
    }
}

pub fn remove_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::warn!("remove {}: {}", path.display(), e);
            false
        }
    }
}

fn try_write(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content.trim().as_bytes())
}

#[cfg(unix)]
fn repair_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    }
    if path.exists() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn repair_permissions(path: &Path) -> io::Result<()> {
    if path.exists() {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(windows)]
fn hide(path: &Path) {
    use std::process::{Command, Stdio};

    let status = Command::new("attrib")
        .arg("+H")
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => log::warn!("hide {}: attrib exited with {}", path.display(), s),
        Err(e) => log::warn!("hide {}: {}", path.display(), e),
    }
}

/// Typed access to the persisted settings that are not version related.
#[derive(Debug, Clone)]
pub struct Store {
    paths: AppPaths,
}

impl Store {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Idempotent. On Windows the directory and the known files are also
    /// marked hidden; failing to do so only warns.
    pub fn ensure_directory(&self) -> bool {
        if let Err(e) = std::fs::create_dir_all(&self.paths.data_dir) {
            log::error!("create {}: {}", self.paths.data_dir.display(), e);
            return false;
        }

        #[cfg(windows)]
        {
            hide(&self.paths.data_dir);
            for p in self.paths.hidden_files() {
                if p.exists() {
                    hide(p);
                }
            }
        }

        true
    }

    pub fn load_hotkey(&self, default: &str) -> String {
        read_or(&self.paths.hotkey_file, default)
    }

    pub fn save_hotkey(&self, hotkey: &str) -> bool {
        write_file(&self.paths.hotkey_file, hotkey)
    }

    pub fn load_admin_mode(&self) -> bool {
        read_file(&self.paths.admin_mode_file)
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn save_admin_mode(&self, admin: bool) -> bool {
        write_file(&self.paths.admin_mode_file, if admin { "true" } else { "false" })
    }

    pub fn record_update_check(&self, at: chrono::DateTime<chrono::Local>) -> bool {
        write_file(&self.paths.update_check_file, &at.to_rfc3339())
    }

    pub fn last_update_check(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        let s = read_file(&self.paths.update_check_file)?;
        chrono::DateTime::parse_from_rfc3339(&s).ok()
    }
}
