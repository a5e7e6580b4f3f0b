use std::path::{Path, PathBuf};

use crate::consts::{
    ADMIN_MODE_FILE, HOTKEY_FILE, UPDATE_CHECK_FILE, VERSION_CACHE_FILE, VERSION_FILE,
};

pub fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        if let Some(d) = dirs::data_dir() {
            return d.join("SigmaAutoClicker");
        }
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".sigma_autoclicker");
    }
    // Last resort: relative to the working directory.
    PathBuf::from(".sigma_autoclicker")
}

pub fn lock_file_name(port: u16) -> String {
    format!("app.lock.{}", port)
}

/// Every file the application persists, rooted at one private data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub hotkey_file: PathBuf,
    pub update_check_file: PathBuf,
    pub version_file: PathBuf,
    pub version_cache_file: PathBuf,
    pub admin_mode_file: PathBuf,
    pub lock_file: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: impl Into<PathBuf>, lock_port: u16) -> Self {
        let data_dir = data_dir.into();
        Self {
            hotkey_file: data_dir.join(HOTKEY_FILE),
            update_check_file: data_dir.join(UPDATE_CHECK_FILE),
            version_file: data_dir.join(VERSION_FILE),
            version_cache_file: data_dir.join(VERSION_CACHE_FILE),
            admin_mode_file: data_dir.join(ADMIN_MODE_FILE),
            lock_file: data_dir.join(lock_file_name(lock_port)),
            data_dir,
        }
    }

    /// Files that get the hidden attribute alongside the directory itself.
    pub fn hidden_files(&self) -> [&Path; 3] {
        [
            self.hotkey_file.as_path(),
            self.admin_mode_file.as_path(),
            self.version_file.as_path(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_name_carries_port() {
        let p = AppPaths::new("/data", 49513);
        assert_eq!(p.lock_file, PathBuf::from("/data/app.lock.49513"));
        assert_eq!(p.version_cache_file, PathBuf::from("/data/version_cache.txt"));
    }
}
