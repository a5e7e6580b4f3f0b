pub const APP_NAME: &str = "Sigma Auto Clicker";
pub const APP_DIR_NAME: &str = "sigma-autoclicker";

pub const GITHUB_REPO: &str = "MrAndiGamesDev/Sigma-Auto-Clicker";
pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

// Sentinel meaning "no real version known". Never trusted from the cache.
pub const DEFAULT_VERSION: &str = "1.0.0";

pub const LOCK_HOST: [u8; 4] = [127, 0, 0, 1];
pub const LOCK_PORT: u16 = 49513;

pub const DEFAULT_HOTKEY: &str = "Ctrl+F";

pub const HOTKEY_FILE: &str = "hotkey.txt";
pub const UPDATE_CHECK_FILE: &str = "last_update_check.txt";
pub const VERSION_FILE: &str = "current_version.txt";
pub const VERSION_CACHE_FILE: &str = "version_cache.txt";
pub const ADMIN_MODE_FILE: &str = "admin_mode.txt";
pub const LOCAL_VERSION_FILE: &str = "VERSION.txt";

pub const CACHE_TTL_SECS: i64 = 7 * 86_400;

pub const MIN_CLICK_DELAY_SECS: f64 = 0.01;
pub const LOW_MEMORY_BYTES: u64 = 512 * 1024 * 1024;
