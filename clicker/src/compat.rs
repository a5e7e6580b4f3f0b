use serde::Serialize;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::activity::ActivityLog;
use crate::consts::LOW_MEMORY_BYTES;

/// What the checker needs to know about the host.
pub trait SystemProbe {
    /// `std::env::consts::OS` spelling: `windows`, `linux`, `macos`, ...
    fn os(&self) -> String;
    fn release(&self) -> String;
    fn os_major(&self) -> Option<u32>;
    fn is_elevated(&self) -> bool;
    fn available_memory(&self) -> Option<u64>;
}

pub struct HostProbe {
    system: System,
}

impl HostProbe {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        Self { system }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl SystemProbe for HostProbe {
    fn os(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn release(&self) -> String {
        System::os_version()
            .or_else(System::kernel_version)
            .unwrap_or_default()
    }

    fn os_major(&self) -> Option<u32> {
        System::os_version().as_deref().and_then(leading_number)
    }

    #[cfg(unix)]
    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(windows)]
    fn is_elevated(&self) -> bool {
        // `net session` is refused without an elevated token.
        std::process::Command::new("net")
            .arg("session")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    fn is_elevated(&self) -> bool {
        false
    }

    fn available_memory(&self) -> Option<u64> {
        match self.system.available_memory() {
            0 => None,
            n => Some(n),
        }
    }
}

struct PlatformRules {
    os: &'static str,
    min_major: Option<u32>,
    admin_warning: bool,
}

const PLATFORMS: &[PlatformRules] = &[
    PlatformRules {
        os: "windows",
        min_major: Some(10),
        admin_warning: false,
    },
    PlatformRules {
        os: "linux",
        min_major: None,
        admin_warning: false,
    },
    PlatformRules {
        os: "macos",
        min_major: None,
        admin_warning: true,
    },
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompatReport {
    pub system: String,
    pub release: String,
    pub compatible: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

pub fn check_compatibility(
    probe: &dyn SystemProbe,
    require_admin: bool,
    log: &dyn ActivityLog,
) -> CompatReport {
    let mut report = CompatReport {
        system: probe.os(),
        release: probe.release(),
        ..CompatReport::default()
    };

    match PLATFORMS.iter().find(|p| p.os == report.system) {
        None => {
            report
                .errors
                .push(format!("Unsupported OS: {}", report.system));
        }
        Some(rules) => {
            if let (Some(min), Some(major)) = (rules.min_major, probe.os_major()) {
                if major < min {
                    report
                        .errors
                        .push(format!("OS version too old. Requires {}+", min));
                }
            }
            let elevated = probe.is_elevated();
            if require_admin && !elevated {
                report
                    .errors
                    .push("Administrator privileges required for admin mode".to_string());
            } else if rules.admin_warning && !elevated {
                report
                    .warnings
                    .push("Administrator privileges may be required".to_string());
            }
            if matches!(probe.available_memory(), Some(n) if n < LOW_MEMORY_BYTES) {
                report
                    .warnings
                    .push("Low system resources detected".to_string());
            }
        }
    }

    report.compatible = report.errors.is_empty();
    for e in &report.errors {
        log.error(e);
    }
    for w in &report.warnings {
        log.warn(w);
    }
    report
}
