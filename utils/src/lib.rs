use std::cmp::Ordering;
use std::fmt;

/// Payload a second instance sends over loopback to ask the running one to
/// show itself. No reply is ever written back.
pub const ACTIVATE: &[u8] = b"ACTIVATE";

/// Upper bound on what the listener reads from a single connection.
pub const ACTIVATE_READ_LIMIT: usize = 1024;

pub fn is_activate(payload: &[u8]) -> bool {
    payload == ACTIVATE
}

pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseVersionError {
    Empty,
    TooManyComponents(usize),
    InvalidComponent(String),
    InvalidPrerelease(String),
}

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty version string"),
            Self::TooManyComponents(n) => write!(f, "expected at most 3 numeric components, got {n}"),
            Self::InvalidComponent(c) => write!(f, "invalid numeric component {c:?}"),
            Self::InvalidPrerelease(p) => write!(f, "invalid pre-release suffix {p:?}"),
        }
    }
}

impl std::error::Error for ParseVersionError {}

/// One dot-separated pre-release identifier.
///
/// Variant order matters: numeric identifiers sort before alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Alpha(s) => f.write_str(s),
        }
    }
}

/// `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`, with missing numeric parts read as 0.
///
/// Ordering follows SemVer precedence: a release outranks any pre-release of
/// the same triple, pre-release identifiers compare left to right, and build
/// metadata is ignored entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Vec<Identifier>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, ParseVersionError> {
        let s = s.trim();
        let s = s
            .strip_prefix('v')
            .or_else(|| s.strip_prefix('V'))
            .unwrap_or(s);
        let s = s.split_once('+').map(|(v, _)| v).unwrap_or(s);
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };
        if core.is_empty() {
            return Err(ParseVersionError::Empty);
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(ParseVersionError::TooManyComponents(parts.len()));
        }
        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseVersionError::InvalidComponent(part.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| ParseVersionError::InvalidComponent(part.to_string()))?;
        }

        let pre = match pre {
            None => Vec::new(),
            Some(p) => parse_prerelease(p)?,
        };

        Ok(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            pre,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

fn parse_prerelease(p: &str) -> Result<Vec<Identifier>, ParseVersionError> {
    if p.is_empty() {
        return Err(ParseVersionError::InvalidPrerelease(p.to_string()));
    }
    p.split('.')
        .map(|id| {
            if id.is_empty() {
                return Err(ParseVersionError::InvalidPrerelease(p.to_string()));
            }
            if id.bytes().all(|b| b.is_ascii_digit()) {
                // Digits too long for u64 still order sensibly as text.
                Ok(id
                    .parse()
                    .map(Identifier::Numeric)
                    .unwrap_or_else(|_| Identifier::Alpha(id.to_string())))
            } else {
                Ok(Identifier::Alpha(id.to_string()))
            }
        })
        .collect()
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let ids: Vec<String> = self.pre.iter().map(|id| id.to_string()).collect();
            write!(f, "-{}", ids.join("."))?;
        }
        Ok(())
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// Strings that do not parse are compared as raw text. That fallback is only a
/// best guess and never panics.
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_numeric_triples() {
        assert!(is_newer_version("1.2.0", "1.1.9"));
        assert!(!is_newer_version("1.0.0", "1.0.0"));
        assert!(!is_newer_version("1.1.9", "1.2.0"));
        assert!(is_newer_version("1.10.0", "1.9.0"));
    }

    #[test]
    fn missing_components_read_as_zero() {
        assert_eq!(Version::parse("1.2").unwrap(), Version::parse("1.2.0").unwrap());
        assert!(!is_newer_version("2", "2.0.0"));
        assert!(is_newer_version("v1.1", "1.0.9"));
    }

    #[test]
    fn prerelease_ranks_below_release() {
        assert!(is_newer_version("2.0.0-beta", "1.9.9"));
        assert!(is_newer_version("1.0.0", "1.0.0-beta"));
        assert!(!is_newer_version("1.0.0-beta", "1.0.0"));
        assert!(is_newer_version("1.0.0-beta", "1.0.0-alpha"));
        assert!(is_newer_version("1.0.0-beta.11", "1.0.0-beta.2"));
        assert!(is_newer_version("1.0.0-rc", "1.0.0-1"));
        assert!(is_newer_version("1.0.0-alpha.1", "1.0.0-alpha"));
    }

    #[test]
    fn build_metadata_is_ignored() {
        assert!(!is_newer_version("1.0.0+build.5", "1.0.0"));
        assert_eq!(Version::parse("1.0.0+abc").unwrap().to_string(), "1.0.0");
    }

    #[test]
    fn malformed_input_falls_back_to_text_comparison() {
        assert!(Version::parse("abc").is_err());
        assert_eq!(is_newer_version("abc", "1.0.0"), "abc" > "1.0.0");
        assert_eq!(is_newer_version("1.0.0", "abc"), "1.0.0" > "abc");
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.0.0-").is_err());
    }

    #[test]
    fn display_normalises_prefix_and_padding() {
        let v = Version::parse("v3.1-rc.1").unwrap();
        assert_eq!(v.to_string(), "3.1.0-rc.1");
        assert!(v.is_prerelease());
    }

    #[test]
    fn activate_sentinel_matches_exactly() {
        assert!(is_activate(b"ACTIVATE"));
        assert!(!is_activate(b"ACTIVATE\n"));
        assert!(!is_activate(b"activate"));
        assert!(!is_activate(b""));
    }
}
