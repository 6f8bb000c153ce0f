//! Version information and controller/participant compatibility.
//!
//! A controller may only drive participants that share its `major.minor`
//! version. The patch component is ignored. A controller without a parseable
//! version never passes; a participant without one is assumed to predate
//! version reporting and always passes.

use serde::{Deserialize, Serialize};

/// A parsed `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl VersionInfo {
    /// Create a new version info.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a strict `major.minor.patch` string with numeric components.
    pub fn parse(raw: &str) -> Option<Self> {
        fn number(part: Option<&str>) -> Option<u32> {
            let part = part?;
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            part.parse().ok()
        }

        let mut parts = raw.trim().split('.');
        let major = number(parts.next())?;
        let minor = number(parts.next())?;
        let patch = number(parts.next())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Version of this build.
    pub fn current() -> Self {
        Self::parse(env!("CARGO_PKG_VERSION")).unwrap_or_default()
    }

    /// Get version as a semver string.
    pub fn semver(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// Check if `other` shares this version's major and minor components.
    pub fn is_compatible_with(&self, other: &VersionInfo) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.semver())
    }
}

/// Compatibility check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityCheck {
    /// Whether versions are compatible.
    pub compatible: bool,
    /// Reason if not compatible.
    pub reason: Option<String>,
}

impl CompatibilityCheck {
    /// Decide whether a controller reporting `controller` may drive a
    /// participant reporting `participant`.
    pub fn check(controller: Option<&str>, participant: Option<&str>) -> Self {
        let Some(local) = controller.and_then(VersionInfo::parse) else {
            return Self::incompatible(format!(
                "controller version {} is absent or malformed",
                controller.unwrap_or("<absent>")
            ));
        };
        let Some(remote) = participant.and_then(VersionInfo::parse) else {
            return Self::compatible();
        };
        if local.is_compatible_with(&remote) {
            Self::compatible()
        } else {
            Self::incompatible(format!(
                "version mismatch: controller {} vs participant {}",
                local, remote
            ))
        }
    }

    fn compatible() -> Self {
        Self {
            compatible: true,
            reason: None,
        }
    }

    fn incompatible(reason: String) -> Self {
        Self {
            compatible: false,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(VersionInfo::parse("0.4.12"), Some(VersionInfo::new(0, 4, 12)));
        assert_eq!(VersionInfo::parse(" 1.2.3 "), Some(VersionInfo::new(1, 2, 3)));
        assert_eq!(VersionInfo::parse("0.4"), None);
        assert_eq!(VersionInfo::parse("0.4.0.1"), None);
        assert_eq!(VersionInfo::parse("0.4.x"), None);
        assert_eq!(VersionInfo::parse("0.4.0-SNAPSHOT"), None);
        assert_eq!(VersionInfo::parse(""), None);
        assert_eq!(VersionInfo::parse("+0.+4.0"), None);
        assert_eq!(VersionInfo::parse("1..0"), None);
    }

    #[test]
    fn test_current_matches_package() {
        assert_eq!(VersionInfo::current().semver(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_compatibility_table() {
        let cases = [
            (Some("0.4.0"), Some("0.4.0"), true),
            (Some("0.4.0"), None, true),
            (None, Some("0.4.0"), false),
            (Some("0.2.12"), Some("0.3.4"), false),
            (Some("0.4.12"), Some("0.3.4"), false),
            (Some("0.4.12"), Some("0.4.3"), true),
        ];
        for (controller, participant, expected) in cases {
            let check = CompatibilityCheck::check(controller, participant);
            assert_eq!(
                check.compatible, expected,
                "controller {:?} participant {:?}",
                controller, participant
            );
            assert_eq!(check.reason.is_none(), expected);
        }
    }

    #[test]
    fn test_malformed_versions() {
        // Fails closed for the controller, open for participants.
        assert!(!CompatibilityCheck::check(Some("four"), Some("0.4.0")).compatible);
        assert!(CompatibilityCheck::check(Some("0.4.0"), Some("four")).compatible);
    }
}
