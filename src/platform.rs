//! Operating system and package manager detection.
use std::fmt;

use serde::Serialize;

use crate::exec::CommandRunner;

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux and other Unix-like systems.
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
}

impl Os {
    /// Prefix used in system task ids (`linux:apt:update`).
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Supported system package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian/Ubuntu (`apt-get`).
    Apt,
    /// Fedora/RHEL (`dnf`).
    Dnf,
    /// Arch Linux (`pacman`).
    Pacman,
    /// Homebrew on macOS.
    Brew,
    /// Windows Package Manager.
    Winget,
}

impl PackageManager {
    /// Executable probed on PATH to detect this manager.
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Apt => "apt-get",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Brew => "brew",
            Self::Winget => "winget",
        }
    }

    /// Whether install/update commands need root privileges.
    #[must_use]
    pub const fn needs_root(self) -> bool {
        matches!(self, Self::Apt | Self::Dnf | Self::Pacman)
    }

    /// Managers considered on `os`, in probe order.
    #[must_use]
    pub const fn candidates(os: Os) -> &'static [Self] {
        match os {
            Os::Linux => &[Self::Apt, Self::Dnf, Self::Pacman],
            Os::MacOs => &[Self::Brew],
            Os::Windows => &[Self::Winget],
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt"),
            Self::Dnf => write!(f, "dnf"),
            Self::Pacman => write!(f, "pacman"),
            Self::Brew => write!(f, "brew"),
            Self::Winget => write!(f, "winget"),
        }
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// First available package manager, if any.
    pub package_manager: Option<PackageManager>,
    /// Prefix privileged package operations with `sudo`.
    pub elevate: bool,
}

impl Platform {
    /// Detect the current platform, probing PATH through `runner`.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        let os = Self::detect_os();
        let package_manager = PackageManager::candidates(os)
            .iter()
            .copied()
            .find(|pm| runner.which(pm.program()));
        let elevate = os != Os::Windows && !Self::is_root() && runner.which("sudo");
        Self {
            os,
            package_manager,
            elevate,
        }
    }

    /// Create a platform with explicit values.
    #[must_use]
    pub const fn new(os: Os, package_manager: Option<PackageManager>, elevate: bool) -> Self {
        Self {
            os,
            package_manager,
            elevate,
        }
    }

    const fn detect_os() -> Os {
        if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            // Default to Linux for other Unix-like systems
            Os::Linux
        }
    }

    /// Whether the process runs with an effective uid of 0.
    #[cfg(unix)]
    fn is_root() -> bool {
        use std::os::unix::fs::MetadataExt;

        // /proc/self belongs to the effective uid; it is absent on macOS
        let proc_uid = std::fs::metadata("/proc/self").ok().map(|m| m.uid());
        root_from(proc_uid, std::env::var("USER").ok().as_deref())
    }

    #[cfg(not(unix))]
    const fn is_root() -> bool {
        false
    }
}

/// Decide root from the owner of `/proc/self` when known, else from `$USER`.
#[cfg_attr(not(unix), allow(dead_code))]
fn root_from(proc_uid: Option<u32>, user: Option<&str>) -> bool {
    proc_uid.map_or(user == Some("root"), |uid| uid == 0)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeRunner;

    #[test]
    fn detect_picks_first_available_manager() {
        let runner = FakeRunner::new().with_programs(&["dnf", "pacman"]);
        let p = Platform::detect(&runner);
        if p.os == Os::Linux {
            assert_eq!(p.package_manager, Some(PackageManager::Dnf));
        }
    }

    #[test]
    fn detect_without_manager() {
        let runner = FakeRunner::new();
        let p = Platform::detect(&runner);
        assert_eq!(p.package_manager, None);
        assert!(!p.elevate, "no sudo on PATH means no elevation");
    }

    #[test]
    fn os_keys_are_task_prefixes() {
        assert_eq!(Os::Linux.key(), "linux");
        assert_eq!(Os::MacOs.key(), "darwin");
        assert_eq!(Os::Windows.key(), "windows");
    }

    #[test]
    fn os_display() {
        assert_eq!(Os::Linux.to_string(), "linux");
        assert_eq!(Os::MacOs.to_string(), "macos");
        assert_eq!(Os::Windows.to_string(), "windows");
    }

    #[test]
    fn candidates_per_os() {
        assert_eq!(PackageManager::candidates(Os::MacOs), &[PackageManager::Brew]);
        assert_eq!(
            PackageManager::candidates(Os::Windows),
            &[PackageManager::Winget]
        );
        assert_eq!(PackageManager::candidates(Os::Linux).len(), 3);
    }

    #[test]
    fn only_linux_managers_need_root() {
        assert!(PackageManager::Apt.needs_root());
        assert!(!PackageManager::Brew.needs_root());
        assert!(!PackageManager::Winget.needs_root());
    }

    #[test]
    fn platform_new_explicit() {
        let p = Platform::new(Os::Windows, Some(PackageManager::Winget), false);
        assert_eq!(p.os, Os::Windows);
        assert_eq!(p.package_manager, Some(PackageManager::Winget));
        assert!(!p.elevate);
    }

    #[test]
    fn root_follows_effective_uid_over_user() {
        // containers often run as uid 0 with USER unset
        assert!(root_from(Some(0), None));
        assert!(!root_from(Some(1000), Some("root")));
        assert!(root_from(None, Some("root")));
        assert!(!root_from(None, Some("alice")));
        assert!(!root_from(None, None));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn root_never_elevates() {
        use std::os::unix::fs::MetadataExt;

        let uid = std::fs::metadata("/proc/self").unwrap().uid();
        let p = Platform::detect(&FakeRunner::new().with_programs(&["sudo"]));
        assert_eq!(p.elevate, uid != 0);
    }
}
