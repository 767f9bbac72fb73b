//! Platform detection utilities

use std::fs;

/// Host platform, used once by the engine factory to pick a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Native Linux (or another Speech Dispatcher capable *nix)
    Linux,
    /// Linux running under Windows Subsystem for Linux
    Wsl,
    Windows,
    MacOs,
    Other,
}

impl HostPlatform {
    /// Detect the platform this process runs on
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS, is_wsl())
    }

    /// Classify an OS name as reported by `std::env::consts::OS`
    pub fn from_os(os: &str, wsl: bool) -> Self {
        match os {
            "linux" if wsl => HostPlatform::Wsl,
            "linux" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => HostPlatform::Linux,
            "windows" => HostPlatform::Windows,
            "macos" => HostPlatform::MacOs,
            _ => HostPlatform::Other,
        }
    }
}

/// Detect if running in WSL (Windows Subsystem for Linux)
///
/// Checks for WSL-specific indicators in /proc/version and environment variables.
pub fn is_wsl() -> bool {
    if let Ok(contents) = fs::read_to_string("/proc/version") {
        let lower = contents.to_lowercase();
        if lower.contains("microsoft") || lower.contains("wsl") {
            return true;
        }
    }

    std::env::var("WSL_DISTRO_NAME").is_ok()
}
