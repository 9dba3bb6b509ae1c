//! Device identity for license binding.
//!
//! Derives a stable identifier for this machine. A key is bound to the
//! identifier of the first machine that activates it, so the value must
//! survive reboots and must not be user-configurable.
//!
//! Sources, in order:
//! 1. the platform machine id (`/etc/machine-id`, `IOPlatformUUID`, `wmic`)
//! 2. the hardware address of the first usable network interface
//! 3. OS, architecture and hostname
//!
//! The raw value is hashed before it leaves the machine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::fmt;
#[cfg(any(target_os = "linux", test))]
use std::{fs, path::Path};

/// Information about the current device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// Hostname.
    pub hostname: String,
    /// CPU architecture.
    pub arch: String,
}

impl DeviceInfo {
    /// Collects information about the current device.
    #[must_use]
    pub fn collect() -> Self {
        Self {
            os_name: env::consts::OS.to_string(),
            os_version: get_os_version(),
            hostname: get_hostname(),
            arch: env::consts::ARCH.to_string(),
        }
    }
}

/// Where a [`DeviceId`] was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSource {
    Hardware,
    Network,
    Host,
}

impl DeviceSource {
    fn prefix(self) -> &'static str {
        match self {
            Self::Hardware => "hw",
            Self::Network => "net",
            Self::Host => "host",
        }
    }
}

/// Stable identifier of this machine, as written to a key's `hwid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Derives the identifier of the current machine. Never empty.
    #[must_use]
    pub fn current() -> Self {
        if let Some(machine_id) = get_machine_id() {
            return Self::derive(DeviceSource::Hardware, &machine_id);
        }
        if let Some(mac) = get_network_address() {
            return Self::derive(DeviceSource::Network, &mac);
        }
        Self::derive(DeviceSource::Host, &collect_host_ids().join("|"))
    }

    /// Hashes a raw identifier into a device id.
    #[must_use]
    pub fn derive(source: DeviceSource, raw: &str) -> Self {
        let hash = Sha256::digest(raw.trim().as_bytes());
        Self(format!("{}-{}", source.prefix(), hex::encode(&hash[..16])))
    }

    /// Uses an identifier supplied by the embedding host as-is.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host identifiers for the last-resort id.
fn collect_host_ids() -> Vec<String> {
    vec![
        env::consts::OS.to_string(),
        env::consts::ARCH.to_string(),
        get_hostname(),
    ]
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
}

/// Rejects empty and placeholder identifiers some firmware reports.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows", test))]
fn usable_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    let digits: Vec<char> = id.chars().filter(char::is_ascii_hexdigit).collect();
    let placeholder = !digits.is_empty()
        && digits
            .iter()
            .all(|c| *c == '0' || c.eq_ignore_ascii_case(&'f'));
    (!id.is_empty() && !placeholder).then(|| id.to_string())
}

/// Gets the OS version string.
fn get_os_version() -> String {
    #[cfg(target_os = "macos")]
    {
        command_output("sw_vers", &["-productVersion"])
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(target_os = "windows")]
    {
        command_output("cmd", &["/C", "ver"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "windows".to_string())
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("VERSION_ID="))
                    .map(|l| {
                        l.trim_start_matches("VERSION_ID=")
                            .trim_matches('"')
                            .to_string()
                    })
            })
            .unwrap_or_else(|| "unknown".to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        "unknown".to_string()
    }
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        command_output("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).and_then(|output| {
            output
                .lines()
                .find(|l| l.contains("IOPlatformUUID"))
                .and_then(|l| l.split('"').nth(3))
                .and_then(usable_id)
        })
    }

    #[cfg(target_os = "linux")]
    {
        machine_id_from(&[
            Path::new("/etc/machine-id"),
            Path::new("/var/lib/dbus/machine-id"),
        ])
    }

    #[cfg(target_os = "windows")]
    {
        // First line is the "UUID" column header.
        command_output("wmic", &["csproduct", "get", "uuid"])
            .and_then(|output| output.lines().skip(1).find_map(usable_id))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets the hardware address of the primary physical interface.
fn get_network_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        network_address_from(Path::new("/sys/class/net"))
    }

    #[cfg(target_os = "macos")]
    {
        command_output("ifconfig", &["en0"]).and_then(|output| {
            output
                .lines()
                .map(str::trim)
                .find(|l| l.starts_with("ether "))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(usable_id)
        })
    }

    #[cfg(target_os = "windows")]
    {
        command_output("getmac", &["/fo", "csv", "/nh"]).and_then(|output| {
            output
                .lines()
                .filter_map(|l| l.split(',').next())
                .map(|mac| mac.trim_matches('"'))
                .filter(|mac| mac.contains('-'))
                .find_map(usable_id)
        })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// First usable id among `paths`, tried in order.
#[cfg(any(target_os = "linux", test))]
fn machine_id_from(paths: &[&Path]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| fs::read_to_string(path).ok().and_then(|s| usable_id(&s)))
}

/// MAC of the first physical interface under a `/sys/class/net` style root.
///
/// Only interfaces backed by a device count. Bridges, veth pairs and
/// loopback have no `device` link and may get a new MAC on every start.
#[cfg(any(target_os = "linux", test))]
fn network_address_from(root: &Path) -> Option<String> {
    let mut interfaces: Vec<_> = fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join("device").exists())
        .collect();
    interfaces.sort();

    interfaces.iter().find_map(|path| {
        fs::read_to_string(path.join("address"))
            .ok()
            .and_then(|mac| usable_id(&mac))
    })
}
