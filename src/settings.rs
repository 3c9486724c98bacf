//! Resolved runtime settings and persisted user preferences.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fully-resolved settings handed to every module's `configure`.
///
/// Built once by the CLI/interactive layer before any module is configured;
/// immutable afterwards. Modules read from this object only - they never
/// prompt or re-derive intent.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Interface carrying the temporary local network.
    pub local_interface: String,
    /// Interface with internet access to bridge to, if any.
    pub internet_interface: Option<String>,
    /// Whether the local network should be bridged to the internet.
    /// Derived once from `internet_interface`; modules key off this field
    /// and never re-derive it.
    pub internet_access: bool,
    /// This computer's static address on the local network.
    pub ip: Ipv4Addr,
    /// Subnet prefix length in bits; 8, 16 or 24.
    pub prefix: u8,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub domain: String,
    /// PXE bootfile; enables the TFTP module when set.
    pub pxe_file: Option<String>,
    /// Whether the connection manager should release the local interface.
    pub manage_interface: bool,
    pub firewall_type: Option<String>,
    pub dhcp_pidfile: PathBuf,
    pub tftp_pidfile: PathBuf,
    pub tftp_root: PathBuf,
}

/// Persisted user preferences.
///
/// Every field has a serde default so that adding new fields later doesn't
/// break old preference files. Missing or unreadable files fall back to
/// defaults; saving is best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    /// Local interface picked in a previous run, used as the interactive
    /// suggestion.
    #[serde(default)]
    pub last_local_interface: Option<String>,
    /// Internet interface picked in a previous run.
    #[serde(default)]
    pub last_internet_interface: Option<String>,
    /// Preferred static address when `--ip` is not given.
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    /// Preferred domain name when `--domain` is not given.
    #[serde(default)]
    pub domain: Option<String>,
}

impl Preferences {
    /// Preference file path: `~/.config/localnet/config.json`.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("localnet").join("config.json"))
    }

    /// Load preferences from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    /// Remember the interface choices of a resolved run.
    pub fn remember(&mut self, settings: &Settings) {
        self.last_local_interface = Some(settings.local_interface.clone());
        self.last_internet_interface = settings.internet_interface.clone();
    }

    /// Save preferences to disk. Creates parent directories if needed;
    /// never fails the run.
    pub fn save(&self) {
        let Some(path) = Self::path() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let Ok(json) = serde_json::to_string_pretty(self) else {
            return;
        };
        let _ = std::fs::write(&path, json);
    }
}

#[cfg(test)]
impl Settings {
    pub(crate) fn for_tests() -> Self {
        Settings {
            local_interface: "veth0".into(),
            internet_interface: Some("eth0".into()),
            internet_access: true,
            ip: Ipv4Addr::new(10, 10, 10, 1),
            prefix: 24,
            range_start: Ipv4Addr::new(10, 10, 10, 100),
            range_end: Ipv4Addr::new(10, 10, 10, 200),
            domain: "localdomain".into(),
            pxe_file: None,
            manage_interface: true,
            firewall_type: None,
            dhcp_pidfile: "/run/dhcpd.pid".into(),
            tftp_pidfile: "/run/tftpd.pid".into(),
            tftp_root: "/srv/tftp/".into(),
        }
    }
}
