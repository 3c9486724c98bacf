//! The lifecycle contract shared by every network-affecting module.

use async_trait::async_trait;

use crate::capture::OutputCapture;
use crate::error::Result;
use crate::settings::Settings;

pub mod dhcp;
pub mod dns;
pub mod firewall;
pub mod iface;
pub mod nat;
pub mod tftp;

pub use dhcp::DhcpServer;
pub use dns::DnsServer;
pub use firewall::FirewallZones;
pub use iface::InterfaceManager;
pub use nat::Nat;
pub use tftp::TftpServer;

/// Whether a module can and should mutate the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    /// Required tool missing or its version probe failed.
    Incapable,
    /// Tool available; waiting for `configure` to decide.
    Capable,
    /// Capable, but the resolved settings opted out.
    Disabled,
    /// Capable and requested; `start` will mutate host state.
    Active,
}

impl Enablement {
    pub fn is_active(self) -> bool {
        matches!(self, Enablement::Active)
    }

    /// Apply the configuration decision on top of the probe result.
    pub fn decide(self, requested: bool) -> Enablement {
        match (self, requested) {
            (Enablement::Incapable, _) => Enablement::Incapable,
            (_, true) => Enablement::Active,
            (_, false) => Enablement::Disabled,
        }
    }
}

/// One unit of host network mutation, driven through
/// `configure -> start -> stop` by the orchestrator, in that order, never
/// overlapping.
///
/// `start` and `stop` are no-ops unless the module is [`Enablement::Active`].
/// `stop` must restore exactly the pre-`start` state the module captured,
/// and is safe to call when `start` never ran. A `start` that fails partway
/// rolls its own applied sub-steps back before propagating.
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn enablement(&self) -> Enablement;

    /// Resolve the module's parameters and final enablement from the
    /// settings. Never touches the OS.
    fn configure(&mut self, settings: &Settings) -> Result<()>;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Output capture of the module's daemon, if it owns one.
    fn capture(&mut self) -> Option<&mut OutputCapture> {
        None
    }
}
