//! Command-line surface and settings resolution.
//!
//! The modules declare their own option groups ([`IfaceOptions`],
//! [`DhcpOptions`], [`FirewallOptions`], [`TftpOptions`]); this parser
//! flattens them into one command and resolves everything into the single
//! immutable [`Settings`] object the core consumes.

use std::net::Ipv4Addr;

use clap::Parser;

use crate::error::{LocalnetError, Result};
use crate::modules::dhcp::DhcpOptions;
use crate::modules::firewall::FirewallOptions;
use crate::modules::iface::IfaceOptions;
use crate::modules::tftp::TftpOptions;
use crate::net;
use crate::settings::{Preferences, Settings};

const DEFAULT_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 10, 1);
const DEFAULT_RANGE: &str = "10.10.10.100 10.10.10.200";
const DEFAULT_DOMAIN: &str = "localdomain";

/// Helper to create and maintain a local temporary network.
#[derive(Parser, Debug)]
#[command(name = "localnet", version)]
pub struct Cli {
    /// Ask interactively for common parameters not already given.
    #[arg(short, long)]
    pub interactive: bool,

    /// Network interface to use for the local network.
    pub local_interface: Option<String>,

    /// Network interface with internet access that the local network should
    /// be bridged to.
    pub internet_interface: Option<String>,

    /// This computer's static IP address, default is 10.10.10.1.
    #[arg(long)]
    pub ip: Option<Ipv4Addr>,

    /// Subnet mask as number of bits, default is 24. Only 24, 16 and 8 are
    /// supported.
    #[arg(long)]
    pub subnet: Option<u8>,

    /// Address range for DHCP, default is "10.10.10.100 10.10.10.200".
    #[arg(long)]
    pub iprange: Option<String>,

    /// Domain name for the local network, default is "localdomain".
    #[arg(long)]
    pub domain: Option<String>,

    /// Enable PXE network booting with the given bootfile. Starts a TFTP
    /// server. Disabled by default.
    #[arg(long, value_name = "BOOTFILE")]
    pub pxe: Option<String>,

    #[command(flatten)]
    pub iface: IfaceOptions,

    #[command(flatten)]
    pub dhcp: DhcpOptions,

    #[command(flatten)]
    pub firewall: FirewallOptions,

    #[command(flatten)]
    pub tftp: TftpOptions,
}

impl Cli {
    /// Resolve the parsed arguments (plus preference-file defaults) into the
    /// settings object. Rejects contradictory input before any module runs.
    pub fn resolve(self, prefs: &Preferences) -> Result<Settings> {
        let Some(local_interface) = self.local_interface else {
            return Err(LocalnetError::Config(
                "local interface argument is mandatory when not in interactive mode".into(),
            ));
        };

        let ip = self.ip.or(prefs.ip).unwrap_or(DEFAULT_IP);
        let prefix = self.subnet.unwrap_or(24);
        // Reject unsupported prefixes here, not halfway through start.
        net::netmask(prefix)?;

        let (range_start, range_end) =
            parse_range(self.iprange.as_deref().unwrap_or(DEFAULT_RANGE))?;
        let domain = self
            .domain
            .or_else(|| prefs.domain.clone())
            .unwrap_or_else(|| DEFAULT_DOMAIN.into());

        let internet_interface = self.internet_interface;
        Ok(Settings {
            internet_access: internet_interface.is_some(),
            local_interface,
            internet_interface,
            ip,
            prefix,
            range_start,
            range_end,
            domain,
            pxe_file: self.pxe,
            manage_interface: !self.iface.no_nm,
            firewall_type: self.firewall.firewall_type,
            dhcp_pidfile: self.dhcp.dhcp_pidfile,
            tftp_pidfile: self.tftp.tftp_pidfile,
            tftp_root: self.tftp.tftp_rootdir,
        })
    }
}

/// Parse a DHCP range given as "START END".
fn parse_range(raw: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let mut parts = raw.split_whitespace();
    let (Some(start), Some(end), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LocalnetError::Config(format!(
            "invalid address range \"{raw}\": expected \"START END\""
        )));
    };
    let parse = |addr: &str| {
        addr.parse::<Ipv4Addr>().map_err(|_| {
            LocalnetError::Config(format!("invalid address \"{addr}\" in range \"{raw}\""))
        })
    };
    Ok((parse(start)?, parse(end)?))
}
