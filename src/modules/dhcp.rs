//! DHCP module: brings the local interface up with the static address and
//! supervises a dhcpd instance configured independently from the system.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::capture::OutputCapture;
use crate::error::{LocalnetError, Result};
use crate::modules::{Enablement, Module};
use crate::net;
use crate::probe::{self, ToolInfo};
use crate::runner::{CommandRunner, Daemon};
use crate::settings::Settings;

/// Options contributed to the command line by this module.
#[derive(Args, Debug, Clone)]
pub struct DhcpOptions {
    /// Path for the dhcpd pidfile.
    #[arg(long = "dhcp-pidfile", default_value = "/run/dhcpd.pid")]
    pub dhcp_pidfile: PathBuf,
}

pub struct DhcpServer {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    tool: Option<ToolInfo>,
    interface: String,
    ip: Ipv4Addr,
    prefix: u8,
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    domain: String,
    pxe_file: Option<String>,
    pidfile: PathBuf,
    config: Option<NamedTempFile>,
    daemon: Option<Daemon>,
    capture: OutputCapture,
    addresses_mutated: bool,
}

impl DhcpServer {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let (enablement, tool) = match probe::probe(runner.as_ref(), "dhcpd", "--version").await {
            Ok(tool) => {
                debug!("dhcpd: {}", tool.version);
                (Enablement::Capable, Some(tool))
            }
            Err(err) => {
                warn!("{err}");
                (Enablement::Incapable, None)
            }
        };
        Self {
            runner,
            enablement,
            tool,
            interface: String::new(),
            ip: Ipv4Addr::UNSPECIFIED,
            prefix: 24,
            range_start: Ipv4Addr::UNSPECIFIED,
            range_end: Ipv4Addr::UNSPECIFIED,
            domain: String::new(),
            pxe_file: None,
            pidfile: PathBuf::new(),
            config: None,
            daemon: None,
            capture: OutputCapture::new("DHCP"),
            addresses_mutated: false,
        }
    }

    /// Render the dhcpd configuration text.
    fn render_config(&self) -> Result<String> {
        let network = net::network_address(self.ip, self.prefix)?;
        let netmask = net::netmask(self.prefix)?;
        let broadcast = net::broadcast_address(self.ip, self.prefix)?;
        // PXE lines are kept in the template, commented out, when no
        // bootfile was given.
        let boot = if self.pxe_file.is_some() { "" } else { "# " };
        let pxe_file = self.pxe_file.as_deref().unwrap_or("");

        Ok(format!(
            "# generated by localnet on {stamp}\n\
             option domain-name \"{domain}\";\n\
             default-lease-time 600;\n\
             max-lease-time 7200;\n\
             log-facility local7;\n\
             {boot}allow booting;\n\
             subnet {network} netmask {netmask} {{\n\
             \x20   range {start} {end};\n\
             \x20   option broadcast-address {broadcast};\n\
             \x20   option routers {ip};\n\
             \x20   option domain-name-servers {ip};\n\
             \x20   default-lease-time 14400;\n\
             \x20   max-lease-time 28800;\n\
             \x20   {boot}filename \"{pxe_file}\";\n\
             \x20   {boot}next-server {ip};\n\
             }}\n",
            stamp = chrono::Local::now().to_rfc2822(),
            domain = self.domain,
            network = network,
            netmask = netmask,
            start = self.range_start,
            end = self.range_end,
            broadcast = broadcast,
            ip = self.ip,
            boot = boot,
            pxe_file = pxe_file,
        ))
    }

    async fn bring_up(&mut self) -> Result<()> {
        let rendered = self.render_config()?;
        let config = tempfile::Builder::new()
            .prefix("localnet_")
            .suffix(".conf")
            .tempfile()?;
        std::fs::write(config.path(), rendered)?;

        self.runner
            .run(&["ip", "link", "set", "up", "dev", &self.interface])
            .await?;
        self.runner
            .run(&["ip", "address", "flush", "dev", &self.interface])
            .await?;
        self.addresses_mutated = true;
        let address = format!("{}/{}", self.ip, self.prefix);
        self.runner
            .run(&["ip", "address", "add", &address, "dev", &self.interface])
            .await?;

        let Some(tool) = &self.tool else {
            return Err(LocalnetError::ToolMissing("dhcpd"));
        };
        let binary = tool.path.to_string_lossy().into_owned();
        let config_path = config.path().to_string_lossy().into_owned();
        let pidfile = self.pidfile.to_string_lossy().into_owned();
        let mut daemon = self.runner.spawn(&[
            &binary,
            "-4",
            "-f",
            "-cf",
            &config_path,
            "-pf",
            &pidfile,
            &self.interface,
        ])?;

        self.capture.register(&mut daemon);
        self.capture.start();
        self.daemon = Some(daemon);
        self.config = Some(config);
        Ok(())
    }

    /// Undo the interface mutations after a failed `bring_up`. The flushed
    /// addresses cannot be put back, but nothing of ours is left behind.
    async fn roll_back_partial(&mut self) {
        if self.addresses_mutated {
            if let Err(err) = self
                .runner
                .run(&["ip", "address", "flush", "dev", &self.interface])
                .await
            {
                warn!("could not flush {} after failed start: {err}", self.interface);
            }
            self.addresses_mutated = false;
        }
        self.config = None;
    }
}

#[cfg(test)]
impl DhcpServer {
    pub(crate) fn for_tests(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            enablement: Enablement::Capable,
            tool: Some(ToolInfo {
                path: "/usr/sbin/dhcpd".into(),
                version: "isc-dhcpd-4.4.3".into(),
            }),
            interface: String::new(),
            ip: Ipv4Addr::UNSPECIFIED,
            prefix: 24,
            range_start: Ipv4Addr::UNSPECIFIED,
            range_end: Ipv4Addr::UNSPECIFIED,
            domain: String::new(),
            pxe_file: None,
            pidfile: PathBuf::new(),
            config: None,
            daemon: None,
            capture: OutputCapture::new("DHCP"),
            addresses_mutated: false,
        }
    }
}

#[async_trait]
impl Module for DhcpServer {
    fn name(&self) -> &'static str {
        "DHCP"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        // DHCP is the one module the network cannot do without.
        self.enablement = self.enablement.decide(true);
        if self.enablement == Enablement::Incapable {
            return Err(LocalnetError::Config(
                "the DHCP module requires dhcpd to be installed and on $PATH".into(),
            ));
        }

        self.interface = settings.local_interface.clone();
        self.ip = settings.ip;
        self.prefix = settings.prefix;
        self.range_start = settings.range_start;
        self.range_end = settings.range_end;
        self.domain = settings.domain.clone();
        self.pxe_file = settings.pxe_file.clone();
        self.pidfile = settings.dhcp_pidfile.clone();
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }
        match self.bring_up().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.roll_back_partial().await;
                Err(err)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let mut first = None;

        if let Some(mut daemon) = self.daemon.take() {
            if let Err(err) = daemon.terminate().await {
                warn!("dhcpd did not shut down cleanly: {err}");
                first.get_or_insert(err);
            }
            self.capture.stop().await;
        }

        if self.addresses_mutated {
            if let Err(err) = self
                .runner
                .run(&["ip", "address", "flush", "dev", &self.interface])
                .await
            {
                warn!("could not flush {}: {err}", self.interface);
                first.get_or_insert(err);
            }
            self.addresses_mutated = false;
        }

        // Dropping the handle deletes the generated config file.
        self.config = None;

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn capture(&mut self) -> Option<&mut OutputCapture> {
        Some(&mut self.capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn server(runner: Arc<RecordingRunner>) -> DhcpServer {
        DhcpServer::for_tests(runner)
    }

    #[tokio::test]
    async fn rendered_config_describes_the_subnet() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner);
        module.configure(&Settings::for_tests()).unwrap();

        let config = module.render_config().unwrap();
        assert!(config.contains("subnet 10.10.10.0 netmask 255.255.255.0 {"));
        assert!(config.contains("range 10.10.10.100 10.10.10.200;"));
        assert!(config.contains("option routers 10.10.10.1;"));
        assert!(config.contains("option broadcast-address 10.10.10.255;"));
        assert!(config.contains("option domain-name \"localdomain\";"));
        // no PXE requested: boot options stay commented out
        assert!(config.contains("# allow booting;"));
        assert!(config.contains("# next-server 10.10.10.1;"));
    }

    #[tokio::test]
    async fn pxe_settings_enable_the_boot_options() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner);
        let settings = Settings {
            pxe_file: Some("pxelinux.0".into()),
            ..Settings::for_tests()
        };
        module.configure(&settings).unwrap();

        let config = module.render_config().unwrap();
        assert!(config.contains("\nallow booting;"));
        assert!(config.contains("filename \"pxelinux.0\";"));
        assert!(config.contains("next-server 10.10.10.1;"));
        assert!(!config.contains("# allow booting;"));
    }

    #[tokio::test]
    async fn start_prepares_the_interface_then_spawns_dhcpd() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "ip link set up dev veth0");
        assert_eq!(calls[1], "ip address flush dev veth0");
        assert_eq!(calls[2], "ip address add 10.10.10.1/24 dev veth0");
        assert!(calls[3].starts_with("/usr/sbin/dhcpd -4 -f -cf "));
        assert!(calls[3].ends_with("-pf /run/dhcpd.pid veth0"));
    }

    #[tokio::test]
    async fn stop_flushes_addresses_and_removes_the_config() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();

        let config_path = module.config.as_ref().unwrap().path().to_path_buf();
        assert!(config_path.exists());

        module.stop().await.unwrap();
        assert!(!config_path.exists());
        assert_eq!(runner.calls().last().unwrap(), "ip address flush dev veth0");
        assert!(!module.addresses_mutated);
    }

    #[tokio::test]
    async fn a_failed_start_rolls_back_the_interface_mutation() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail_on("ip address add 10.10.10.1/24 dev veth0");

        let mut module = server(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        assert!(module.start().await.is_err());

        // the partial mutation was undone and no daemon was spawned
        assert_eq!(runner.calls().last().unwrap(), "ip address flush dev veth0");
        assert!(module.daemon.is_none());
        assert!(module.config.is_none());

        // a subsequent stop has nothing left to do
        module.stop().await.unwrap();
        assert_eq!(runner.calls().len(), 4);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn configure_fails_when_dhcpd_is_missing() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = server(runner);
        module.enablement = Enablement::Incapable;
        module.tool = None;

        let err = module.configure(&Settings::for_tests()).unwrap_err();
        assert!(matches!(err, LocalnetError::Config(_)));
    }
}
