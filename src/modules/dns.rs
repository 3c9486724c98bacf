//! DNS module: supervises an unbound instance that resolves for the local
//! subnet only, independently from the system resolver configuration.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::capture::OutputCapture;
use crate::error::{LocalnetError, Result};
use crate::modules::{Enablement, Module};
use crate::net;
use crate::probe::{self, ToolInfo};
use crate::runner::{CommandRunner, Daemon};
use crate::settings::Settings;

pub struct DnsServer {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    tool: Option<ToolInfo>,
    ip: Ipv4Addr,
    prefix: u8,
    config: Option<NamedTempFile>,
    daemon: Option<Daemon>,
    capture: OutputCapture,
}

impl DnsServer {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let (enablement, tool) = match probe::probe(runner.as_ref(), "unbound", "-V").await {
            Ok(tool) => match parse_unbound_version(&tool.version) {
                Some(parsed) => {
                    debug!("unbound: {parsed}");
                    (Enablement::Capable, Some(tool))
                }
                None => {
                    warn!("the DNS module could not detect the unbound version");
                    (Enablement::Incapable, None)
                }
            },
            Err(err) => {
                warn!("{err}");
                (Enablement::Incapable, None)
            }
        };
        Self {
            runner,
            enablement,
            tool,
            ip: Ipv4Addr::UNSPECIFIED,
            prefix: 24,
            config: None,
            daemon: None,
            capture: OutputCapture::new("DNS"),
        }
    }

    /// Render the unbound configuration text: listen on the gateway address,
    /// answer the local subnet only.
    fn render_config(&self) -> Result<String> {
        let network = net::network_address(self.ip, self.prefix)?;
        Ok(format!(
            "# generated by localnet on {stamp}\n\
             server:\n\
             \x20   verbosity: 1\n\
             \x20   interface: {ip}\n\
             \x20   access-control: {network}/{prefix} allow\n",
            stamp = chrono::Local::now().to_rfc2822(),
            ip = self.ip,
            network = network,
            prefix = self.prefix,
        ))
    }
}

fn parse_unbound_version(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix("Version") {
            let version: String = rest
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if !version.is_empty() {
                return Some(version);
            }
        }
    }
    None
}

#[async_trait]
impl Module for DnsServer {
    fn name(&self) -> &'static str {
        "DNS"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        if self.enablement == Enablement::Incapable && settings.internet_access {
            warn!("DNS module requested, but it will not run");
        }
        self.enablement = self.enablement.decide(settings.internet_access);
        self.ip = settings.ip;
        self.prefix = settings.prefix;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }

        let rendered = self.render_config()?;
        let config = tempfile::Builder::new()
            .prefix("localnet_")
            .suffix(".conf")
            .tempfile()?;
        std::fs::write(config.path(), rendered)?;

        let Some(tool) = &self.tool else {
            return Err(LocalnetError::ToolMissing("unbound"));
        };
        let binary = tool.path.to_string_lossy().into_owned();
        let config_path = config.path().to_string_lossy().into_owned();
        let mut daemon = self.runner.spawn(&[&binary, "-d", "-c", &config_path])?;

        self.capture.register(&mut daemon);
        self.capture.start();
        self.daemon = Some(daemon);
        self.config = Some(config);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut daemon) = self.daemon.take() else {
            return Ok(());
        };
        let result = daemon.terminate().await;
        self.capture.stop().await;
        self.config = None;
        result
    }

    fn capture(&mut self) -> Option<&mut OutputCapture> {
        Some(&mut self.capture)
    }
}
