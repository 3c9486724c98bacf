//! Boot-transfer module: supervises a secured, chrooted in.tftpd serving the
//! PXE boot files.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use tracing::{debug, warn};

use crate::capture::OutputCapture;
use crate::error::{LocalnetError, Result};
use crate::modules::{Enablement, Module};
use crate::probe::{self, ToolInfo};
use crate::runner::{CommandRunner, Daemon};
use crate::settings::Settings;

/// Options contributed to the command line by this module.
#[derive(Args, Debug, Clone)]
pub struct TftpOptions {
    /// Path for the tftpd pidfile.
    #[arg(long = "tftp-pidfile", default_value = "/run/tftpd.pid")]
    pub tftp_pidfile: PathBuf,

    /// Root directory served over TFTP.
    #[arg(long = "tftp-rootdir", default_value = "/srv/tftp/")]
    pub tftp_rootdir: PathBuf,
}

pub struct TftpServer {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    tool: Option<ToolInfo>,
    rootdir: PathBuf,
    pidfile: PathBuf,
    daemon: Option<Daemon>,
    capture: OutputCapture,
}

impl TftpServer {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let (enablement, tool) = match probe::probe(runner.as_ref(), "in.tftpd", "--version").await
        {
            Ok(tool) => {
                debug!("in.tftpd: {}", tool.version);
                (Enablement::Capable, Some(tool))
            }
            Err(err) => {
                debug!("{err}");
                (Enablement::Incapable, None)
            }
        };
        Self {
            runner,
            enablement,
            tool,
            rootdir: PathBuf::new(),
            pidfile: PathBuf::new(),
            daemon: None,
            capture: OutputCapture::new("TFTP"),
        }
    }
}

#[async_trait]
impl Module for TftpServer {
    fn name(&self) -> &'static str {
        "TFTP"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        let requested = settings.pxe_file.is_some();
        if self.enablement == Enablement::Incapable && requested {
            warn!("PXE boot requested, but in.tftpd is unavailable; the TFTP module will not run");
        }
        self.enablement = self.enablement.decide(requested);
        self.rootdir = settings.tftp_root.clone();
        self.pidfile = settings.tftp_pidfile.clone();
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }

        let Some(tool) = &self.tool else {
            return Err(LocalnetError::ToolMissing("in.tftpd"));
        };
        let binary = tool.path.to_string_lossy().into_owned();
        let rootdir = self.rootdir.to_string_lossy().into_owned();
        let pidfile = self.pidfile.to_string_lossy().into_owned();
        let mut daemon =
            self.runner
                .spawn(&[&binary, "-L", "--secure", &rootdir, "--pidfile", &pidfile])?;

        self.capture.register(&mut daemon);
        self.capture.start();
        self.daemon = Some(daemon);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut daemon) = self.daemon.take() else {
            return Ok(());
        };
        let result = daemon.terminate().await;
        self.capture.stop().await;
        result
    }

    fn capture(&mut self) -> Option<&mut OutputCapture> {
        Some(&mut self.capture)
    }
}
