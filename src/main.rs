//! localnet - stand up a temporary local network and restore the host on
//! exit.
//!
//! Drives the system's own tools (ip, sysctl, nmcli, nft, firewall-cmd,
//! dhcpd, unbound, in.tftpd) as subprocesses; every change they make is
//! captured and rolled back when the run ends, interrupted or not.

mod adapters;
mod capture;
mod cli;
mod error;
mod interactive;
mod modules;
mod net;
mod orchestrator;
mod probe;
mod runner;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use modules::{DhcpServer, DnsServer, FirewallZones, InterfaceManager, Module, Nat, TftpServer};
use orchestrator::Orchestrator;
use runner::{CommandRunner, SystemRunner};
use settings::Preferences;

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if !is_root() {
        eprintln!("error: localnet must be run as root (sudo).");
        std::process::exit(1);
    }

    let mut prefs = Preferences::load();
    if cli.interactive {
        interactive::fill_missing(&mut cli, &prefs)
            .await
            .context("interactive setup failed")?;
    }

    let settings = cli.resolve(&prefs)?;
    prefs.remember(&settings);
    prefs.save();

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    // Probe order is irrelevant; start order is not. The interface must be
    // released by the connection manager before anything binds to it, the
    // address must exist before NAT scopes rules to it, and the transfer
    // server has no dependents, so it comes last.
    let modules: Vec<Box<dyn Module>> = vec![
        Box::new(InterfaceManager::probe(runner.clone()).await),
        Box::new(DhcpServer::probe(runner.clone()).await),
        Box::new(Nat::probe(runner.clone()).await),
        Box::new(FirewallZones::probe(runner.clone()).await),
        Box::new(DnsServer::probe(runner.clone()).await),
        Box::new(TftpServer::probe(runner.clone()).await),
    ];

    let mut orchestrator = Orchestrator::new(modules);
    orchestrator.configure(&settings)?;
    orchestrator.run().await?;
    Ok(())
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
