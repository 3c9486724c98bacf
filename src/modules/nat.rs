//! NAT module: enables IP forwarding and bridges the local subnet to the
//! internet-facing interface through a temporary nftables table.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LocalnetError, Result};
use crate::modules::{Enablement, Module};
use crate::net;
use crate::probe;
use crate::runner::CommandRunner;
use crate::settings::Settings;

pub struct Nat {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    local_interface: String,
    internet_interface: Option<String>,
    /// Subnet the masquerade rule is scoped to, e.g. "10.10.10.0/24".
    subnet: String,
    /// `sysctl net.ipv4.ip_forward` output captured before `start`.
    sysctl_backup: Option<String>,
}

impl Nat {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let enablement = match probe::probe(runner.as_ref(), "nft", "-v").await {
            Ok(tool) => {
                debug!("nft: {}", tool.version);
                Enablement::Capable
            }
            Err(err) => {
                warn!("{err}");
                Enablement::Incapable
            }
        };
        Self {
            runner,
            enablement,
            local_interface: String::new(),
            internet_interface: None,
            subnet: String::new(),
            sysctl_backup: None,
        }
    }

    async fn apply(&mut self) -> Result<()> {
        let Some(internet) = self.internet_interface.clone() else {
            return Err(LocalnetError::Config(
                "NAT started without an internet interface".into(),
            ));
        };

        // Capture the forwarding flag before touching it; the host's prior
        // value is unknown and must come back on stop.
        let backup = self
            .runner
            .output(&["sysctl", "net.ipv4.ip_forward"])
            .await?
            .trim()
            .to_string();
        self.sysctl_backup = Some(backup);

        self.runner.run(&["sysctl", "net.ipv4.ip_forward=1"]).await?;

        self.runner.run(&["nft", "add table ip localnet"]).await?;
        self.runner
            .run(&[
                "nft",
                "add chain ip localnet forward { type filter hook forward priority -10 ; }",
            ])
            .await?;
        self.runner
            .run(&[
                "nft",
                "add rule localnet forward ct state vmap \
                 { established : accept, related : accept, invalid : drop }",
            ])
            .await?;
        let accept = format!(
            "add rule localnet forward iifname {} accept",
            self.local_interface
        );
        self.runner.run(&["nft", &accept]).await?;
        self.runner
            .run(&[
                "nft",
                "add chain ip localnet prerouting { type nat hook prerouting priority 90 ; }",
            ])
            .await?;
        self.runner
            .run(&[
                "nft",
                "add chain ip localnet postrouting { type nat hook postrouting priority 90 ; }",
            ])
            .await?;
        let masquerade = format!(
            "add rule localnet postrouting ip saddr {} oifname {} masquerade",
            self.subnet, internet
        );
        self.runner.run(&["nft", &masquerade]).await?;
        Ok(())
    }

    /// Undo a partially applied `start`: put the forwarding flag back and
    /// drop whatever fragment of the table exists.
    async fn roll_back_partial(&mut self) {
        if let Some(backup) = self.sysctl_backup.take() {
            let setting = backup.replace(' ', "");
            if let Err(err) = self.runner.run(&["sysctl", &setting]).await {
                warn!("could not restore {setting}: {err}");
            }
        }
        if let Err(err) = self
            .runner
            .run(&["nft", "delete", "table", "ip", "localnet"])
            .await
        {
            debug!("no nft table to remove after failed start: {err}");
        }
    }

    async fn teardown_step(&self, argv: &[&str], first: &mut Option<LocalnetError>) {
        if let Err(err) = self.runner.run(argv).await {
            warn!("NAT teardown step failed: {err}");
            first.get_or_insert(err);
        }
    }
}

#[async_trait]
impl Module for Nat {
    fn name(&self) -> &'static str {
        "NAT"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        if self.enablement == Enablement::Incapable && settings.internet_access {
            warn!("NAT module requested to bridge interfaces, but it will not run");
        }
        self.enablement = self.enablement.decide(settings.internet_access);
        self.local_interface = settings.local_interface.clone();
        self.internet_interface = settings.internet_interface.clone();
        self.subnet = net::subnet_spec(settings.ip, settings.prefix)?;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }
        match self.apply().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.roll_back_partial().await;
                Err(err)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        // Only undo what start actually captured.
        let Some(backup) = self.sysctl_backup.take() else {
            return Ok(());
        };

        let mut first = None;

        let setting = backup.replace(' ', "");
        self.teardown_step(&["sysctl", &setting], &mut first).await;

        self.teardown_step(&["nft", "flush", "chain", "localnet", "postrouting"], &mut first)
            .await;
        self.teardown_step(&["nft", "flush", "chain", "localnet", "forward"], &mut first)
            .await;
        self.teardown_step(
            &["nft", "delete", "chain", "ip", "localnet", "prerouting"],
            &mut first,
        )
        .await;
        self.teardown_step(
            &["nft", "delete", "chain", "ip", "localnet", "postrouting"],
            &mut first,
        )
        .await;
        self.teardown_step(
            &["nft", "delete", "chain", "ip", "localnet", "forward"],
            &mut first,
        )
        .await;
        self.teardown_step(&["nft", "delete", "table", "ip", "localnet"], &mut first)
            .await;

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn nat(runner: Arc<RecordingRunner>) -> Nat {
        Nat {
            runner,
            enablement: Enablement::Capable,
            local_interface: String::new(),
            internet_interface: None,
            subnet: String::new(),
            sysctl_backup: None,
        }
    }

    #[tokio::test]
    async fn start_then_stop_restores_the_captured_forwarding_flag() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("sysctl net.ipv4.ip_forward", "net.ipv4.ip_forward = 0\n");

        let mut module = nat(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], "sysctl net.ipv4.ip_forward");
        assert_eq!(calls[1], "sysctl net.ipv4.ip_forward=1");
        assert!(calls.contains(
            &"nft add rule localnet postrouting ip saddr 10.10.10.0/24 oifname eth0 masquerade"
                .to_string()
        ));
        // the captured value, not a default, comes back
        assert!(calls.contains(&"sysctl net.ipv4.ip_forward=0".to_string()));
        assert_eq!(calls.last().unwrap(), "nft delete table ip localnet");
    }

    #[tokio::test]
    async fn disabled_without_internet_interface() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = nat(runner.clone());

        let settings = Settings {
            internet_interface: None,
            internet_access: false,
            ..Settings::for_tests()
        };
        module.configure(&settings).unwrap();
        assert_eq!(module.enablement(), Enablement::Disabled);

        // start and stop perform zero rule mutations and zero sysctl reads
        module.start().await.unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn a_failed_rule_insertion_rolls_back_forwarding() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("sysctl net.ipv4.ip_forward", "net.ipv4.ip_forward = 0\n");
        runner.fail_on("nft add table ip localnet");

        let mut module = nat(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        assert!(module.start().await.is_err());

        let calls = runner.calls();
        assert!(calls.contains(&"sysctl net.ipv4.ip_forward=0".to_string()));
        assert_eq!(calls.last().unwrap(), "nft delete table ip localnet");
        assert!(module.sysctl_backup.is_none());
    }

    #[tokio::test]
    async fn teardown_continues_past_failing_steps_and_reports_the_first() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("sysctl net.ipv4.ip_forward", "net.ipv4.ip_forward = 1\n");
        runner.fail_on("nft flush chain localnet postrouting");

        let mut module = nat(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();

        let err = module.stop().await.unwrap_err();
        assert!(matches!(err, LocalnetError::CommandFailed { .. }));
        // the remaining steps still ran
        assert_eq!(runner.calls().last().unwrap(), "nft delete table ip localnet");
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = nat(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
