//! Firewall-zone module: makes the host firewall let the bridged traffic
//! through, by moving the local interface into the internet interface's zone
//! and enabling forwarding and DNS where they are not already allowed.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use tracing::{debug, info, warn};

use crate::error::{LocalnetError, Result};
use crate::modules::{Enablement, Module};
use crate::probe;
use crate::runner::CommandRunner;
use crate::settings::Settings;

/// Firewall command tools this module knows how to drive.
const SUPPORTED: &[&str] = &["firewall-cmd"];

/// Options contributed to the command line by this module.
#[derive(Args, Debug, Clone, Default)]
pub struct FirewallOptions {
    /// Firewall tool to configure; detected automatically by default.
    #[arg(long = "firewall-type")]
    pub firewall_type: Option<String>,
}

/// Everything `start` changed, captured for symmetric restoration.
struct ZoneRollback {
    internet_zone: String,
    /// Zone the local interface was in before, if any.
    local_zone: Option<String>,
    zone_moved: bool,
    forward_added: bool,
    dns_added: bool,
}

pub struct FirewallZones {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    detected: Vec<&'static str>,
    firewall_type: Option<&'static str>,
    local_interface: String,
    internet_interface: Option<String>,
    rollback: Option<ZoneRollback>,
}

impl FirewallZones {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let mut detected = Vec::new();
        for &tool in SUPPORTED {
            match probe::probe(runner.as_ref(), tool, "--version").await {
                Ok(info) => {
                    debug!("{tool}: {}", info.version);
                    detected.push(tool);
                }
                Err(err) => debug!("{err}"),
            }
        }

        let enablement = if detected.is_empty() {
            info!("no firewall cmd tool found, this may still be ok; the firewall module will not run");
            Enablement::Incapable
        } else {
            Enablement::Capable
        };

        Self {
            runner,
            enablement,
            detected,
            firewall_type: None,
            local_interface: String::new(),
            internet_interface: None,
            rollback: None,
        }
    }

    async fn zone_of(&self, interface: &str) -> Option<String> {
        let query = format!("--get-zone-of-interface={interface}");
        self.runner
            .output(&["firewall-cmd", &query])
            .await
            .ok()
            .map(|zone| zone.trim().to_string())
            .filter(|zone| !zone.is_empty())
    }

    async fn apply(&mut self) -> Result<()> {
        let Some(internet) = self.internet_interface.clone() else {
            return Ok(());
        };

        let Some(internet_zone) = self.zone_of(&internet).await else {
            warn!("{internet} is not assigned to a firewall zone; leaving the firewall untouched");
            return Ok(());
        };
        let local_interface = self.local_interface.clone();
        let local_zone = self.zone_of(&local_interface).await;

        self.rollback = Some(ZoneRollback {
            internet_zone: internet_zone.clone(),
            local_zone: local_zone.clone(),
            zone_moved: false,
            forward_added: false,
            dns_added: false,
        });

        let add_local = format!("--add-interface={}", self.local_interface);
        let remove_local = format!("--remove-interface={}", self.local_interface);
        let to_internet_zone = format!("--zone={internet_zone}");

        if local_zone.as_deref() != Some(internet_zone.as_str()) {
            if let Some(zone) = local_zone.as_deref() {
                let from_zone = format!("--zone={zone}");
                self.runner
                    .run(&["firewall-cmd", &from_zone, &remove_local])
                    .await?;
                self.mark(|record| record.zone_moved = true);
                self.runner
                    .run(&["firewall-cmd", &to_internet_zone, &add_local])
                    .await?;
            } else {
                self.runner
                    .run(&["firewall-cmd", &to_internet_zone, &add_local])
                    .await?;
                self.mark(|record| record.zone_moved = true);
            }
        }

        // A failing query means the feature is off; remember what we add so
        // only that gets removed again.
        if self
            .runner
            .run(&["firewall-cmd", &to_internet_zone, "--query-forward"])
            .await
            .is_err()
        {
            self.runner
                .run(&["firewall-cmd", &to_internet_zone, "--add-forward"])
                .await?;
            self.mark(|record| record.forward_added = true);
        }

        if self
            .runner
            .run(&["firewall-cmd", &to_internet_zone, "--query-service=dns"])
            .await
            .is_err()
        {
            self.runner
                .run(&["firewall-cmd", &to_internet_zone, "--add-service=dns"])
                .await?;
            self.mark(|record| record.dns_added = true);
        }

        Ok(())
    }

    fn mark(&mut self, update: impl FnOnce(&mut ZoneRollback)) {
        if let Some(record) = &mut self.rollback {
            update(record);
        }
    }

    /// Reverse everything the rollback record says was applied.
    async fn undo(&mut self) -> Result<()> {
        let Some(record) = self.rollback.take() else {
            return Ok(());
        };

        let mut first = None;
        let internet_zone = format!("--zone={}", record.internet_zone);
        let add_local = format!("--add-interface={}", self.local_interface);
        let remove_local = format!("--remove-interface={}", self.local_interface);

        if record.dns_added {
            self.step(&["firewall-cmd", &internet_zone, "--remove-service=dns"], &mut first)
                .await;
        }
        if record.forward_added {
            self.step(&["firewall-cmd", &internet_zone, "--remove-forward"], &mut first)
                .await;
        }
        if record.zone_moved {
            self.step(&["firewall-cmd", &internet_zone, &remove_local], &mut first)
                .await;
            if let Some(zone) = &record.local_zone {
                let original_zone = format!("--zone={zone}");
                self.step(&["firewall-cmd", &original_zone, &add_local], &mut first)
                    .await;
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn step(&self, argv: &[&str], first: &mut Option<LocalnetError>) {
        if let Err(err) = self.runner.run(argv).await {
            warn!("firewall teardown step failed: {err}");
            first.get_or_insert(err);
        }
    }
}

#[async_trait]
impl Module for FirewallZones {
    fn name(&self) -> &'static str {
        "FIREWALL"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        if let Some(requested) = settings.firewall_type.as_deref() {
            if !SUPPORTED.iter().any(|tool| *tool == requested) {
                return Err(LocalnetError::Config(format!(
                    "unrecognized firewall type \"{requested}\""
                )));
            }
            if !self.detected.iter().any(|tool| *tool == requested) {
                return Err(LocalnetError::Config(format!(
                    "firewall type \"{requested}\" is not installed"
                )));
            }
            self.firewall_type = SUPPORTED.iter().copied().find(|tool| *tool == requested);
        } else {
            match self.detected.as_slice() {
                [] => {}
                [only] => self.firewall_type = Some(*only),
                _ => {
                    return Err(LocalnetError::Config(
                        "multiple firewall cmd tools installed; pick one with --firewall-type"
                            .into(),
                    ))
                }
            }
        }

        self.local_interface = settings.local_interface.clone();
        self.internet_interface = settings.internet_interface.clone();
        self.enablement = self
            .enablement
            .decide(settings.internet_access && self.firewall_type.is_some());
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }
        match self.firewall_type {
            Some("firewall-cmd") => match self.apply().await {
                Ok(()) => Ok(()),
                Err(err) => {
                    if let Err(undo_err) = self.undo().await {
                        warn!("rollback after failed start was incomplete: {undo_err}");
                    }
                    Err(err)
                }
            },
            _ => Ok(()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }
        self.undo().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn firewall(runner: Arc<RecordingRunner>) -> FirewallZones {
        FirewallZones {
            runner,
            enablement: Enablement::Capable,
            detected: vec!["firewall-cmd"],
            firewall_type: None,
            local_interface: String::new(),
            internet_interface: None,
            rollback: None,
        }
    }

    fn zone_fixture(runner: &RecordingRunner) {
        runner.provide_output("firewall-cmd --get-zone-of-interface=eth0", "public\n");
        runner.provide_output("firewall-cmd --get-zone-of-interface=veth0", "trusted\n");
        // forward and dns are not yet allowed in the zone
        runner.fail_on("firewall-cmd --zone=public --query-forward");
        runner.fail_on("firewall-cmd --zone=public --query-service=dns");
    }

    #[tokio::test]
    async fn start_then_stop_restores_zone_forward_and_dns() {
        let runner = Arc::new(RecordingRunner::new());
        zone_fixture(&runner);

        let mut module = firewall(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        let calls = runner.calls();
        let expected = [
            "firewall-cmd --get-zone-of-interface=eth0",
            "firewall-cmd --get-zone-of-interface=veth0",
            "firewall-cmd --zone=trusted --remove-interface=veth0",
            "firewall-cmd --zone=public --add-interface=veth0",
            "firewall-cmd --zone=public --query-forward",
            "firewall-cmd --zone=public --add-forward",
            "firewall-cmd --zone=public --query-service=dns",
            "firewall-cmd --zone=public --add-service=dns",
            // teardown, exact reverse of what was added
            "firewall-cmd --zone=public --remove-service=dns",
            "firewall-cmd --zone=public --remove-forward",
            "firewall-cmd --zone=public --remove-interface=veth0",
            "firewall-cmd --zone=trusted --add-interface=veth0",
        ];
        assert_eq!(
            calls,
            expected.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn already_allowed_features_are_left_alone() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("firewall-cmd --get-zone-of-interface=eth0", "public\n");
        runner.provide_output("firewall-cmd --get-zone-of-interface=veth0", "public\n");
        // queries succeed: forward and dns already on, same zone

        let mut module = firewall(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        let calls = runner.calls();
        assert!(!calls.iter().any(|call| call.contains("--add-")));
        assert!(!calls.iter().any(|call| call.contains("--remove-")));
    }

    #[tokio::test]
    async fn unzoned_internet_interface_leaves_the_firewall_untouched() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail_on("firewall-cmd --get-zone-of-interface=eth0");

        let mut module = firewall(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_firewall_type_is_a_config_error() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = firewall(runner);

        let settings = Settings {
            firewall_type: Some("ufw".into()),
            ..Settings::for_tests()
        };
        let err = module.configure(&settings).unwrap_err();
        assert!(matches!(err, LocalnetError::Config(_)));
    }

    #[tokio::test]
    async fn disabled_without_internet_access() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = firewall(runner.clone());

        let settings = Settings {
            internet_interface: None,
            internet_access: false,
            ..Settings::for_tests()
        };
        module.configure(&settings).unwrap();
        assert_eq!(module.enablement(), Enablement::Disabled);

        module.start().await.unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
