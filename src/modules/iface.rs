//! Connection-manager module: keeps NetworkManager's hands off the local
//! interface while the temporary network is up.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use tracing::{debug, info};

use crate::error::Result;
use crate::modules::{Enablement, Module};
use crate::probe;
use crate::runner::CommandRunner;
use crate::settings::Settings;

/// Options contributed to the command line by this module.
#[derive(Args, Debug, Clone, Default)]
pub struct IfaceOptions {
    /// Do not configure NetworkManager.
    #[arg(long = "no-nm")]
    pub no_nm: bool,
}

pub struct InterfaceManager {
    runner: Arc<dyn CommandRunner>,
    enablement: Enablement,
    interface: String,
    /// NM-MANAGED value captured before `start`, "yes" or "no".
    previous_managed: Option<String>,
}

impl InterfaceManager {
    pub async fn probe(runner: Arc<dyn CommandRunner>) -> Self {
        let enablement = match probe::probe(runner.as_ref(), "nmcli", "--version").await {
            Ok(tool) => {
                debug!("nmcli: {}", tool.version);
                Enablement::Capable
            }
            Err(err) => {
                info!("{err}; assuming --no-nm");
                Enablement::Incapable
            }
        };
        Self {
            runner,
            enablement,
            interface: String::new(),
            previous_managed: None,
        }
    }
}

#[cfg(test)]
impl InterfaceManager {
    pub(crate) fn for_tests(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            enablement: Enablement::Capable,
            interface: String::new(),
            previous_managed: None,
        }
    }
}

#[async_trait]
impl Module for InterfaceManager {
    fn name(&self) -> &'static str {
        "IFACE"
    }

    fn enablement(&self) -> Enablement {
        self.enablement
    }

    fn configure(&mut self, settings: &Settings) -> Result<()> {
        self.interface = settings.local_interface.clone();
        self.enablement = self.enablement.decide(settings.manage_interface);
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        if !self.enablement.is_active() {
            return Ok(());
        }

        // The host's prior managed flag is unknown; capture it so stop can
        // restore exactly that value.
        let managed = self
            .runner
            .output(&["nmcli", "-g", "GENERAL.NM-MANAGED", "dev", "show", &self.interface])
            .await?;
        let previous = if managed.trim().eq_ignore_ascii_case("no") {
            "no"
        } else {
            "yes"
        };

        self.runner
            .run(&["nmcli", "dev", "set", &self.interface, "managed", "no"])
            .await?;
        self.previous_managed = Some(previous.to_string());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(previous) = self.previous_managed.take() else {
            return Ok(());
        };
        self.runner
            .run(&["nmcli", "dev", "set", &self.interface, "managed", &previous])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;

    fn manager(runner: Arc<RecordingRunner>) -> InterfaceManager {
        InterfaceManager::for_tests(runner)
    }

    #[tokio::test]
    async fn start_then_stop_restores_the_captured_managed_flag() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("nmcli -g GENERAL.NM-MANAGED dev show veth0", "yes\n");

        let mut module = manager(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "nmcli -g GENERAL.NM-MANAGED dev show veth0".to_string(),
                "nmcli dev set veth0 managed no".to_string(),
                "nmcli dev set veth0 managed yes".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn a_previously_unmanaged_interface_stays_unmanaged() {
        let runner = Arc::new(RecordingRunner::new());
        runner.provide_output("nmcli -g GENERAL.NM-MANAGED dev show veth0", "no\n");

        let mut module = manager(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.start().await.unwrap();
        module.stop().await.unwrap();

        assert_eq!(
            runner.calls().last().unwrap(),
            "nmcli dev set veth0 managed no"
        );
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = manager(runner.clone());
        module.configure(&Settings::for_tests()).unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn no_nm_disables_the_module() {
        let runner = Arc::new(RecordingRunner::new());
        let mut module = manager(runner.clone());

        let settings = Settings {
            manage_interface: false,
            ..Settings::for_tests()
        };
        module.configure(&settings).unwrap();
        assert_eq!(module.enablement(), Enablement::Disabled);

        module.start().await.unwrap();
        module.stop().await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
