//! Drives the modules through their shared lifecycle.
//!
//! One sequential control flow owns every module: configure all, start in
//! dependency order, poll-and-flush while running, and stop in exact reverse
//! order on the way out - interrupted or not. Teardown never stops early: a
//! failing module is reported and the remaining modules are still stopped.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::modules::Module;

/// Delay between output-flush cycles while running.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle phase of the whole network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Every module's tool probe has run; availability is fixed.
    Probed,
    /// Every module has been configured; some may have ended up disabled.
    Configured,
    Running,
    Stopping,
}

pub struct Orchestrator {
    modules: Vec<Box<dyn Module>>,
    phase: Phase,
}

impl Orchestrator {
    /// Takes the modules in start order; they are stopped in reverse.
    pub fn new(modules: Vec<Box<dyn Module>>) -> Self {
        Self {
            modules,
            phase: Phase::Probed,
        }
    }

    /// Configure every module from the resolved settings. A configuration
    /// error aborts before any OS state has been touched.
    pub fn configure(&mut self, settings: &crate::settings::Settings) -> Result<()> {
        for module in &mut self.modules {
            if let Err(err) = module.configure(settings) {
                error!("[{}] configure failed: {err}", module.name());
                return Err(err);
            }
            debug!("[{}] configured: {:?}", module.name(), module.enablement());
        }
        self.phase = Phase::Configured;
        Ok(())
    }

    /// Run until interrupted: start all modules, poll their output, tear
    /// everything down on Ctrl-C. Returns whether teardown was clean.
    pub async fn run(&mut self) -> Result<bool> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("could not listen for Ctrl-C: {err}");
            }
        })
        .await
    }

    /// Like [`run`](Self::run), but ends the running phase when `shutdown`
    /// resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<bool>
    where
        F: Future<Output = ()>,
    {
        self.start_all().await?;
        self.phase = Phase::Running;
        info!("local network is up; press Ctrl-C to tear it down");

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                _ = ticker.tick() => self.flush_output(),
            }
        }

        let clean = self.stop_all().await;
        // Final flush so no trailing daemon output is lost.
        self.flush_output();
        self.phase = Phase::Idle;
        if !clean {
            warn!("shutdown did not complete cleanly; the host may need manual cleanup");
        }
        Ok(clean)
    }

    /// Start modules in dependency order. If one fails, the modules already
    /// started are stopped again in reverse order and the error propagates;
    /// later modules are never started.
    async fn start_all(&mut self) -> Result<()> {
        for index in 0..self.modules.len() {
            if let Err(err) = self.modules[index].start().await {
                error!("[{}] start failed: {err}", self.modules[index].name());
                self.phase = Phase::Stopping;
                for module in self.modules[..index].iter_mut().rev() {
                    if let Err(stop_err) = module.stop().await {
                        error!(
                            "[{}] rollback failed: {stop_err}; manual cleanup may be required",
                            module.name()
                        );
                    }
                }
                self.flush_output();
                self.phase = Phase::Idle;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop every module in reverse start order. Failures are logged and do
    /// not keep the remaining modules from stopping.
    async fn stop_all(&mut self) -> bool {
        self.phase = Phase::Stopping;
        let mut clean = true;
        for module in self.modules.iter_mut().rev() {
            if let Err(err) = module.stop().await {
                clean = false;
                error!(
                    "[{}] shutdown step failed: {err}; manual cleanup may be required",
                    module.name()
                );
            }
        }
        clean
    }

    fn flush_output(&mut self) {
        for module in &mut self.modules {
            if let Some(capture) = module.capture() {
                capture.flush();
            }
        }
    }
}
