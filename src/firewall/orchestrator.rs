//! Firewall orchestrator
//!
//! Installs NAT rules by running a privileged helper container that joins the
//! target container's network namespace. One helper runs one script; the
//! helper is always removed afterwards.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::rules::{container_script, self_redirect_script, Script};
use crate::config::FirewallConfig;
use crate::error::{FirewallError, RuntimeError};
use crate::runtime::{short_id, ContainerRuntime, HelperSpec, NetworkMode, SelfDescriptor};

/// What a setup call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// A helper ran and exited 0; `ports` are the DNAT'ed ports
    Configured { ports: Vec<u16> },
    /// The container is not on the bridge network and was left alone
    Skipped { network_mode: NetworkMode },
}

/// Per-container setup counters
#[derive(Debug, Default)]
pub struct SetupStats {
    configured: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl SetupStats {
    /// Record one setup result
    pub fn record(&self, result: &Result<SetupOutcome, FirewallError>) {
        let counter = match result {
            Ok(SetupOutcome::Configured { .. }) => &self.configured,
            Ok(SetupOutcome::Skipped { .. }) => &self.skipped,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn snapshot(&self) -> SetupStatsSnapshot {
        SetupStatsSnapshot {
            configured: self.configured.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time setup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStatsSnapshot {
    /// Containers whose rules were installed
    pub configured: u64,
    /// Containers left untouched
    pub skipped: u64,
    /// Setups that failed
    pub failed: u64,
}

impl SetupStatsSnapshot {
    /// Total setups attempted
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.configured + self.skipped + self.failed
    }
}

/// Runs firewall setup for the proxy and for every container it serves
pub struct FirewallOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Arc<SelfDescriptor>,
    listen_port: u16,
    helper_image: String,
    helper_timeout: Duration,
    setup_limit: Arc<Semaphore>,
    stats: SetupStats,
}

impl FirewallOrchestrator {
    /// Create an orchestrator.
    ///
    /// Helpers run `helper_image` if given, otherwise the proxy's own image.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        proxy: Arc<SelfDescriptor>,
        listen_port: u16,
        config: &FirewallConfig,
        helper_image: Option<String>,
    ) -> Self {
        let helper_image = helper_image.unwrap_or_else(|| proxy.image.clone());
        Self {
            runtime,
            proxy,
            listen_port,
            helper_image,
            helper_timeout: config.helper_timeout(),
            setup_limit: Arc::new(Semaphore::new(config.max_concurrent_setups)),
            stats: SetupStats::default(),
        }
    }

    /// The proxy's own descriptor
    #[must_use]
    pub fn proxy(&self) -> &SelfDescriptor {
        &self.proxy
    }

    /// Per-container setup counters
    #[must_use]
    pub const fn stats(&self) -> &SetupStats {
        &self.stats
    }

    /// Install the inbound redirect in the proxy's own namespace.
    ///
    /// # Errors
    ///
    /// Any failure here leaves the proxy unreachable and should be treated
    /// as fatal.
    pub async fn setup_self(&self) -> Result<SetupOutcome, FirewallError> {
        if !self.proxy.network_mode.is_bridge() {
            info!(
                "Proxy network mode is {}, not installing inbound redirect",
                self.proxy.network_mode
            );
            return Ok(SetupOutcome::Skipped {
                network_mode: self.proxy.network_mode.clone(),
            });
        }

        let script = self_redirect_script(self.listen_port);
        self.run_helper(&self.proxy.container_id, &script).await?;

        info!("Inbound redirect to port {} installed", self.listen_port);
        Ok(SetupOutcome::Configured { ports: Vec::new() })
    }

    /// Install DNAT rules for every port `id` declares.
    ///
    /// The outcome is logged and counted in [`SetupStats`].
    ///
    /// # Errors
    ///
    /// Inspect, helper or exit failures. They only affect this container.
    pub async fn setup_container(&self, id: &str) -> Result<SetupOutcome, FirewallError> {
        let _permit = self.setup_limit.acquire().await.ok();

        let result = self.configure(id).await;
        self.stats.record(&result);

        match &result {
            Ok(SetupOutcome::Configured { ports }) => {
                info!("Configured container {} for ports {:?}", short_id(id), ports);
            }
            Ok(SetupOutcome::Skipped { network_mode }) => {
                debug!("Skipped container {} (network mode {})", short_id(id), network_mode);
            }
            Err(e) => warn!("Setup failed for container {}: {}", short_id(id), e),
        }
        result
    }

    /// Run [`Self::setup_container`] on its own task
    pub fn spawn_setup(self: &Arc<Self>, id: String) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Logged and counted inside
            let _ = this.setup_container(&id).await;
        })
    }

    async fn configure(&self, id: &str) -> Result<SetupOutcome, FirewallError> {
        let desc = self.runtime.inspect_container(id).await?;

        if !desc.network_mode.is_bridge() {
            return Ok(SetupOutcome::Skipped {
                network_mode: desc.network_mode,
            });
        }

        let proxy_ip = self
            .proxy
            .ip_address
            .ok_or_else(|| FirewallError::MissingProxyAddress {
                container: self.proxy.container_id.clone(),
            })?;

        let ports: BTreeSet<u16> = desc.connect_ports().into_keys().collect();
        let script = container_script(&ports, proxy_ip);
        self.run_helper(&desc.id, &script).await?;

        Ok(SetupOutcome::Configured {
            ports: ports.into_iter().collect(),
        })
    }

    async fn run_helper(&self, target: &str, script: &Script) -> Result<(), FirewallError> {
        let spec = HelperSpec::shell_in_namespace_of(target, &self.helper_image, script.render());
        debug!("Running helper in {}: {}", short_id(target), script.render());

        let helper_id = self.runtime.create_container(&spec).await?;

        let run = timeout(self.helper_timeout, async {
            self.runtime.start_container(&helper_id).await?;
            let code = self.runtime.wait_container(&helper_id).await?;
            Ok::<_, RuntimeError>(code)
        })
        .await;

        if let Err(e) = self.runtime.remove_container(&helper_id).await {
            debug!("Failed to remove helper {}: {}", short_id(&helper_id), e);
        }

        match run {
            Err(_) => Err(FirewallError::HelperTimeout {
                container: target.to_string(),
                timeout_secs: self.helper_timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(code)) => Err(FirewallError::HelperExit {
                container: target.to_string(),
                code,
            }),
        }
    }
}

impl std::fmt::Debug for FirewallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallOrchestrator")
            .field("proxy", &self.proxy)
            .field("listen_port", &self.listen_port)
            .field("helper_image", &self.helper_image)
            .finish_non_exhaustive()
    }
}
