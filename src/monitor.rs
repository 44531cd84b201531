//! Container lifecycle monitor
//!
//! Keeps NAT rules in step with the container population. On every
//! (re)subscription to the runtime's event stream the monitor scans all
//! existing containers and sets each one up; afterwards every `create` event
//! triggers setup for the new container. Lifecycle events also invalidate
//! the source IP cache.
//!
//! When the event stream ends or fails the monitor resubscribes with
//! exponential backoff. Containers created during the gap are picked up by
//! the rescan.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::RuntimeError;
use crate::firewall::FirewallOrchestrator;
use crate::resolver::SourceCache;
use crate::runtime::{ContainerRuntime, EventAction, EventStream, RuntimeEvent};

/// Watches container lifecycle events and drives per-container setup
pub struct LifecycleMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    firewall: Arc<FirewallOrchestrator>,
    cache: Option<Arc<SourceCache>>,
    config: MonitorConfig,
}

impl LifecycleMonitor {
    /// Create a monitor
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        firewall: Arc<FirewallOrchestrator>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            runtime,
            firewall,
            cache: None,
            config: config.clone(),
        }
    }

    /// Invalidate `cache` from lifecycle events
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run until the reconnect budget is exhausted.
    ///
    /// With `max_reconnects = 0` this never returns.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::EventStreamClosed` once `max_reconnects`
    /// consecutive resubscriptions have failed to deliver an event.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let mut attempt: u32 = 0;
        let mut subscribed_before = false;

        loop {
            match self.runtime.events().await {
                Ok(stream) => {
                    if subscribed_before {
                        info!("Container event stream re-established");
                    }
                    subscribed_before = true;

                    // Events may have been missed while unsubscribed
                    if let Some(cache) = &self.cache {
                        cache.clear();
                    }
                    self.scan().await;

                    if self.consume(stream).await {
                        attempt = 0;
                    }
                    warn!("Container event stream ended");
                }
                Err(e) => warn!("Failed to subscribe to container events: {}", e),
            }

            if self.config.max_reconnects != 0 && attempt >= self.config.max_reconnects {
                warn!(
                    "Giving up on container events after {} reconnect attempts",
                    attempt
                );
                return Err(RuntimeError::EventStreamClosed);
            }

            let delay = self.config.backoff(attempt);
            attempt = attempt.saturating_add(1);
            debug!("Resubscribing to container events in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Set up every existing container, each on its own task
    pub async fn scan(&self) -> Vec<JoinHandle<()>> {
        let ids = match self.runtime.list_containers().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to list containers for setup: {}", e);
                return Vec::new();
            }
        };

        debug!("Setting up {} existing containers", ids.len());
        ids.into_iter()
            .map(|id| self.firewall.spawn_setup(id))
            .collect()
    }

    /// Apply one event; returns the setup task if the event started one
    pub fn handle_event(&self, event: &RuntimeEvent) -> Option<JoinHandle<()>> {
        if event.action.invalidates_cache() {
            if let Some(cache) = &self.cache {
                cache.invalidate(&event.container_id);
            }
        }

        match event.action {
            EventAction::Create => {
                debug!("Container {} created", event.container_id);
                Some(self.firewall.spawn_setup(event.container_id.clone()))
            }
            _ => None,
        }
    }

    /// Consume events until the stream ends or fails; returns whether any
    /// event was delivered
    async fn consume(&self, mut stream: EventStream) -> bool {
        let mut delivered = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    delivered = true;
                    self.handle_event(&event);
                }
                Err(e) => {
                    warn!("Container event stream error: {}", e);
                    break;
                }
            }
        }

        delivered
    }
}

impl std::fmt::Debug for LifecycleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMonitor")
            .field("runtime", &self.runtime.name())
            .field("cache", &self.cache.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
