//! In-memory container runtime
//!
//! A deterministic [`ContainerRuntime`] for tests and dry runs. Containers
//! are added and removed directly, helper runs are recorded instead of
//! executed, and lifecycle events are pushed by the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;

use super::traits::{ContainerRuntime, EventStream};
use super::types::{ContainerDescriptor, EventAction, HelperSpec, RuntimeEvent};
use crate::error::RuntimeError;

/// A helper container run recorded by [`InMemoryRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInvocation {
    /// ID assigned to the helper
    pub helper_id: String,
    /// What was requested
    pub spec: HelperSpec,
    /// Exit status reported to the caller
    pub exit_code: i64,
    /// Whether the helper was removed afterwards
    pub removed: bool,
}

impl HelperInvocation {
    /// The container whose namespace the helper joined
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.spec.network_mode.strip_prefix("container:")
    }
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, ContainerDescriptor>,
    helpers: HashMap<String, HelperInvocation>,
    helper_order: Vec<String>,
    exit_codes: HashMap<String, i64>,
    failing_inspect: HashSet<String>,
    fail_list: bool,
    fail_create: bool,
    fail_events: bool,
    hang_helpers: bool,
    subscribers: Vec<mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>>>,
    subscriptions: usize,
}

/// Deterministic in-process container runtime
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuntime {
    state: Arc<Mutex<State>>,
    next_helper: Arc<AtomicU64>,
}

impl InMemoryRuntime {
    /// Create an empty runtime
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a container
    pub fn add_container(&self, desc: ContainerDescriptor) {
        self.state.lock().containers.insert(desc.id.clone(), desc);
    }

    /// Add a container and announce it with a `create` event
    pub fn create(&self, desc: ContainerDescriptor) {
        let id = desc.id.clone();
        self.add_container(desc);
        self.emit(RuntimeEvent::new(EventAction::Create, id));
    }

    /// Remove a container
    pub fn remove(&self, id: &str) -> Option<ContainerDescriptor> {
        self.state.lock().containers.remove(id)
    }

    /// Helpers running in `target`'s namespace exit with `code`
    pub fn set_exit_code(&self, target: &str, code: i64) {
        self.state.lock().exit_codes.insert(target.to_string(), code);
    }

    /// Inspecting `id` fails with an API error
    pub fn fail_inspect(&self, id: &str) {
        self.state.lock().failing_inspect.insert(id.to_string());
    }

    /// Listing containers fails with an API error
    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Creating helper containers fails with an API error
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    /// Subscribing to events fails with an API error
    pub fn fail_events(&self, fail: bool) {
        self.state.lock().fail_events = fail;
    }

    /// Helpers never exit
    pub fn hang_helpers(&self, hang: bool) {
        self.state.lock().hang_helpers = hang;
    }

    /// Deliver an event to every live subscription
    pub fn emit(&self, event: RuntimeEvent) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    /// Deliver an error to every live subscription
    pub fn emit_error(&self, reason: &str) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.unbounded_send(Err(RuntimeError::api("events", reason))).is_ok());
    }

    /// End every live subscription
    pub fn close_events(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Number of `events()` calls made so far, failed ones included
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Helper runs in the order they were created
    #[must_use]
    pub fn helper_runs(&self) -> Vec<HelperInvocation> {
        let state = self.state.lock();
        state
            .helper_order
            .iter()
            .filter_map(|id| state.helpers.get(id).cloned())
            .collect()
    }

    /// Helper runs that joined `target`'s namespace
    #[must_use]
    pub fn helper_runs_for(&self, target: &str) -> Vec<HelperInvocation> {
        self.helper_runs()
            .into_iter()
            .filter(|run| run.target() == Some(target))
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(RuntimeError::api("list_containers", "injected failure"));
        }
        Ok(state.containers.keys().cloned().collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError> {
        let state = self.state.lock();
        if state.failing_inspect.contains(id) {
            return Err(RuntimeError::api("inspect_container", "injected failure"));
        }
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(id))
    }

    async fn create_container(&self, spec: &HelperSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(RuntimeError::api("create_container", "injected failure"));
        }

        let helper_id = format!("helper-{}", self.next_helper.fetch_add(1, Ordering::Relaxed));
        let target = spec.network_mode.strip_prefix("container:").unwrap_or("");
        let exit_code = state.exit_codes.get(target).copied().unwrap_or(0);

        state.helpers.insert(
            helper_id.clone(),
            HelperInvocation {
                helper_id: helper_id.clone(),
                spec: spec.clone(),
                exit_code,
                removed: false,
            },
        );
        state.helper_order.push(helper_id.clone());
        Ok(helper_id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let state = self.state.lock();
        if state.helpers.contains_key(id) || state.containers.contains_key(id) {
            Ok(())
        } else {
            Err(RuntimeError::not_found(id))
        }
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let (hang, code) = {
            let state = self.state.lock();
            let run = state
                .helpers
                .get(id)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            (state.hang_helpers, run.exit_code)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(code)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if let Some(run) = state.helpers.get_mut(id) {
            run.removed = true;
            return Ok(());
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::not_found(id))
    }

    async fn events(&self) -> Result<EventStream, RuntimeError> {
        let mut state = self.state.lock();
        state.subscriptions += 1;
        if state.fail_events {
            return Err(RuntimeError::api("events", "injected failure"));
        }
        let (tx, rx) = mpsc::unbounded();
        state.subscribers.push(tx);
        Ok(rx.boxed())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web1() -> ContainerDescriptor {
        ContainerDescriptor::new("web1", Some("172.17.0.3".parse().unwrap()))
            .with_label("connect[8080]", "api1")
    }

    #[tokio::test]
    async fn test_list_and_inspect() {
        let rt = InMemoryRuntime::new();
        rt.add_container(web1());

        assert_eq!(rt.list_containers().await.unwrap(), vec!["web1".to_string()]);
        let desc = rt.inspect_container("web1").await.unwrap();
        assert_eq!(desc.backend_for_port(8080), Some("api1"));

        let err = rt.inspect_container("nope").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_helper_lifecycle_recorded() {
        let rt = InMemoryRuntime::new();
        rt.add_container(web1());
        rt.set_exit_code("web1", 3);

        let spec = HelperSpec::shell_in_namespace_of("web1", "img", "true");
        let helper = rt.create_container(&spec).await.unwrap();
        rt.start_container(&helper).await.unwrap();
        assert_eq!(rt.wait_container(&helper).await.unwrap(), 3);
        rt.remove_container(&helper).await.unwrap();

        let runs = rt.helper_runs_for("web1");
        assert_eq!(runs.len(), 1);
        assert!(runs[0].removed);
        assert_eq!(runs[0].exit_code, 3);
        // The target container itself is untouched
        assert!(rt.inspect_container("web1").await.is_ok());
    }

    #[tokio::test]
    async fn test_events_delivered_and_closed() {
        let rt = InMemoryRuntime::new();
        let mut events = rt.events().await.unwrap();
        assert_eq!(rt.subscriptions(), 1);

        rt.create(web1());
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event, RuntimeEvent::new(EventAction::Create, "web1"));

        rt.emit_error("boom");
        assert!(events.next().await.unwrap().is_err());

        rt.close_events();
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let rt = InMemoryRuntime::new();
        rt.add_container(web1());
        rt.fail_inspect("web1");
        rt.fail_list(true);
        rt.fail_create(true);

        assert!(rt.inspect_container("web1").await.is_err());
        assert!(rt.list_containers().await.is_err());
        let spec = HelperSpec::shell_in_namespace_of("web1", "img", "true");
        assert!(rt.create_container(&spec).await.is_err());
    }
}
