//! Firewall setup driven by container lifecycle events

use std::sync::Arc;
use std::time::Duration;

use connectable::config::{FirewallConfig, MonitorConfig};
use connectable::firewall::{FirewallOrchestrator, SetupOutcome};
use connectable::monitor::LifecycleMonitor;
use connectable::runtime::{
    ContainerDescriptor, ContainerRuntime, InMemoryRuntime, NetworkMode, SelfDescriptor,
};
use tokio::time::timeout;

fn proxy_descriptor() -> Arc<SelfDescriptor> {
    Arc::new(SelfDescriptor {
        container_id: "proxy".into(),
        ip_address: Some("172.17.0.2".parse().unwrap()),
        image: "connectable:latest".into(),
        network_mode: NetworkMode::Bridge,
    })
}

fn orchestrator(rt: &InMemoryRuntime) -> Arc<FirewallOrchestrator> {
    Arc::new(FirewallOrchestrator::new(
        Arc::new(rt.clone()),
        proxy_descriptor(),
        10000,
        &FirewallConfig::default(),
        None,
    ))
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_concurrent_setups_stay_in_their_own_namespace() {
    let rt = InMemoryRuntime::new();
    rt.add_container(
        ContainerDescriptor::new("web1", Some("172.17.0.3".parse().unwrap()))
            .with_label("connect[9000]", "api1"),
    );
    rt.add_container(
        ContainerDescriptor::new("web2", Some("172.17.0.4".parse().unwrap()))
            .with_label("connect[9000]", "api2")
            .with_label("connect[9001]", "metrics"),
    );
    let fw = orchestrator(&rt);

    let first = fw.spawn_setup("web1".into());
    let second = fw.spawn_setup("web2".into());
    first.await.unwrap();
    second.await.unwrap();

    let web1 = rt.helper_runs_for("web1");
    let web2 = rt.helper_runs_for("web2");
    assert_eq!(web1.len(), 1);
    assert_eq!(web2.len(), 1);

    let web1_script = web1[0].spec.script().unwrap();
    let web2_script = web2[0].spec.script().unwrap();
    assert_eq!(web1[0].spec.network_mode, "container:web1");
    assert_eq!(web2[0].spec.network_mode, "container:web2");

    assert!(web1_script.contains("--dport 9000 -j DNAT --to-destination 172.17.0.2:9000"));
    assert!(!web1_script.contains("9001"));
    assert!(web2_script.contains("--dport 9000 -j DNAT --to-destination 172.17.0.2:9000"));
    assert!(web2_script.contains("--dport 9001 -j DNAT --to-destination 172.17.0.2:9001"));

    assert_eq!(fw.stats().snapshot().configured, 2);
}

#[tokio::test]
async fn test_repeated_setup_is_guarded() {
    let rt = InMemoryRuntime::new();
    rt.add_container(ContainerDescriptor::new("web1", None).with_label("connect[8080]", "api1"));
    let fw = orchestrator(&rt);

    let once = fw.setup_container("web1").await.unwrap();
    let twice = fw.setup_container("web1").await.unwrap();
    assert_eq!(once, twice);

    let runs = rt.helper_runs_for("web1");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].spec.script(), runs[1].spec.script());

    // Every rule is checked before it is added
    let script = runs[0].spec.script().unwrap();
    for install in script.split(" && ").filter(|cmd| cmd.contains("iptables")) {
        assert!(install.starts_with("(iptables -t nat -C "), "unguarded: {install}");
        assert!(install.contains(" || iptables -t nat -"), "unguarded: {install}");
    }
}

#[tokio::test]
async fn test_failed_setup_does_not_block_others() {
    let rt = InMemoryRuntime::new();
    rt.add_container(ContainerDescriptor::new("broken", None).with_label("connect[80]", "a"));
    rt.add_container(ContainerDescriptor::new("healthy", None).with_label("connect[80]", "b"));
    rt.set_exit_code("broken", 2);
    let fw = orchestrator(&rt);

    let (broken, healthy) = tokio::join!(
        fw.setup_container("broken"),
        fw.setup_container("healthy"),
    );
    assert!(broken.is_err());
    assert_eq!(healthy.unwrap(), SetupOutcome::Configured { ports: vec![80] });

    let snapshot = fw.stats().snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.configured, 1);
    assert!(rt.helper_runs().iter().all(|run| run.removed));
}

#[tokio::test]
async fn test_monitor_configures_existing_and_new_containers() {
    let rt = InMemoryRuntime::new();
    rt.add_container(ContainerDescriptor::new("existing", None).with_label("connect[6379]", "redis"));
    rt.add_container(
        ContainerDescriptor::new("sidecar", None)
            .with_network_mode(NetworkMode::Container("existing".into())),
    );

    let fw = orchestrator(&rt);
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(rt.clone());
    let config = MonitorConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 20,
        backoff_multiplier: 2.0,
        max_reconnects: 0,
    };
    let monitor = LifecycleMonitor::new(runtime, Arc::clone(&fw), &config);
    let task = tokio::spawn(async move { monitor.run().await });

    wait_for(|| rt.subscriptions() == 1).await;
    wait_for(|| !rt.helper_runs_for("existing").is_empty()).await;

    rt.create(ContainerDescriptor::new("fresh", None).with_label("connect[8080]", "api1"));
    wait_for(|| !rt.helper_runs_for("fresh").is_empty()).await;

    let script = rt.helper_runs_for("fresh")[0].spec.script().unwrap().to_string();
    assert!(script.contains("--dport 8080 -j DNAT --to-destination 172.17.0.2:8080"));

    // Shared-namespace containers are left alone
    wait_for(|| fw.stats().snapshot().skipped == 1).await;
    assert!(rt.helper_runs_for("sidecar").is_empty());

    task.abort();
}
