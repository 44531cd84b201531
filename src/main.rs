//! connectable: transparent TCP proxy for containers
//!
//! This is the main entry point. It must run inside a container on the
//! Docker bridge network with the Docker socket mounted.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! docker run -d -v /var/run/docker.sock:/var/run/docker.sock connectable
//!
//! # Run with custom configuration
//! connectable -c /path/to/config.json
//!
//! # Run with environment overrides
//! PORT=10001 CONNECTABLE_LOG_LEVEL=debug connectable
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use connectable::config::{load_config_with_env, Config};
use connectable::connection::{run_accept_loop, ConnectionManager};
use connectable::firewall::FirewallOrchestrator;
use connectable::intercept::InterceptListener;
use connectable::monitor::LifecycleMonitor;
use connectable::resolver::{
    AddressResolver, BackendResolver, ChainResolver, HostPortResolver, Router, SourceCache,
    StaticResolver,
};
use connectable::runtime::{locate_self, ContainerRuntime, DockerRuntime};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/connectable/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("connectable v{}", connectable::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"connectable v{}

Transparent TCP proxy routing container traffic to label-declared backends.

USAGE:
    connectable [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/connectable/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    PORT                         Listen port [default: 10000]
    CONNECTABLE_LISTEN_ADDR      Override listen address
    CONNECTABLE_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    CONNECTABLE_MAX_CONNECTIONS  Override maximum connections
    DOCKER_SOCKET                Docker API socket [default: /var/run/docker.sock]
    HOSTNAME                     Hostname of the proxy's own container

REQUIREMENTS:
    - Running in a container on the default bridge network
    - Docker socket mounted into the container
    - Image containing /bin/sh, iptables and sysctl (used for helper containers)

EXAMPLE:
    docker run -d --name connectable \
        -v /var/run/docker.sock:/var/run/docker.sock connectable
    docker run -d --label 'connect[6379]=redis.service:6379' myapp
"#,
        connectable::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "bollard=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Default address resolution: configured backends first, then `host:port`
fn build_address_resolver(config: &Config) -> Arc<dyn AddressResolver> {
    let static_resolver = StaticResolver::new(config.resolver.static_backends.clone());
    if static_resolver.is_empty() {
        info!("No static backends configured, resolving names as host:port");
    } else {
        info!("Loaded {} static backends", static_resolver.len());
    }

    Arc::new(ChainResolver::new(vec![
        Arc::new(static_resolver),
        Arc::new(HostPortResolver::new()),
    ]))
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        connectable::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("connectable v{}", connectable::VERSION);

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(&config.runtime)
            .await
            .context("Failed to connect to container runtime")?,
    );

    let listener =
        InterceptListener::bind(&config.listen).context("Failed to create listener")?;
    info!("Connectable listening on {}", listener.listen_addr());

    let hostname = config
        .runtime
        .hostname
        .clone()
        .context("Hostname unknown: set HOSTNAME or runtime.hostname")?;
    let me = locate_self(runtime.as_ref(), &hostname)
        .await
        .context("Unable to find self")?;
    info!("Self: {}", me);

    let firewall = Arc::new(FirewallOrchestrator::new(
        Arc::clone(&runtime),
        Arc::new(me),
        listener.port(),
        &config.firewall,
        config.runtime.helper_image.clone(),
    ));
    firewall
        .setup_self()
        .await
        .context("Failed to install inbound redirect")?;

    let cache = config
        .resolver
        .cache_enabled
        .then(|| Arc::new(SourceCache::new()));

    let backends = match &cache {
        Some(cache) => BackendResolver::with_cache(Arc::clone(&runtime), Arc::clone(cache)),
        None => BackendResolver::new(Arc::clone(&runtime)),
    };
    let router = Arc::new(Router::new(backends, build_address_resolver(&config)));
    let connection_manager = Arc::new(ConnectionManager::new(&config.connection, router));

    let mut monitor =
        LifecycleMonitor::new(Arc::clone(&runtime), Arc::clone(&firewall), &config.monitor);
    if let Some(cache) = &cache {
        monitor = monitor.with_cache(Arc::clone(cache));
    }
    let mut monitor_handle = tokio::spawn(async move { monitor.run().await });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let run_result: Result<()> = tokio::select! {
        result = run_accept_loop(listener, Arc::clone(&connection_manager)) => {
            result.context("Accept loop error")
        }
        result = &mut monitor_handle => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("Lifecycle monitor stopped"),
                Err(e) => Err(e).context("Lifecycle monitor task failed"),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            Ok(())
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            Ok(())
        }
    };

    if let Err(e) = &run_result {
        error!("{:#}", e);
    }

    info!("Shutting down...");
    monitor_handle.abort();
    connection_manager.shutdown().await;

    let stats = connection_manager.stats_snapshot();
    info!(
        "Final stats: {} connections, {} completed, {} errored, {} unrouted, {} rejected",
        stats.total_accepted, stats.completed, stats.errored, stats.unrouted, stats.rejected
    );
    info!(
        "Transferred: {} bytes client->backend, {} bytes backend->client",
        stats.bytes_client_to_backend, stats.bytes_backend_to_client
    );

    let setups = firewall.stats().snapshot();
    info!(
        "Container setups: {} configured, {} skipped, {} failed",
        setups.configured, setups.skipped, setups.failed
    );
    if let Some(cache) = &cache {
        let cache_stats = cache.stats();
        info!(
            "Source cache: {} hits, {} misses, {} invalidations",
            cache_stats.hits, cache_stats.misses, cache_stats.invalidations
        );
    }

    info!("Shutdown complete");
    run_result
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
