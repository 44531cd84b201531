//! Runtime data model: container descriptors, lifecycle events, helper specs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static CONNECT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^connect\[(\d+)\]$").expect("connect label pattern is valid")
});

/// Label key declaring the backend for traffic arriving on `port`
#[must_use]
pub fn connect_label(port: u16) -> String {
    format!("connect[{port}]")
}

/// Container network configuration as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// Own IP on the shared bridge network
    Bridge,
    /// Host network namespace
    Host,
    /// Shares another container's namespace (`container:<id>`)
    Container(String),
    /// No networking
    None,
    /// Anything else (user-defined networks, plugins)
    Other(String),
}

impl NetworkMode {
    /// Parse the runtime's network mode string.
    ///
    /// Docker reports `default` for containers started without an explicit
    /// mode, which is the bridge.
    #[must_use]
    pub fn parse(mode: &str) -> Self {
        match mode {
            "bridge" | "default" => Self::Bridge,
            "host" => Self::Host,
            "none" => Self::None,
            other => other
                .strip_prefix("container:")
                .map_or_else(|| Self::Other(other.to_string()), |id| Self::Container(id.to_string())),
        }
    }

    /// Check if this is the shared bridge mode
    #[must_use]
    pub const fn is_bridge(&self) -> bool {
        matches!(self, Self::Bridge)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Host => write!(f, "host"),
            Self::Container(id) => write!(f, "container:{id}"),
            Self::None => write!(f, "none"),
            Self::Other(mode) => write!(f, "{mode}"),
        }
    }
}

/// Read-only snapshot of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// Container ID
    pub id: String,
    /// Address on the bridge network, if any
    pub ip_address: Option<IpAddr>,
    /// Configured hostname
    pub hostname: String,
    /// Network mode
    pub network_mode: NetworkMode,
    /// Image reference the container runs
    pub image: String,
    /// Labels
    pub labels: HashMap<String, String>,
}

impl ContainerDescriptor {
    /// Create a bridged container descriptor with no labels
    pub fn new(id: impl Into<String>, ip_address: Option<IpAddr>) -> Self {
        Self {
            id: id.into(),
            ip_address,
            hostname: String::new(),
            network_mode: NetworkMode::Bridge,
            image: String::new(),
            labels: HashMap::new(),
        }
    }

    /// Set the hostname
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the network mode
    #[must_use]
    pub fn with_network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = mode;
        self
    }

    /// Set the image
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Backend identifier declared for `port`, if any
    #[must_use]
    pub fn backend_for_port(&self, port: u16) -> Option<&str> {
        self.labels.get(&connect_label(port)).map(String::as_str)
    }

    /// All `connect[<port>]` declarations, ordered by port
    #[must_use]
    pub fn connect_ports(&self) -> BTreeMap<u16, &str> {
        let mut ports = BTreeMap::new();
        for (key, value) in &self.labels {
            let Some(caps) = CONNECT_LABEL.captures(key) else {
                continue;
            };
            match caps[1].parse::<u16>() {
                Ok(port) if port != 0 => {
                    ports.insert(port, value.as_str());
                }
                _ => debug!("Ignoring label {} on {}: port out of range", key, self.id),
            }
        }
        ports
    }

    /// Short ID for log lines
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// First 12 bytes of a container id, or the whole id when it is shorter or
/// byte 12 is not a char boundary
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Lifecycle event kinds the proxy reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    /// Container created
    Create,
    /// Container started
    Start,
    /// Container process exited
    Die,
    /// Container removed
    Destroy,
    /// Anything else
    Other(String),
}

impl EventAction {
    /// Parse the runtime's event action string
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action {
            "create" => Self::Create,
            "start" => Self::Start,
            "die" => Self::Die,
            "destroy" => Self::Destroy,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether a cached view of the container may now be stale
    #[must_use]
    pub const fn invalidates_cache(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// One container lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// What happened
    pub action: EventAction,
    /// Container it happened to
    pub container_id: String,
}

impl RuntimeEvent {
    /// Create an event
    pub fn new(action: EventAction, container_id: impl Into<String>) -> Self {
        Self {
            action,
            container_id: container_id.into(),
        }
    }
}

/// Parameters for a privileged helper container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSpec {
    /// Image to run
    pub image: String,
    /// Command and arguments
    pub cmd: Vec<String>,
    /// Run privileged (needed for iptables and sysctl)
    pub privileged: bool,
    /// Network mode, `container:<target>` to join the target's namespace
    pub network_mode: String,
}

impl HelperSpec {
    /// Helper that runs `script` through `/bin/sh -c` inside `target`'s
    /// network namespace.
    pub fn shell_in_namespace_of(
        target: &str,
        image: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            image: image.into(),
            cmd: vec!["/bin/sh".into(), "-c".into(), script.into()],
            privileged: true,
            network_mode: format!("container:{target}"),
        }
    }

    /// The shell script, if this helper runs one
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        match self.cmd.as_slice() {
            [sh, flag, script] if sh.ends_with("sh") && flag == "-c" => Some(script.as_str()),
            _ => None,
        }
    }
}
