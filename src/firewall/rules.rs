//! NAT rule and helper script builders
//!
//! Scripts are plain `sh` command lists joined with `&&`. Every iptables rule
//! is guarded by a `-C` check so running the same script twice leaves a
//! single copy of each rule in the table.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Enables routing of locally destined packets to non-loopback addresses,
/// needed for DNAT of connections to `127.0.0.0/8`
pub const ENABLE_ROUTE_LOCALNET: &str = "/sbin/sysctl -w net.ipv4.conf.all.route_localnet=1";

/// Where a rule lands in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// `-A <chain>`
    Append,
    /// `-I <chain> <n>`
    Insert(u32),
}

/// One rule in the `nat` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    chain: &'static str,
    position: Position,
    spec: String,
}

impl NatRule {
    /// Redirect all inbound TCP to the proxy's listening port
    #[must_use]
    pub fn prerouting_redirect(listen_port: u16) -> Self {
        Self {
            chain: "PREROUTING",
            position: Position::Append,
            spec: format!("-p tcp -j REDIRECT --to-ports {listen_port}"),
        }
    }

    /// Masquerade local-source traffic so DNAT'ed local connections return
    /// through the proxy
    #[must_use]
    pub fn local_masquerade() -> Self {
        Self {
            chain: "POSTROUTING",
            position: Position::Insert(1),
            spec: "-m addrtype --src-type LOCAL --dst-type UNICAST -j MASQUERADE".into(),
        }
    }

    /// DNAT local-to-local TCP on `port` to the same port on the proxy
    #[must_use]
    pub fn output_dnat(port: u16, proxy_ip: IpAddr) -> Self {
        Self {
            chain: "OUTPUT",
            position: Position::Insert(1),
            spec: format!(
                "-m addrtype --src-type LOCAL --dst-type LOCAL -p tcp --dport {port} -j DNAT --to-destination {}",
                SocketAddr::new(proxy_ip, port)
            ),
        }
    }

    /// Chain the rule belongs to
    #[must_use]
    pub const fn chain(&self) -> &'static str {
        self.chain
    }

    /// Guarded install command: check first, add only if missing
    #[must_use]
    pub fn install_command(&self) -> String {
        let add = match self.position {
            Position::Append => format!("-A {}", self.chain),
            Position::Insert(n) => format!("-I {} {n}", self.chain),
        };
        format!(
            "(iptables -t nat -C {chain} {spec} || iptables -t nat {add} {spec})",
            chain = self.chain,
            spec = self.spec,
        )
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.chain, self.spec)
    }
}

/// A shell script run by one helper container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    commands: Vec<String>,
}

impl Script {
    /// Create an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw command
    #[must_use]
    pub fn command(mut self, cmd: impl Into<String>) -> Self {
        self.commands.push(cmd.into());
        self
    }

    /// Append a guarded rule install
    #[must_use]
    pub fn rule(self, rule: &NatRule) -> Self {
        self.command(rule.install_command())
    }

    /// Render as a single `sh -c` argument
    #[must_use]
    pub fn render(&self) -> String {
        self.commands.join(" && ")
    }
}

/// Script installing the proxy's own inbound redirect
#[must_use]
pub fn self_redirect_script(listen_port: u16) -> Script {
    Script::new().rule(&NatRule::prerouting_redirect(listen_port))
}

/// Script for a bridged container declaring `ports`
///
/// Enables local routing, installs the masquerade rule, then one DNAT rule
/// per declared port pointing at the proxy.
#[must_use]
pub fn container_script(ports: &BTreeSet<u16>, proxy_ip: IpAddr) -> Script {
    let mut script = Script::new()
        .command(ENABLE_ROUTE_LOCALNET)
        .rule(&NatRule::local_masquerade());
    for &port in ports {
        script = script.rule(&NatRule::output_dnat(port, proxy_ip));
    }
    script
}
