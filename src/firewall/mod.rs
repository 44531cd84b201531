//! Firewall rule installation
//!
//! NAT rules live in each container's own network namespace. They are
//! installed by a privileged helper container started with
//! `network_mode = container:<target>`:
//!
//! - the proxy's namespace gets a PREROUTING redirect to the listening port
//! - each bridged container gets OUTPUT DNAT rules, one per `connect[<port>]`
//!   label, pointing at the proxy's IP

mod orchestrator;
mod rules;

pub use orchestrator::{FirewallOrchestrator, SetupOutcome, SetupStats, SetupStatsSnapshot};
pub use rules::{container_script, self_redirect_script, NatRule, Position, Script, ENABLE_ROUTE_LOCALNET};
