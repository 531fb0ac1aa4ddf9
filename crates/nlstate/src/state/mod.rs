//! Network state documents.
//!
//! A [`NetworkState`] is used for three things:
//!
//! - the *desired* state a caller hands in, where omitted fields mean "leave
//!   as is" and removal is requested with `state: absent`,
//! - the *current* state read back from a backend, which is complete and
//!   includes dynamically learned addresses, routes and DNS servers,
//! - the *target* state the engine computes by merging the two.
//!
//! Documents are serialized with kebab-case keys and can be read from JSON
//! or YAML.
//!
//! # Example
//!
//! ```ignore
//! use nlstate::state::*;
//!
//! let desired = NetworkState::new()
//!     .interface(
//!         Interface::ethernet("eth1")
//!             .up()
//!             .with_ipv4(InterfaceIpv4::with_dhcp()),
//!     )
//!     .route(RouteEntry::new("198.51.100.0/24").via("192.0.2.1").dev("eth1"));
//! ```

mod dns;
mod iface;
mod ip;
mod route;
mod rule;

use serde::{Deserialize, Serialize};

pub use dns::{DnsConfig, DnsState};
pub use iface::{
    BondConfig, BondMode, BridgeConfig, Interface, InterfaceIdentifier, InterfaceKind,
    InterfaceState, InterfaceType, VethConfig, WaitIp,
};
pub use ip::{
    AddrGenMode, AddressParseError, AutoIpConfig, IPV6_MIN_MTU, InterfaceIpv4, InterfaceIpv6,
    IpAddrEntry, IpConfig, IpFamily, LIFETIME_FOREVER, format_network, is_ipv6_link_local,
    parse_cidr,
};
pub use route::{EntryState, RT_TABLE_MAIN, RouteEntry, RouteProtocol, Routes};
pub use rule::{RouteRuleEntry, RouteRules};

use crate::Result;
use crate::dynamic;

/// A complete or partial network state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkState {
    /// Interfaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    /// Routes.
    #[serde(default, skip_serializing_if = "Routes::is_empty")]
    pub routes: Routes,
    /// Policy routing rules.
    #[serde(default, skip_serializing_if = "route_rules_is_empty")]
    pub route_rules: RouteRules,
    /// DNS resolver.
    #[serde(default, rename = "dns-resolver", skip_serializing_if = "dns_is_empty")]
    pub dns: DnsState,
}

fn route_rules_is_empty(rules: &RouteRules) -> bool {
    rules.config.is_none()
}

fn dns_is_empty(dns: &DnsState) -> bool {
    dns.config.is_none() && dns.running.is_none()
}

impl NetworkState {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add an interface.
    pub fn interface(mut self, iface: Interface) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Add a configured route (or a removal entry).
    pub fn route(mut self, route: RouteEntry) -> Self {
        self.routes.config.get_or_insert_with(Vec::new).push(route);
        self
    }

    /// Add a routing rule (or a removal entry).
    pub fn rule(mut self, rule: RouteRuleEntry) -> Self {
        self.route_rules
            .config
            .get_or_insert_with(Vec::new)
            .push(rule);
        self
    }

    /// Set the static DNS configuration.
    pub fn dns(mut self, config: DnsConfig) -> Self {
        self.dns.config = Some(config);
        self
    }

    /// Check if the document requests nothing.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
            && self.routes.config.is_none()
            && self.route_rules.config.is_none()
            && self.dns.config.is_none()
    }

    /// Get an interface by name.
    pub fn get_interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Get a mutable interface by name.
    pub fn get_interface_mut(&mut self, name: &str) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|i| i.name == name)
    }

    /// Return the persistent configuration view of this state.
    ///
    /// Addresses carrying a lifetime on dynamically configured families,
    /// learned routes and learned DNS servers are removed. Static addresses
    /// (including link-local ones) are kept.
    pub fn to_running_config(&self) -> NetworkState {
        let mut state = self.clone();
        for iface in &mut state.interfaces {
            if let Some(ipv4) = iface.ipv4.as_mut() {
                dynamic::drop_leases(ipv4);
            }
            if let Some(ipv6) = iface.ipv6.as_mut() {
                dynamic::drop_leases(ipv6);
            }
        }
        state.routes.config = Some(
            self.routes
                .config
                .iter()
                .flatten()
                .filter(|r| !r.is_auto())
                .cloned()
                .collect(),
        );
        state.routes.running = None;
        state.dns.config = Some(self.dns.config.clone().unwrap_or_default());
        state.dns.running = None;
        state
    }
}
