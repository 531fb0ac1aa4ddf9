//! Simulated host.
//!
//! [`SimulatedHost`] is an in-memory [`Backend`] that behaves like a host
//! managed by a network daemon: it stores interface profiles, routes, rules
//! and resolver settings, runs DHCP and autoconf clients against attached
//! [`DhcpServer`]s, and reports kernel-managed IPv6 link-local addresses.
//! Leases show up after the server's delay, measured on the tokio clock, so
//! tests can drive it with paused time.
//!
//! Faults can be injected to exercise rollback.
//!
//! # Example
//!
//! ```ignore
//! use nlstate::lab::{DhcpServer, SimulatedHost};
//! use nlstate::NetState;
//!
//! let host = SimulatedHost::new()
//!     .with_ethernet("eth1")
//!     .with_dhcp_server("eth1", DhcpServer::standard());
//! let engine = NetState::new(host);
//! ```

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::backend::{ApplyMode, ApplyReport, Backend};
use crate::plan::{self, Operation, Plan};
use crate::state::{
    AutoIpConfig, DnsConfig, Interface, InterfaceIpv4, InterfaceIpv6, InterfaceType, IpAddrEntry,
    IpConfig, NetworkState, RouteEntry, RouteProtocol, RouteRuleEntry,
};
use crate::{Error, Result};

/// Metric of learned routes when the profile does not set one.
pub const DEFAULT_LEARNED_METRIC: u32 = 100;

/// A DHCPv4, DHCPv6 and router advertisement service on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpServer {
    /// Server address; handed out as gateway and DNS server.
    pub server_ipv4: Ipv4Addr,
    /// Address leased to the client.
    pub lease_ipv4: Ipv4Addr,
    /// Prefix length of the leased IPv4 address.
    pub ipv4_prefix_length: u8,
    /// Classless static routes: destination and next hop.
    pub classless_routes: Vec<(String, Ipv4Addr)>,
    /// DHCPv6 server address; handed out as DNS server.
    pub server_ipv6: Ipv6Addr,
    /// Address leased by DHCPv6 (as a /128).
    pub lease_ipv6: Ipv6Addr,
    /// Advertised /64 prefix for autoconf.
    pub ra_prefix: Ipv6Addr,
    /// Link-local address of the advertising router.
    pub ra_router: Ipv6Addr,
    /// Extra routes announced in router advertisements.
    pub ra_routes: Vec<String>,
    /// Lease lifetime.
    pub lease_time: Duration,
    /// Time between a client starting and its lease showing up.
    pub delay: Duration,
}

impl DhcpServer {
    /// The server used by the test suite: 192.0.2.0/24 and 2001:db8:1::/64.
    pub fn standard() -> Self {
        Self {
            server_ipv4: Ipv4Addr::new(192, 0, 2, 251),
            lease_ipv4: Ipv4Addr::new(192, 0, 2, 200),
            ipv4_prefix_length: 24,
            classless_routes: vec![("198.51.100.0/24".to_string(), Ipv4Addr::new(192, 0, 2, 1))],
            server_ipv6: Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1),
            lease_ipv6: Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 0x100),
            ra_prefix: Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 0),
            ra_router: Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            ra_routes: vec!["2001:db8:f::/64".to_string()],
            lease_time: Duration::from_secs(48 * 3600),
            delay: Duration::from_secs(1),
        }
    }

    /// Set the delay before leases show up.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn lifetime(&self) -> String {
        format!("{}sec", self.lease_time.as_secs())
    }
}

impl Default for DhcpServer {
    fn default() -> Self {
        Self::standard()
    }
}

/// A fault injected into the simulated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the next plan before executing any operation.
    RejectApply(String),
    /// Fail the next operation on the named interface, after the
    /// operations before it were executed.
    FailOnInterface(String),
    /// Never change the MTU of the named interface.
    IgnoreMtu(String),
}

#[derive(Debug, Clone)]
struct HostInterface {
    config: Interface,
    index: u16,
    v4_since: Option<Instant>,
    v6_since: Option<Instant>,
}

#[derive(Debug, Clone)]
struct RuleRecord {
    rule: RouteRuleEntry,
    owner: String,
}

#[derive(Debug, Default)]
struct HostInner {
    interfaces: Vec<HostInterface>,
    next_index: u16,
    servers: HashMap<String, DhcpServer>,
    routes: Vec<RouteEntry>,
    rules: Vec<RuleRecord>,
    dns: Option<DnsConfig>,
    faults: Vec<Fault>,
    applied: Vec<Plan>,
}

/// An in-memory host implementing [`Backend`].
#[derive(Debug)]
pub struct SimulatedHost {
    inner: Mutex<HostInner>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Create a host with only the loopback interface.
    pub fn new() -> Self {
        let host = Self {
            inner: Mutex::new(HostInner::default()),
        };
        host.with_interface(
            Interface::loopback("lo")
                .up()
                .mtu(65536)
                .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("127.0.0.1", 8)]))
                .with_ipv6(InterfaceIpv6::with_static(vec![IpAddrEntry::new("::1", 128)])),
        )
    }

    /// Build a host from a stored configuration.
    ///
    /// Leases and learned routes in `state` are ignored; clients restart.
    pub fn from_state(state: &NetworkState) -> Self {
        let mut host = Self::new();
        let config = state.to_running_config();
        for iface in config.interfaces.iter().filter(|i| !i.is_absent()) {
            if iface.name == "lo" {
                host.lock().interfaces.retain(|i| i.config.name != "lo");
            }
            host = host.with_interface(iface.clone());
        }
        {
            let mut inner = host.lock();
            inner.routes = config.routes.config_routes().cloned().collect();
            inner.rules = config
                .route_rules
                .config_rules()
                .map(|rule| RuleRecord {
                    rule: rule.clone(),
                    owner: plan::LOOPBACK.to_string(),
                })
                .collect();
            inner.dns = config.dns.config.clone().filter(|d| !d.is_empty());
        }
        host
    }

    /// Add a physical ethernet interface, up with both families disabled.
    pub fn with_ethernet(self, name: &str) -> Self {
        let index = self.lock().next_index;
        self.with_interface(
            Interface::ethernet(name)
                .up()
                .mtu(1500)
                .mac(synthesized_mac(index))
                .with_ipv4(InterfaceIpv4::disabled())
                .with_ipv6(InterfaceIpv6::disabled()),
        )
    }

    /// Add an interface with the given configuration.
    pub fn with_interface(self, iface: Interface) -> Self {
        {
            let mut inner = self.lock();
            match inner.allocate_index() {
                Some(index) => {
                    let now = Instant::now();
                    inner.interfaces.push(HostInterface {
                        v4_since: dynamic_since(iface.is_up(), iface.ipv4.as_ref(), None, now),
                        v6_since: dynamic_since(iface.is_up(), iface.ipv6.as_ref(), None, now),
                        config: plan::config_view(&iface),
                        index,
                    });
                }
                None => warn!(name = %iface.name, "interface index space exhausted, not added"),
            }
        }
        self
    }

    /// Attach a DHCP and router advertisement service to a link.
    pub fn with_dhcp_server(self, iface: &str, server: DhcpServer) -> Self {
        self.lock().servers.insert(iface.to_string(), server);
        self
    }

    /// Inject a fault.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Plans executed so far, including rollback plans.
    pub fn applied_plans(&self) -> Vec<Plan> {
        self.lock().applied.clone()
    }

    /// Number of plans executed so far.
    pub fn apply_count(&self) -> usize {
        self.lock().applied.len()
    }

    /// Interface whose profile carries `rule`.
    pub fn rule_owner(&self, rule: &RouteRuleEntry) -> Option<String> {
        self.lock()
            .rules
            .iter()
            .find(|r| r.rule.same_rule(rule))
            .map(|r| r.owner.clone())
    }

    /// The stored configuration, suitable for [`SimulatedHost::from_state`].
    pub fn config_state(&self) -> NetworkState {
        self.lock().observe(Instant::now()).to_running_config()
    }

    fn lock(&self) -> MutexGuard<'_, HostInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for SimulatedHost {
    async fn read_state(&self) -> Result<NetworkState> {
        Ok(self.lock().observe(Instant::now()))
    }

    async fn apply_plan(&self, plan: &Plan, mode: ApplyMode) -> Result<ApplyReport> {
        let mut inner = self.lock();
        if let Some(pos) = inner
            .faults
            .iter()
            .position(|f| matches!(f, Fault::RejectApply(_)))
            && let Fault::RejectApply(message) = inner.faults.remove(pos)
        {
            return Err(Error::backend("apply", message));
        }

        let now = Instant::now();
        for op in plan {
            trace!(%op, "executing");
            inner.check_failure(op)?;
            inner.execute(op, mode, now)?;
        }
        inner.applied.push(plan.clone());
        debug!(changes = plan.change_count(), ?mode, "plan executed");
        Ok(ApplyReport::for_plan(plan))
    }
}

/// When the dynamic client of a family (re)started.
fn dynamic_since<T: IpConfig>(
    up: bool,
    cfg: Option<&T>,
    previous: Option<Instant>,
    now: Instant,
) -> Option<Instant> {
    if up && cfg.is_some_and(IpConfig::is_dynamic) {
        Some(previous.unwrap_or(now))
    } else {
        None
    }
}

impl HostInner {
    /// Take the next free interface index.
    fn allocate_index(&mut self) -> Option<u16> {
        let index = self.next_index;
        self.next_index = index.checked_add(1)?;
        Some(index)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.interfaces.iter().position(|i| i.config.name == name)
    }

    fn check_failure(&mut self, op: &Operation) -> Result<()> {
        let Some(name) = op.interface_name() else {
            return Ok(());
        };
        let fault = Fault::FailOnInterface(name.to_string());
        if let Some(pos) = self.faults.iter().position(|f| *f == fault) {
            self.faults.remove(pos);
            return Err(Error::backend(op.to_string(), "injected failure"));
        }
        Ok(())
    }

    fn execute(&mut self, op: &Operation, mode: ApplyMode, now: Instant) -> Result<()> {
        match op {
            Operation::UpsertInterface { iface, create } => {
                self.upsert_interface(iface, *create, mode, now)
            }
            Operation::RemoveInterface { name, .. } => self.remove_interface(name),
            Operation::UpsertRoute(route) => {
                if let Some(dev) = route.next_hop_interface.as_deref()
                    && self.position(dev).is_none()
                {
                    return Err(Error::backend(
                        op.to_string(),
                        format!("no such interface {}", dev),
                    ));
                }
                if !self.routes.iter().any(|r| r.same_route(route)) {
                    self.routes.push(route.clone());
                }
                Ok(())
            }
            Operation::RemoveRoute(route) => {
                self.routes.retain(|r| !r.same_route(route));
                Ok(())
            }
            Operation::UpsertRule { rule, owner } => {
                if !self.rules.iter().any(|r| r.rule.same_rule(rule)) {
                    self.rules.push(RuleRecord {
                        rule: rule.clone(),
                        owner: owner.clone(),
                    });
                }
                Ok(())
            }
            Operation::RemoveRule(rule) => {
                self.rules.retain(|r| !r.rule.same_rule(rule));
                Ok(())
            }
            Operation::ReplaceDns(dns) => {
                self.dns = Some(dns.clone()).filter(|d| !d.is_empty());
                Ok(())
            }
        }
    }

    fn upsert_interface(
        &mut self,
        iface: &Interface,
        create: bool,
        mode: ApplyMode,
        now: Instant,
    ) -> Result<()> {
        let operation = if create { "create" } else { "modify" };
        let fail = |message: String| Err(Error::backend(format!("{} {}", operation, iface.name), message));

        let existing = self.position(&iface.name);
        match (create, existing) {
            (true, Some(_)) => return fail("interface already exists".into()),
            (true, None) if !iface.iface_type().is_virtual() => {
                return fail(format!("cannot create {} interface", iface.iface_type()));
            }
            (false, None) => return fail("no such interface".into()),
            _ => {}
        }

        let dynamic = iface.ipv4.as_ref().is_some_and(IpConfig::is_dynamic)
            || iface.ipv6.as_ref().is_some_and(IpConfig::is_dynamic);
        if mode == ApplyMode::KernelOnly && dynamic {
            return fail("dynamic configuration needs the managing daemon".into());
        }
        if let Some(controller) = iface.controller.as_deref().filter(|c| !c.is_empty())
            && self.position(controller).is_none()
        {
            return fail(format!("controller {} does not exist", controller));
        }

        let mut config = iface.clone();
        match existing {
            Some(pos) => {
                let record = &mut self.interfaces[pos];
                if self.faults.contains(&Fault::IgnoreMtu(iface.name.clone())) {
                    config.mtu = record.config.mtu;
                }
                record.v4_since = dynamic_since(config.is_up(), config.ipv4.as_ref(), record.v4_since, now);
                record.v6_since = dynamic_since(config.is_up(), config.ipv6.as_ref(), record.v6_since, now);
                record.config = config;
            }
            None => {
                let Some(index) = self.allocate_index() else {
                    return fail("interface index space exhausted".into());
                };
                if config.mac_address.is_none() {
                    config.mac_address = Some(synthesized_mac(index));
                }
                let peer = config.veth_peer().map(str::to_string);
                self.interfaces.push(HostInterface {
                    v4_since: dynamic_since(config.is_up(), config.ipv4.as_ref(), None, now),
                    v6_since: dynamic_since(config.is_up(), config.ipv6.as_ref(), None, now),
                    config,
                    index,
                });
                if let Some(peer) = peer
                    && self.position(&peer).is_none()
                {
                    let Some(index) = self.allocate_index() else {
                        return fail("interface index space exhausted".into());
                    };
                    self.interfaces.push(HostInterface {
                        config: Interface::veth(peer, iface.name.clone())
                            .up()
                            .mac(synthesized_mac(index))
                            .with_ipv4(InterfaceIpv4::disabled())
                            .with_ipv6(InterfaceIpv6::disabled()),
                        index,
                        v4_since: None,
                        v6_since: None,
                    });
                }
            }
        }
        Ok(())
    }

    fn remove_interface(&mut self, name: &str) -> Result<()> {
        let Some(pos) = self.position(name) else {
            return Err(Error::backend(
                format!("remove {}", name),
                "no such interface",
            ));
        };
        let removed = self.interfaces.remove(pos);
        let mut gone = vec![removed.config.name.clone()];
        if let Some(peer) = removed.config.veth_peer()
            && let Some(pos) = self.position(peer)
        {
            gone.push(self.interfaces.remove(pos).config.name);
        }

        for record in &mut self.interfaces {
            if record
                .config
                .controller
                .as_ref()
                .is_some_and(|c| gone.contains(c))
            {
                record.config.controller = None;
            }
        }
        self.routes.retain(|r| {
            r.next_hop_interface
                .as_ref()
                .is_none_or(|dev| !gone.contains(dev))
        });
        for record in &mut self.rules {
            if gone.contains(&record.owner) {
                record.owner = plan::LOOPBACK.to_string();
            }
        }
        Ok(())
    }

    /// Build the complete observed state at `now`.
    fn observe(&self, now: Instant) -> NetworkState {
        let mut state = NetworkState::new();
        let mut learned_routes: Vec<RouteEntry> = Vec::new();
        let mut learned_dns: Vec<String> = Vec::new();

        for record in &self.interfaces {
            let mut iface = record.config.clone();
            let name = iface.name.clone();
            let up = iface.is_up();

            let ports: Vec<String> = {
                let mut ports: Vec<String> = self
                    .interfaces
                    .iter()
                    .filter(|p| p.config.controller.as_deref() == Some(name.as_str()))
                    .map(|p| p.config.name.clone())
                    .collect();
                ports.sort();
                ports
            };
            if let Some(list) = iface.ports_mut()
                && (list.is_some() || !ports.is_empty())
            {
                *list = Some(ports);
            }

            let server = self.servers.get(&name);
            let ready = |since: Option<Instant>, server: &DhcpServer| {
                since.is_some_and(|t| now >= t + server.delay)
            };

            if up
                && let Some(ipv4) = iface.ipv4.as_mut()
                && ipv4.is_dhcp()
                && let Some(server) = server
                && ready(record.v4_since, server)
            {
                ipv4.addresses.get_or_insert_with(Vec::new).push(
                    IpAddrEntry::new(server.lease_ipv4.to_string(), server.ipv4_prefix_length)
                        .with_lifetime(server.lifetime(), server.lifetime()),
                );
                let auto = &ipv4.auto;
                if auto.gateway() {
                    learned_routes.push(learned_route(
                        "0.0.0.0/0",
                        server.server_ipv4.to_string(),
                        &name,
                        auto,
                        RouteProtocol::Dhcp,
                    ));
                }
                if auto.routes() {
                    for (dst, via) in &server.classless_routes {
                        learned_routes.push(learned_route(
                            dst,
                            via.to_string(),
                            &name,
                            auto,
                            RouteProtocol::Dhcp,
                        ));
                    }
                }
                if auto.dns() {
                    learned_dns.push(server.server_ipv4.to_string());
                }
            }

            let loopback = iface.iface_type() == InterfaceType::Loopback;
            if up
                && let Some(ipv6) = iface.ipv6.as_mut()
                && ipv6.is_enabled()
            {
                let addresses = ipv6.addresses.get_or_insert_with(Vec::new);
                if !loopback {
                    let link_local = with_interface_id(
                        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0),
                        eui64_id(record.index),
                    );
                    addresses.insert(0, IpAddrEntry::new(link_local.to_string(), 64));
                }
                if let Some(server) = server
                    && ready(record.v6_since, server)
                {
                    let dhcp = ipv6.is_dhcp();
                    let autoconf = ipv6.is_autoconf();
                    let token = ipv6.parsed_token().ok().flatten();
                    let auto = ipv6.auto.clone();
                    let addresses = ipv6.addresses.get_or_insert_with(Vec::new);
                    if dhcp {
                        addresses.push(
                            IpAddrEntry::new(server.lease_ipv6.to_string(), 128)
                                .with_lifetime(server.lifetime(), server.lifetime()),
                        );
                        if auto.dns() {
                            learned_dns.push(server.server_ipv6.to_string());
                        }
                    }
                    if autoconf {
                        let id = token.map(token_id).unwrap_or_else(|| eui64_id(record.index));
                        addresses.push(
                            IpAddrEntry::new(with_interface_id(server.ra_prefix, id).to_string(), 64)
                                .with_lifetime(server.lifetime(), server.lifetime()),
                        );
                        let router = server.ra_router.to_string();
                        if auto.gateway() {
                            learned_routes.push(learned_route(
                                "::/0",
                                router.clone(),
                                &name,
                                &auto,
                                RouteProtocol::Ra,
                            ));
                        }
                        if auto.routes() {
                            for dst in &server.ra_routes {
                                learned_routes.push(learned_route(
                                    dst,
                                    router.clone(),
                                    &name,
                                    &auto,
                                    RouteProtocol::Ra,
                                ));
                            }
                        }
                    }
                }
            }

            state.interfaces.push(iface);
        }

        state.routes.config = Some(self.routes.clone());
        let mut running = self.routes.clone();
        running.extend(learned_routes);
        state.routes.running = Some(running);

        state.route_rules.config = Some(self.rules.iter().map(|r| r.rule.clone()).collect());

        state.dns.config = self.dns.clone();
        let mut servers: Vec<String> = self
            .dns
            .as_ref()
            .map(|d| d.servers().to_vec())
            .unwrap_or_default();
        for server in learned_dns {
            if !servers.contains(&server) {
                servers.push(server);
            }
        }
        state.dns.running = Some(DnsConfig {
            server: Some(servers),
            search: Some(
                self.dns
                    .as_ref()
                    .map(|d| d.searches().to_vec())
                    .unwrap_or_default(),
            ),
        });

        state
    }
}

fn learned_route(
    destination: &str,
    gateway: String,
    dev: &str,
    auto: &AutoIpConfig,
    protocol: RouteProtocol,
) -> RouteEntry {
    let route = RouteEntry::new(destination)
        .via(gateway)
        .dev(dev)
        .metric(auto.auto_route_metric.unwrap_or(DEFAULT_LEARNED_METRIC))
        .protocol(protocol);
    match auto.table_id() {
        0 => route,
        table => route.table(table),
    }
}

/// Locally administered MAC address derived from the interface index.
fn synthesized_mac(index: u16) -> String {
    let [hi, lo] = index.to_be_bytes();
    format!("52:54:00:00:{:02x}:{:02x}", hi, lo)
}

/// Interface identifier derived from the interface index.
fn eui64_id(index: u16) -> [u16; 4] {
    [0x5054, 0x00ff, 0xfe00, index]
}

fn token_id(token: Ipv6Addr) -> [u16; 4] {
    let s = token.segments();
    [s[4], s[5], s[6], s[7]]
}

fn with_interface_id(prefix: Ipv6Addr, id: [u16; 4]) -> Ipv6Addr {
    let s = prefix.segments();
    Ipv6Addr::new(s[0], s[1], s[2], s[3], id[0], id[1], id[2], id[3])
}
