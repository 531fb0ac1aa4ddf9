//! Plan generation.
//!
//! A [`Plan`] is the ordered list of operations that turns the current state
//! into the target state. Operations are ordered so that each one can be
//! applied on its own:
//!
//! 1. rule and route removals,
//! 2. interface removals, ports before their controllers,
//! 3. interface creations and modifications, controllers before ports,
//! 4. route additions,
//! 5. rule additions,
//! 6. DNS replacement.
//!
//! Interfaces are compared on their configuration view: acquired leases,
//! lifetimes and link-local addresses never cause a change.

use std::collections::BTreeSet;
use std::fmt;

use crate::dynamic;
use crate::state::{
    DnsConfig, Interface, InterfaceType, IpConfig, NetworkState, RouteEntry, RouteRuleEntry,
};

/// Interface that owns rules no desired interface claims.
pub const LOOPBACK: &str = "lo";

/// A single step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create or modify an interface so it matches `iface`.
    UpsertInterface {
        /// Complete target configuration of the interface.
        iface: Interface,
        /// Whether the interface has to be created.
        create: bool,
    },
    /// Remove an interface.
    RemoveInterface {
        /// Interface name.
        name: String,
        /// Interface type.
        iface_type: InterfaceType,
    },
    /// Add a route.
    UpsertRoute(RouteEntry),
    /// Remove a route.
    RemoveRoute(RouteEntry),
    /// Add a routing rule.
    UpsertRule {
        /// The rule.
        rule: RouteRuleEntry,
        /// Interface whose profile carries the rule.
        owner: String,
    },
    /// Remove a routing rule.
    RemoveRule(RouteRuleEntry),
    /// Replace the static resolver configuration.
    ReplaceDns(DnsConfig),
}

impl Operation {
    /// Name of the interface this operation works on, if any.
    pub fn interface_name(&self) -> Option<&str> {
        match self {
            Self::UpsertInterface { iface, .. } => Some(&iface.name),
            Self::RemoveInterface { name, .. } => Some(name),
            Self::UpsertRoute(r) | Self::RemoveRoute(r) => r.next_hop_interface.as_deref(),
            Self::UpsertRule { owner, .. } => Some(owner),
            Self::RemoveRule(_) | Self::ReplaceDns(_) => None,
        }
    }

    /// Check if this operation removes something.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Self::RemoveInterface { .. } | Self::RemoveRoute(_) | Self::RemoveRule(_)
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpsertInterface { iface, create: true } => {
                write!(f, "+ interface {} ({})", iface.name, iface.iface_type())
            }
            Self::UpsertInterface { iface, create: false } => {
                write!(f, "~ interface {}", iface.name)
            }
            Self::RemoveInterface { name, iface_type } => {
                write!(f, "- interface {} ({})", name, iface_type)
            }
            Self::UpsertRoute(r) => write!(f, "+ route {}", r),
            Self::RemoveRoute(r) => write!(f, "- route {}", r),
            Self::UpsertRule { rule, owner } => write!(f, "+ rule {} (on {})", rule, owner),
            Self::RemoveRule(rule) => write!(f, "- rule {}", rule),
            Self::ReplaceDns(dns) => write!(
                f,
                "~ dns server [{}] search [{}]",
                dns.servers().join(", "),
                dns.searches().join(", ")
            ),
        }
    }
}

/// Ordered operations turning the current state into the target state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    operations: Vec<Operation>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no changes are needed.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.operations.len()
    }

    /// Get the operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Iterate the operations in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Names of the interfaces created, modified or removed.
    pub fn interfaces(&self) -> BTreeSet<&str> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::UpsertInterface { iface, .. } => Some(iface.name.as_str()),
                Operation::RemoveInterface { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Get a human-readable summary of the changes.
    pub fn summary(&self) -> String {
        if self.operations.is_empty() {
            return "No changes needed".to_string();
        }
        self.operations
            .iter()
            .map(|op| op.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// Return the configuration view of an interface.
///
/// Acquired leases of dynamic families are dropped, lifetimes stripped and
/// link-local addresses removed.
pub(crate) fn config_view(iface: &Interface) -> Interface {
    fn sanitize<T: IpConfig>(cfg: &mut T) {
        dynamic::drop_leases(cfg);
        if let Some(addresses) = cfg.addresses_mut() {
            addresses.retain(|a| !a.is_link_local());
            addresses.iter_mut().for_each(|a| a.strip_lifetime());
        }
        let addresses = cfg.addresses_mut();
        if addresses.as_ref().is_some_and(Vec::is_empty) {
            *addresses = None;
        }
    }

    let mut view = iface.clone();
    if let Some(ipv4) = view.ipv4.as_mut() {
        sanitize(ipv4);
    }
    if let Some(ipv6) = view.ipv6.as_mut() {
        sanitize(ipv6);
    }
    view
}

/// Compute the plan that turns `current` into `target`.
pub fn generate_plan(target: &NetworkState, current: &NetworkState) -> Plan {
    let mut plan = Plan::new();

    let current_rules: Vec<&RouteRuleEntry> = current.route_rules.config_rules().collect();
    let target_rules: Vec<&RouteRuleEntry> = target.route_rules.config_rules().collect();
    let current_routes: Vec<&RouteEntry> = current
        .routes
        .config_routes()
        .filter(|r| !r.is_auto())
        .collect();
    let target_routes: Vec<&RouteEntry> = target.routes.config_routes().collect();

    let removed: Vec<&Interface> = target
        .interfaces
        .iter()
        .filter(|i| i.is_absent() && current.get_interface(&i.name).is_some())
        .collect();
    let removed_names: BTreeSet<&str> = removed.iter().map(|i| i.name.as_str()).collect();

    // 1. Rule and route removals.
    for rule in &current_rules {
        if !target_rules.iter().any(|t| t.same_rule(rule)) {
            plan.push(Operation::RemoveRule((*rule).clone()));
        }
    }
    for route in &current_routes {
        let goes_with_iface = route
            .next_hop_interface
            .as_deref()
            .is_some_and(|dev| removed_names.contains(dev));
        if !goes_with_iface && !target_routes.iter().any(|t| t.same_route(route)) {
            plan.push(Operation::RemoveRoute((*route).clone()));
        }
    }

    // 2. Interface removals, ports first. Removing one end of a veth pair
    //    removes the other.
    let mut removals = removed;
    removals.sort_by_key(|i| i.iface_type().is_controller());
    let mut gone: BTreeSet<&str> = BTreeSet::new();
    for iface in removals {
        if !gone.insert(iface.name.as_str()) {
            continue;
        }
        if let Some(peer) = current
            .get_interface(&iface.name)
            .and_then(Interface::veth_peer)
        {
            gone.insert(peer);
        }
        plan.push(Operation::RemoveInterface {
            name: iface.name.clone(),
            iface_type: iface.iface_type(),
        });
    }

    // 3. Creations and modifications, controllers first.
    let mut upserts: Vec<(&Interface, bool)> = Vec::new();
    for iface in target.interfaces.iter().filter(|i| !i.is_absent()) {
        match current.get_interface(&iface.name) {
            None => upserts.push((iface, true)),
            Some(cur) if config_view(cur) != config_view(iface) => upserts.push((iface, false)),
            Some(_) => {}
        }
    }
    upserts.sort_by_key(|(i, _)| !i.iface_type().is_controller());
    let mut implicit: BTreeSet<&str> = BTreeSet::new();
    for (iface, create) in upserts {
        let create = create && !implicit.contains(iface.name.as_str());
        if create && let Some(peer) = iface.veth_peer() {
            implicit.insert(peer);
        }
        plan.push(Operation::UpsertInterface {
            iface: config_view(iface),
            create,
        });
    }

    // 4. Route additions.
    for route in &target_routes {
        if !current_routes.iter().any(|c| c.same_route(route)) {
            plan.push(Operation::UpsertRoute((*route).clone()));
        }
    }

    // 5. Rule additions.
    for rule in &target_rules {
        if !current_rules.iter().any(|c| c.same_rule(rule)) {
            let owner = rule_owner(rule, &plan, target);
            plan.push(Operation::UpsertRule {
                rule: (*rule).clone(),
                owner,
            });
        }
    }

    // 6. DNS.
    let target_dns = target.dns.config.clone().unwrap_or_default();
    let current_dns = current.dns.config.clone().unwrap_or_default();
    if !target_dns.same_as(&current_dns) {
        plan.push(Operation::ReplaceDns(target_dns));
    }

    plan
}

/// Pick the interface whose profile carries `rule`.
///
/// Interfaces configured by this plan come first, then any interface of
/// `target` routing into the rule's table, either statically or through its
/// auto route table. Without one the rule is stored on loopback.
fn rule_owner(rule: &RouteRuleEntry, plan: &Plan, target: &NetworkState) -> String {
    let table = rule.effective_table();
    let planned = plan.iter().find_map(|op| match op {
        Operation::UpsertRoute(r) if r.effective_table() == table => r.next_hop_interface.clone(),
        Operation::UpsertInterface { iface, .. } if auto_table_matches(iface, table) => {
            Some(iface.name.clone())
        }
        _ => None,
    });
    planned
        .or_else(|| {
            target
                .routes
                .config_routes()
                .filter(|r| !r.is_absent() && r.effective_table() == table)
                .find_map(|r| r.next_hop_interface.clone())
        })
        .or_else(|| {
            target
                .interfaces
                .iter()
                .find(|i| !i.is_absent() && auto_table_matches(i, table))
                .map(|i| i.name.clone())
        })
        .unwrap_or_else(|| LOOPBACK.to_string())
}

fn auto_table_matches(iface: &Interface, table: u32) -> bool {
    let v4 = iface
        .ipv4
        .as_ref()
        .is_some_and(|c| c.is_dynamic() && c.auto.table_id() == table);
    let v6 = iface
        .ipv6
        .as_ref()
        .is_some_and(|c| c.is_dynamic() && c.auto.table_id() == table);
    table != 0 && (v4 || v6)
}
