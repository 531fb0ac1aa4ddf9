//! Merging a desired document onto the current state.
//!
//! The desired document is partial: every field it omits keeps its current
//! value. Merging produces the complete *target* state the plan is computed
//! against.
//!
//! Rules applied here:
//!
//! - interfaces are matched by name, or by MAC address when their
//!   identifier says so; only virtual types can be created,
//! - `enabled` of an IP family is inferred from the presence of addresses
//!   or a dynamic method when the document leaves it out,
//! - address lists replace the current list wholesale, are deduplicated and
//!   never contain IPv6 link-local addresses,
//! - a controller's port list is authoritative and sets `controller` on the
//!   ports; a port's `controller` is reflected in the controller's list,
//! - routes and rules marked `absent` remove every current entry they match,
//!   present entries are added,
//! - DNS server and search lists are replaced independently.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::dynamic;
use crate::state::{
    DnsConfig, Interface, InterfaceIpv4, InterfaceIpv6, InterfaceState, IpConfig, NetworkState,
    RouteEntry, RouteRuleEntry,
};
use crate::{Error, Result};

/// Merge `desired` onto `current`, producing the target state.
///
/// Learned routes and DNS servers are not part of the target; routes and
/// DNS are expressed as configuration only.
pub fn merge_state(desired: &NetworkState, current: &NetworkState) -> Result<NetworkState> {
    let mut target = current.clone();
    target.routes.running = None;
    target.dns.running = None;

    let names = merge_interfaces(desired, current, &mut target)?;
    merge_routes(desired, current, &names, &mut target)?;
    merge_rules(desired, current, &mut target)?;
    merge_dns(desired, current, &mut target)?;

    Ok(target)
}

/// Names of the interfaces whose configuration the desired document
/// affects: interfaces it mentions, interfaces merging creates, and ports
/// whose controller changes.
pub fn touched_interfaces(
    desired: &NetworkState,
    current: &NetworkState,
    target: &NetworkState,
) -> Result<BTreeSet<String>> {
    let mut touched = BTreeSet::new();
    for des in &desired.interfaces {
        match resolve(des, current)? {
            Some(cur) => touched.insert(cur.name.clone()),
            None if !des.is_absent() => touched.insert(des.name.clone()),
            None => false,
        };
    }
    for iface in &target.interfaces {
        match current.get_interface(&iface.name) {
            None => {
                touched.insert(iface.name.clone());
            }
            Some(cur) if cur.controller != iface.controller => {
                touched.insert(iface.name.clone());
            }
            Some(_) => {}
        }
    }
    Ok(touched)
}

/// Find the desired entry that targets the interface named `name`.
pub(crate) fn desired_for<'a>(
    desired: &'a NetworkState,
    current: &NetworkState,
    name: &str,
) -> Option<&'a Interface> {
    desired.interfaces.iter().find(|des| {
        if des.is_matched_by_mac() {
            matches!(resolve(des, current), Ok(Some(cur)) if cur.name == name)
        } else {
            des.name == name
        }
    })
}

/// Find the current interface a desired entry refers to.
pub(crate) fn resolve<'a>(
    desired: &Interface,
    current: &'a NetworkState,
) -> Result<Option<&'a Interface>> {
    if !desired.is_matched_by_mac() {
        return Ok(current.get_interface(&desired.name));
    }

    let mac = desired.mac_address.as_deref().ok_or_else(|| {
        Error::invalid(format!(
            "{}: matching by mac-address requires mac-address",
            desired.name
        ))
    })?;
    let mut found = current.interfaces.iter().filter(|i| {
        i.mac_address
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(mac))
    });
    match (found.next(), found.next()) {
        (Some(_), Some(_)) => Err(Error::invalid(format!(
            "{}: MAC address {} matches more than one interface",
            desired.name, mac
        ))),
        (first, _) => Ok(first),
    }
}

// ============================================================================
// Interfaces
// ============================================================================

/// Merge every desired interface into `target`.
///
/// Returns the mapping from desired names to target names.
fn merge_interfaces(
    desired: &NetworkState,
    current: &NetworkState,
    target: &mut NetworkState,
) -> Result<HashMap<String, String>> {
    let mut names = HashMap::new();
    let mut created = Vec::new();

    for des in &desired.interfaces {
        let existing = resolve(des, current)?;

        if des.is_absent() {
            match existing {
                Some(cur) => {
                    names.insert(des.name.clone(), cur.name.clone());
                    mark_absent(target, &cur.name);
                }
                None => debug!(iface = %des.name, "interface to remove does not exist"),
            }
            continue;
        }

        let merged = match existing {
            Some(cur) => {
                let des_type = des.iface_type();
                if des_type != crate::state::InterfaceType::Unknown
                    && des_type != cur.iface_type()
                {
                    return Err(Error::invalid(format!(
                        "{}: interface exists with type {}, cannot change it to {}",
                        cur.name,
                        cur.iface_type(),
                        des_type
                    )));
                }
                merge_interface(des, Some(cur))?
            }
            None => {
                if des.is_matched_by_mac() {
                    return Err(Error::InterfaceNotFound {
                        name: des.name.clone(),
                    });
                }
                if !des.iface_type().is_virtual() {
                    return Err(Error::invalid(format!(
                        "{}: interface of type {} does not exist and cannot be created",
                        des.name,
                        des.iface_type()
                    )));
                }
                created.push(des.name.clone());
                merge_interface(des, None)?
            }
        };

        names.insert(des.name.clone(), merged.name.clone());
        match target.get_interface_mut(&merged.name) {
            Some(slot) => *slot = merged,
            None => target.interfaces.push(merged),
        }
    }

    create_veth_peers(target, &created);
    link_ports(desired, &names, target)?;

    Ok(names)
}

fn mark_absent(target: &mut NetworkState, name: &str) {
    let peer = target
        .get_interface(name)
        .and_then(|i| i.veth_peer())
        .map(str::to_string);
    for n in std::iter::once(name.to_string()).chain(peer) {
        if let Some(iface) = target.get_interface_mut(&n) {
            iface.state = Some(InterfaceState::Absent);
        }
    }
}

/// Merge one desired interface onto its current counterpart.
fn merge_interface(des: &Interface, cur: Option<&Interface>) -> Result<Interface> {
    let mut merged = match cur {
        Some(cur) => cur.clone(),
        None => Interface::new(des.name.clone(), des.kind.clone()),
    };
    merged.update(des);
    if merged.state.is_none() {
        merged.state = Some(InterfaceState::Up);
    }

    merged.ipv4 = merge_ip::<InterfaceIpv4>(
        des.ipv4.as_ref(),
        cur.and_then(|c| c.ipv4.as_ref()),
        &merged.name,
    )?;
    merged.ipv6 = merge_ip::<InterfaceIpv6>(
        des.ipv6.as_ref(),
        cur.and_then(|c| c.ipv6.as_ref()),
        &merged.name,
    )?;

    Ok(merged)
}

/// Merge one IP family.
fn merge_ip<T: IpConfig>(desired: Option<&T>, current: Option<&T>, iface: &str) -> Result<Option<T>> {
    let Some(des) = desired else {
        let mut kept = current.cloned().unwrap_or_else(T::disabled);
        dynamic::apply_precedence(&mut kept, iface);
        return Ok(Some(kept));
    };

    let mut merged = current.cloned().unwrap_or_default();
    merged.update(des);

    if des.enabled().is_none() {
        let implied =
            des.requests_dynamic() || des.addresses().is_some_and(|a| !a.is_empty());
        if implied {
            merged.set_enabled(true);
        } else if merged.enabled().is_none() {
            merged.set_enabled(false);
        }
    }

    if des.addresses().is_some() {
        let list = merged.addresses_mut().take().unwrap_or_default();
        let mut normalized: Vec<_> = Vec::with_capacity(list.len());
        for mut entry in list {
            entry
                .normalize(T::FAMILY)
                .map_err(|e| Error::invalid(format!("{}: {}: {}", iface, T::FAMILY, e)))?;
            if normalized.iter().any(|e| entry.same_address(e)) {
                debug!(iface, address = %entry, "dropping duplicate address");
                continue;
            }
            normalized.push(entry);
        }
        *merged.addresses_mut() = Some(normalized);
    }

    dynamic::convert_leases_on_disable(&mut merged, des, current, iface);
    dynamic::apply_precedence(&mut merged, iface);

    Ok(Some(merged))
}

fn create_veth_peers(target: &mut NetworkState, created: &[String]) {
    for name in created {
        let Some(peer) = target
            .get_interface(name)
            .and_then(|i| i.veth_peer())
            .map(str::to_string)
        else {
            continue;
        };
        if target.get_interface(&peer).is_none() {
            debug!(iface = %name, peer = %peer, "adding veth peer");
            let mut iface = Interface::veth(peer, name.clone()).up();
            iface.ipv4 = Some(InterfaceIpv4::disabled());
            iface.ipv6 = Some(InterfaceIpv6::disabled());
            target.interfaces.push(iface);
        }
    }
}

/// Resolve controller/port relations in both directions.
fn link_ports(
    desired: &NetworkState,
    names: &HashMap<String, String>,
    target: &mut NetworkState,
) -> Result<()> {
    let present = desired.interfaces.iter().filter(|i| !i.is_absent());

    // Port lists given on controllers are authoritative.
    for des in present.clone() {
        let Some(ports) = des.ports() else { continue };
        let ctrl = names.get(&des.name).unwrap_or(&des.name).clone();
        for port in ports {
            let iface = target
                .get_interface_mut(port)
                .filter(|p| !p.is_absent())
                .ok_or_else(|| {
                    Error::invalid(format!("{}: port {} does not exist", ctrl, port))
                })?;
            iface.controller = Some(ctrl.clone());
        }
        for iface in &mut target.interfaces {
            if iface.controller.as_deref() == Some(ctrl.as_str()) && !ports.contains(&iface.name)
            {
                iface.controller = None;
            }
        }
    }

    // A controller given on a port attaches it, an empty one detaches it.
    for des in present {
        let Some(ctrl) = des.controller.as_deref() else {
            continue;
        };
        let name = names.get(&des.name).unwrap_or(&des.name).clone();
        if ctrl.is_empty() {
            if let Some(iface) = target.get_interface_mut(&name) {
                iface.controller = None;
            }
            continue;
        }

        let controller = target
            .get_interface(ctrl)
            .filter(|c| !c.is_absent())
            .ok_or_else(|| {
                Error::invalid(format!("{}: controller {} does not exist", name, ctrl))
            })?;
        if !controller.iface_type().is_controller() {
            return Err(Error::invalid(format!(
                "{}: {} of type {} cannot be a controller",
                name,
                ctrl,
                controller.iface_type()
            )));
        }
        if let Some(ports) = desired.get_interface(ctrl).and_then(Interface::ports)
            && !ports.contains(&name)
        {
            return Err(Error::invalid(format!(
                "{}: controller {} is set but {} does not list it as a port",
                name, ctrl, ctrl
            )));
        }
        if let Some(iface) = target.get_interface_mut(&name) {
            iface.controller = Some(ctrl.to_string());
        }
    }

    // Ports of removed controllers are released.
    let removed: BTreeSet<String> = target
        .interfaces
        .iter()
        .filter(|i| i.is_absent())
        .map(|i| i.name.clone())
        .collect();
    for iface in &mut target.interfaces {
        if iface.controller.as_ref().is_some_and(|c| removed.contains(c)) {
            iface.controller = None;
        }
    }

    sync_port_lists(target);
    Ok(())
}

/// Rebuild each controller's port list from the ports' `controller` field.
pub(crate) fn sync_port_lists(state: &mut NetworkState) {
    let mut ports: HashMap<String, Vec<String>> = HashMap::new();
    for iface in state.interfaces.iter().filter(|i| !i.is_absent()) {
        if let Some(ctrl) = &iface.controller {
            ports.entry(ctrl.clone()).or_default().push(iface.name.clone());
        }
    }
    for iface in &mut state.interfaces {
        let name = iface.name.clone();
        if let Some(list) = iface.ports_mut() {
            let mut members = ports.remove(&name).unwrap_or_default();
            members.sort();
            if list.is_some() || !members.is_empty() {
                *list = Some(members);
            }
        }
    }
}

// ============================================================================
// Routes, rules, DNS
// ============================================================================

fn merge_routes(
    desired: &NetworkState,
    current: &NetworkState,
    names: &HashMap<String, String>,
    target: &mut NetworkState,
) -> Result<()> {
    let mut config: Vec<RouteEntry> = current
        .routes
        .config_routes()
        .filter(|r| !r.is_auto())
        .cloned()
        .collect();

    // Routes on interfaces being removed or losing the route's family go
    // away with them.
    config.retain(|r| {
        let Some(dev) = r.next_hop_interface.as_deref() else {
            return true;
        };
        let affected = names.values().any(|n| n == dev)
            || target.get_interface(dev).is_some_and(Interface::is_absent);
        if !affected {
            return true;
        }
        let keep = route_allowed(target, r);
        if !keep {
            debug!(route = %r, "dropping route of removed or disabled interface");
        }
        keep
    });

    if let Some(wanted) = &desired.routes.config {
        let mut normalized = Vec::with_capacity(wanted.len());
        for route in wanted {
            let mut route = route.clone();
            route
                .normalize()
                .map_err(|e| Error::invalid(format!("route {}: {}", route, e)))?;
            normalized.push(route);
        }

        for absent in normalized.iter().filter(|r| r.is_absent()) {
            config.retain(|r| {
                let hit = absent.matches(r);
                if hit {
                    debug!(route = %r, "removing route");
                }
                !hit
            });
        }
        for mut route in normalized.into_iter().filter(|r| !r.is_absent()) {
            route.protocol = None;
            if !config.iter().any(|r| r.same_route(&route)) {
                config.push(route);
            }
        }
    }

    target.routes.config = Some(config);
    Ok(())
}

/// Check that a route's interface exists and carries the route's family.
pub(crate) fn route_allowed(target: &NetworkState, route: &RouteEntry) -> bool {
    let Some(iface) = route
        .next_hop_interface
        .as_deref()
        .and_then(|dev| target.get_interface(dev))
        .filter(|i| !i.is_absent())
    else {
        return false;
    };
    match route.family() {
        Some(crate::state::IpFamily::Ipv4) => iface.ipv4_enabled(),
        Some(crate::state::IpFamily::Ipv6) => iface.ipv6_enabled(),
        None => true,
    }
}

fn merge_rules(
    desired: &NetworkState,
    current: &NetworkState,
    target: &mut NetworkState,
) -> Result<()> {
    let mut config: Vec<RouteRuleEntry> = current.route_rules.config_rules().cloned().collect();

    if let Some(wanted) = &desired.route_rules.config {
        let mut normalized = Vec::with_capacity(wanted.len());
        for rule in wanted {
            let mut rule = rule.clone();
            rule.normalize()
                .map_err(|e| Error::invalid(format!("route rule {}: {}", rule, e)))?;
            normalized.push(rule);
        }

        for absent in normalized.iter().filter(|r| r.is_absent()) {
            config.retain(|r| !absent.matches(r));
        }
        for rule in normalized.into_iter().filter(|r| !r.is_absent()) {
            if !config.iter().any(|r| r.same_rule(&rule)) {
                config.push(rule);
            }
        }
    }

    target.route_rules.config = Some(config);
    Ok(())
}

fn merge_dns(
    desired: &NetworkState,
    current: &NetworkState,
    target: &mut NetworkState,
) -> Result<()> {
    let mut config = current.dns.config.clone().unwrap_or_default();
    if let Some(wanted) = &desired.dns.config {
        let mut wanted = wanted.clone();
        wanted
            .normalize()
            .map_err(|e| Error::invalid(format!("dns-resolver: {}", e)))?;
        config.update(&wanted);
    }
    target.dns.config = Some(DnsConfig {
        server: Some(config.servers().to_vec()),
        search: Some(config.searches().to_vec()),
    });
    Ok(())
}
