//! Post-apply verification.
//!
//! After a plan is applied the observed state is compared against the
//! expected state with relaxed equality:
//!
//! - address lifetimes, `auto-*` options and IPv6 link-local addresses are
//!   ignored on both sides,
//! - families without dynamic acquisition compare addresses in order,
//!   dynamic families only require the expected addresses to be present,
//! - port lists compare as sets,
//! - routes are checked on the verified interfaces only, rules and DNS only
//!   when the desired document mentions them.

use std::collections::BTreeSet;
use std::fmt;

use crate::state::{
    DnsConfig, Interface, InterfaceIpv4, InterfaceIpv6, InterfaceState, IpAddrEntry, IpConfig,
    NetworkState, RouteEntry, RouteRuleEntry, WaitIp,
};

/// A single mismatch between expected and observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    /// Dotted path of the mismatching field, e.g. `interfaces.eth1.mtu`.
    pub path: String,
    /// Expected value.
    pub expected: String,
    /// Observed value.
    pub observed: String,
}

impl Difference {
    /// Create a new difference.
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.path, self.expected, self.observed
        )
    }
}

/// All mismatches found by one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// The mismatches, in the order they were found.
    pub differences: Vec<Difference>,
}

impl VerificationReport {
    /// Check if nothing mismatched.
    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    /// Number of mismatches.
    pub fn len(&self) -> usize {
        self.differences.len()
    }

    /// Find the mismatch reported for `path`.
    pub fn get(&self, path: &str) -> Option<&Difference> {
        self.differences.iter().find(|d| d.path == path)
    }

    fn push(
        &mut self,
        path: impl Into<String>,
        expected: impl fmt::Display,
        observed: impl fmt::Display,
    ) {
        self.differences.push(Difference::new(
            path,
            expected.to_string(),
            observed.to_string(),
        ));
    }

    fn check<T: PartialEq + fmt::Debug>(&mut self, path: String, expected: &T, observed: &T) {
        if expected != observed {
            self.push(path, format!("{:?}", expected), format!("{:?}", observed));
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.differences.is_empty() {
            return write!(f, "no differences");
        }
        let lines: Vec<String> = self.differences.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", lines.join("; "))
    }
}

/// Reduce the target state to what a transaction has to verify.
///
/// Only touched interfaces and interfaces being removed are kept. Routes are
/// kept for those interfaces and for the interfaces desired routes point at.
/// Rules and DNS are kept when the desired document sets them.
pub fn expected_state(
    target: &NetworkState,
    desired: &NetworkState,
    touched: &BTreeSet<String>,
) -> NetworkState {
    let interfaces: Vec<Interface> = target
        .interfaces
        .iter()
        .filter(|i| i.is_absent() || touched.contains(&i.name))
        .cloned()
        .collect();

    let mut scope: BTreeSet<&str> = touched.iter().map(String::as_str).collect();
    scope.extend(
        desired
            .routes
            .config_routes()
            .filter_map(|r| r.next_hop_interface.as_deref()),
    );

    let mut expected = NetworkState {
        interfaces,
        ..Default::default()
    };
    expected.routes.config = Some(
        target
            .routes
            .config_routes()
            .filter(|r| {
                r.next_hop_interface
                    .as_deref()
                    .is_some_and(|dev| scope.contains(dev))
            })
            .cloned()
            .collect(),
    );
    if desired.route_rules.config.is_some() {
        expected.route_rules.config = Some(
            target
                .route_rules
                .config_rules()
                .filter(|r| !r.is_absent())
                .cloned()
                .collect(),
        );
    }
    if desired.dns.config.is_some() {
        expected.dns.config = Some(target.dns.config.clone().unwrap_or_default());
    }
    expected
}

/// Compare `observed` against `expected`.
pub fn verify(expected: &NetworkState, observed: &NetworkState) -> Result<(), VerificationReport> {
    let mut report = VerificationReport::default();

    for iface in &expected.interfaces {
        verify_interface(&mut report, iface, observed.get_interface(&iface.name));
    }
    if let Some(routes) = &expected.routes.config {
        verify_routes(&mut report, expected, routes, observed);
    }
    if let Some(rules) = &expected.route_rules.config {
        verify_rules(&mut report, rules, observed);
    }
    if let Some(dns) = &expected.dns.config {
        verify_dns(&mut report, dns, observed.dns.config.as_ref());
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(report)
    }
}

fn verify_interface(report: &mut VerificationReport, expected: &Interface, observed: Option<&Interface>) {
    let path = format!("interfaces.{}", expected.name);
    let observed = match (expected.is_absent(), observed) {
        (true, None) => return,
        (true, Some(_)) => {
            report.push(path, "absent", "present");
            return;
        }
        (false, None) => {
            report.push(path, "present", "absent");
            return;
        }
        (false, Some(o)) => o,
    };

    let ty = expected.iface_type();
    if ty != crate::state::InterfaceType::Unknown {
        report.check(format!("{}.type", path), &ty, &observed.iface_type());
    }
    let link = |i: &Interface| {
        if i.is_up() {
            InterfaceState::Up
        } else {
            InterfaceState::Down
        }
    };
    if expected.state.is_some() {
        report.check(format!("{}.state", path), &link(expected), &link(observed));
    }
    if expected.mtu.is_some() {
        report.check(format!("{}.mtu", path), &expected.mtu, &observed.mtu);
    }
    if let Some(mac) = &expected.mac_address {
        let same = observed
            .mac_address
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(mac));
        if !same {
            report.push(
                format!("{}.mac-address", path),
                mac,
                observed.mac_address.as_deref().unwrap_or("none"),
            );
        }
    }
    let controller = |i: &Interface| i.controller.clone().filter(|c| !c.is_empty());
    if expected.controller.is_some() {
        report.check(
            format!("{}.controller", path),
            &controller(expected),
            &controller(observed),
        );
    }
    if let Some(ports) = expected.ports() {
        let want: BTreeSet<&String> = ports.iter().collect();
        let have: BTreeSet<&String> = observed.ports().unwrap_or_default().iter().collect();
        report.check(format!("{}.ports", path), &want, &have);
    }
    if let Some(peer) = expected.veth_peer() {
        report.check(format!("{}.veth.peer", path), &Some(peer), &observed.veth_peer());
    }

    if let Some(ipv4) = &expected.ipv4 {
        verify_ipv4(report, &path, ipv4, observed.ipv4.as_ref());
    }
    if let Some(ipv6) = &expected.ipv6 {
        verify_ipv6(report, &path, ipv6, observed.ipv6.as_ref());
    }
    if let Some(wait_ip) = expected.wait_ip
        && expected.is_up()
    {
        verify_wait_ip(report, &path, wait_ip, observed);
    }
}

/// Checks shared by both families. Returns false when the family is
/// disabled and nothing else needs checking.
fn verify_family<T: IpConfig>(
    report: &mut VerificationReport,
    path: &str,
    expected: &T,
    observed: Option<&T>,
) -> bool {
    let disabled = T::disabled();
    let observed = observed.unwrap_or(&disabled);
    report.check(
        format!("{}.enabled", path),
        &expected.is_enabled(),
        &observed.is_enabled(),
    );
    if !expected.is_enabled() || !observed.is_enabled() {
        return false;
    }

    let want = expected.static_addresses();
    let have = visible_addresses(observed);
    let matched = if expected.is_dynamic() {
        want.iter().all(|w| have.iter().any(|h| h.same_address(w)))
    } else {
        want.len() == have.len() && want.iter().zip(&have).all(|(w, h)| w.same_address(h))
    };
    if !matched {
        report.push(
            format!("{}.address", path),
            format_addresses(&want),
            format_addresses(&have),
        );
    }
    true
}

fn verify_ipv4(
    report: &mut VerificationReport,
    iface_path: &str,
    expected: &InterfaceIpv4,
    observed: Option<&InterfaceIpv4>,
) {
    let path = format!("{}.ipv4", iface_path);
    if !verify_family(report, &path, expected, observed) {
        return;
    }
    let Some(observed) = observed else {
        return;
    };
    report.check(format!("{}.dhcp", path), &expected.is_dhcp(), &observed.is_dhcp());
    if expected.dhcp_client_id.is_some() {
        report.check(
            format!("{}.dhcp-client-id", path),
            &expected.dhcp_client_id,
            &observed.dhcp_client_id,
        );
    }
}

fn verify_ipv6(
    report: &mut VerificationReport,
    iface_path: &str,
    expected: &InterfaceIpv6,
    observed: Option<&InterfaceIpv6>,
) {
    let path = format!("{}.ipv6", iface_path);
    if !verify_family(report, &path, expected, observed) {
        return;
    }
    let Some(observed) = observed else {
        return;
    };
    report.check(format!("{}.dhcp", path), &expected.is_dhcp(), &observed.is_dhcp());
    report.check(
        format!("{}.autoconf", path),
        &expected.is_autoconf(),
        &observed.is_autoconf(),
    );
    if expected.dhcp_duid.is_some() {
        report.check(
            format!("{}.dhcp-duid", path),
            &expected.dhcp_duid,
            &observed.dhcp_duid,
        );
    }
    if expected.token.is_some() {
        let token = |c: &InterfaceIpv6| c.parsed_token().ok().flatten();
        report.check(format!("{}.token", path), &token(expected), &token(observed));
    }
    if expected.addr_gen_mode.is_some() {
        report.check(
            format!("{}.addr-gen-mode", path),
            &expected.addr_gen_mode,
            &observed.addr_gen_mode,
        );
    }
}

fn verify_wait_ip(report: &mut VerificationReport, path: &str, wait_ip: WaitIp, observed: &Interface) {
    let v4 = observed
        .ipv4
        .as_ref()
        .is_some_and(|c| c.is_enabled() && !visible_addresses(c).is_empty());
    let v6 = observed
        .ipv6
        .as_ref()
        .is_some_and(|c| c.is_enabled() && !visible_addresses(c).is_empty());
    let ready = match wait_ip {
        WaitIp::Any => v4 || v6,
        WaitIp::Ipv4 => v4,
        WaitIp::Ipv6 => v6,
        WaitIp::Ipv4AndIpv6 => v4 && v6,
    };
    if !ready {
        let have = match (v4, v6) {
            (true, true) => "ipv4+ipv6",
            (true, false) => "ipv4",
            (false, true) => "ipv6",
            (false, false) => "none",
        };
        let want = serde_json::to_value(wait_ip)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        report.push(format!("{}.wait-ip", path), want, have);
    }
}

fn verify_routes(
    report: &mut VerificationReport,
    expected: &NetworkState,
    routes: &[RouteEntry],
    observed: &NetworkState,
) {
    let mut scope: BTreeSet<&str> = expected
        .interfaces
        .iter()
        .filter(|i| !i.is_absent())
        .map(|i| i.name.as_str())
        .collect();
    scope.extend(routes.iter().filter_map(|r| r.next_hop_interface.as_deref()));

    let have: Vec<&RouteEntry> = observed
        .routes
        .config_routes()
        .filter(|r| !r.is_auto())
        .filter(|r| {
            r.next_hop_interface
                .as_deref()
                .is_some_and(|dev| scope.contains(dev))
        })
        .collect();

    for route in routes {
        if !have.iter().any(|h| h.same_route(route)) {
            report.push("routes.config", route, "missing");
        }
    }
    for route in &have {
        if !routes.iter().any(|r| r.same_route(route)) {
            report.push("routes.config", "nothing", route);
        }
    }
}

fn verify_rules(report: &mut VerificationReport, rules: &[RouteRuleEntry], observed: &NetworkState) {
    let have: Vec<&RouteRuleEntry> = observed.route_rules.config_rules().collect();
    for rule in rules {
        if !have.iter().any(|h| h.same_rule(rule)) {
            report.push("route-rules.config", rule, "missing");
        }
    }
    for rule in &have {
        if !rules.iter().any(|r| r.same_rule(rule)) {
            report.push("route-rules.config", "nothing", rule);
        }
    }
}

fn verify_dns(report: &mut VerificationReport, expected: &DnsConfig, observed: Option<&DnsConfig>) {
    let empty = DnsConfig::default();
    let observed = observed.unwrap_or(&empty);
    if expected.servers() != observed.servers() {
        report.push(
            "dns-resolver.config.server",
            expected.servers().join(", "),
            observed.servers().join(", "),
        );
    }
    if expected.searches() != observed.searches() {
        report.push(
            "dns-resolver.config.search",
            expected.searches().join(", "),
            observed.searches().join(", "),
        );
    }
}

/// Observed addresses that take part in comparison: everything but
/// link-local.
fn visible_addresses<T: IpConfig>(cfg: &T) -> Vec<&IpAddrEntry> {
    cfg.addresses()
        .map(|a| a.iter().filter(|e| !e.is_link_local()).collect())
        .unwrap_or_default()
}

fn format_addresses(addresses: &[&IpAddrEntry]) -> String {
    let list: Vec<String> = addresses
        .iter()
        .map(|a| format!("{}/{}", a.ip, a.prefix_length))
        .collect();
    format!("[{}]", list.join(", "))
}
