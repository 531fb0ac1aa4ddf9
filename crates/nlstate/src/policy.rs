//! Resolution of family policy on the merged target.
//!
//! After merging, each affected interface is brought into its canonical
//! form:
//!
//! - a disabled family keeps nothing but `enabled: false`,
//! - with dynamic acquisition off, `auto-*` options, DHCP client options
//!   and the IPv6 token are cleared while `addr-gen-mode` is kept,
//! - with dynamic acquisition on, unset `auto-*` options default to true
//!   and the auto route table to the main table.
//!
//! Combinations that cannot work are rejected here, before anything is
//! applied.

use std::collections::BTreeSet;

use crate::merge;
use crate::state::{
    AutoIpConfig, Interface, InterfaceIpv4, InterfaceIpv6, IpConfig, IpFamily, NetworkState,
    IPV6_MIN_MTU,
};
use crate::{Error, Result};

/// Resolve family policy on every touched interface of `target` and check
/// the desired routes against the result.
pub fn resolve(
    target: &mut NetworkState,
    desired: &NetworkState,
    current: &NetworkState,
    touched: &BTreeSet<String>,
) -> Result<()> {
    for iface in target
        .interfaces
        .iter_mut()
        .filter(|i| touched.contains(&i.name) && !i.is_absent())
    {
        let des = merge::desired_for(desired, current, &iface.name);
        resolve_interface(iface, des)?;
    }
    check_routes(desired, target)
}

/// Reject dynamic acquisition when the backend only programs the kernel.
pub fn check_kernel_only(target: &NetworkState, touched: &BTreeSet<String>) -> Result<()> {
    for iface in target
        .interfaces
        .iter()
        .filter(|i| touched.contains(&i.name) && !i.is_absent())
    {
        let v4 = iface.ipv4.as_ref().is_some_and(IpConfig::is_dynamic);
        let v6 = iface.ipv6.as_ref().is_some_and(IpConfig::is_dynamic);
        if v4 || v6 {
            return Err(Error::not_supported(format!(
                "{}: DHCP and autoconf need a managing daemon and cannot be applied in kernel-only mode",
                iface.name
            )));
        }
    }
    Ok(())
}

fn resolve_interface(iface: &mut Interface, desired: Option<&Interface>) -> Result<()> {
    let name = iface.name.clone();

    let ipv4 = iface.ipv4.get_or_insert_with(InterfaceIpv4::disabled);
    if ipv4.is_enabled() {
        ipv4.dhcp.get_or_insert(false);
    }
    resolve_family(ipv4);

    let ipv6 = iface.ipv6.get_or_insert_with(InterfaceIpv6::disabled);
    resolve_ipv6(&name, ipv6, desired.and_then(|d| d.ipv6.as_ref()))?;
    resolve_family(ipv6);

    if iface.ipv6_enabled()
        && let Some(mtu) = iface.mtu
        && mtu < IPV6_MIN_MTU
    {
        return Err(Error::invalid(format!(
            "{}: MTU {} is below the IPv6 minimum of {}",
            name, mtu, IPV6_MIN_MTU
        )));
    }

    Ok(())
}

/// Canonicalize one family according to whether it is enabled and dynamic.
fn resolve_family<T: IpConfig>(cfg: &mut T) {
    if !cfg.is_enabled() {
        *cfg = T::disabled();
        return;
    }
    if cfg.is_dynamic() {
        cfg.auto_mut().fill_defaults();
    } else {
        *cfg.auto_mut() = AutoIpConfig::default();
        cfg.clear_dhcp_options();
    }
}

fn resolve_ipv6(iface: &str, cfg: &mut InterfaceIpv6, desired: Option<&InterfaceIpv6>) -> Result<()> {
    if !cfg.is_enabled() {
        return Ok(());
    }
    cfg.dhcp.get_or_insert(false);
    cfg.autoconf.get_or_insert(false);

    if cfg.is_autoconf() && !cfg.is_dhcp() {
        return Err(Error::not_supported(format!(
            "{}: IPv6 autoconf without DHCPv6 is not supported",
            iface
        )));
    }

    let requested = desired
        .map(InterfaceIpv6::parsed_token)
        .transpose()?
        .flatten();
    if requested.is_some() && !cfg.is_autoconf() {
        return Err(Error::invalid(format!(
            "{}: IPv6 token requires autoconf",
            iface
        )));
    }

    cfg.token = if cfg.is_autoconf() {
        cfg.parsed_token()?.map(|t| t.to_string())
    } else {
        None
    };
    Ok(())
}

/// Desired routes must point at an existing interface carrying their family.
fn check_routes(desired: &NetworkState, target: &NetworkState) -> Result<()> {
    for route in desired.routes.config_routes() {
        let Some(dev) = route.next_hop_interface.as_deref() else {
            continue;
        };
        let Some(iface) = target.get_interface(dev).filter(|i| !i.is_absent()) else {
            return Err(Error::invalid(format!(
                "route {}: next-hop-interface {} does not exist",
                route, dev
            )));
        };
        let enabled = match route.family() {
            Some(IpFamily::Ipv4) => iface.ipv4_enabled(),
            Some(IpFamily::Ipv6) => iface.ipv6_enabled(),
            None => true,
        };
        if !enabled {
            return Err(Error::invalid(format!(
                "route {}: {} is disabled on {}",
                route,
                route.family().map(|f| f.to_string()).unwrap_or_default(),
                dev
            )));
        }
    }
    Ok(())
}
