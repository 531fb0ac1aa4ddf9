//! Tracking of dynamically acquired addresses.
//!
//! An address carrying a finite lifetime was handed out by DHCP or learned
//! from a router advertisement. While dynamic acquisition is on for its
//! family such an address is owned by the client and never configured
//! statically. When acquisition is switched off without a replacement
//! address list, the acquired addresses are kept as static ones so the
//! host stays reachable.

use tracing::{debug, info};

use crate::state::{IpAddrEntry, IpConfig};

/// Convert the leases of `current` into static addresses when `merged`
/// turns dynamic acquisition off and `desired` gives no address list.
///
/// Returns the number of converted addresses.
pub(crate) fn convert_leases_on_disable<T: IpConfig>(
    merged: &mut T,
    desired: &T,
    current: Option<&T>,
    iface: &str,
) -> usize {
    let Some(current) = current else {
        return 0;
    };
    if !current.is_dynamic()
        || merged.is_dynamic()
        || !merged.is_enabled()
        || desired.addresses().is_some()
    {
        return 0;
    }

    let converted: Vec<IpAddrEntry> = current
        .addresses()
        .into_iter()
        .flatten()
        .filter(|a| !a.is_link_local())
        .cloned()
        .map(|mut a| {
            a.strip_lifetime();
            a
        })
        .collect();
    let leased = current.leased_addresses().len();
    if leased > 0 {
        info!(
            iface,
            family = %T::FAMILY,
            count = leased,
            "dynamic configuration disabled, keeping acquired addresses as static"
        );
    }
    *merged.addresses_mut() = Some(converted);
    leased
}

/// Apply the static/dynamic precedence rules to an address list.
///
/// Link-local addresses are kernel managed and always removed. When
/// acquisition is on, addresses carrying a lifetime are dropped; otherwise
/// every lifetime is stripped. Static addresses without lifetime coexist
/// with dynamic acquisition.
pub(crate) fn apply_precedence<T: IpConfig>(cfg: &mut T, iface: &str) {
    let dynamic = cfg.is_dynamic();
    let Some(addresses) = cfg.addresses_mut() else {
        return;
    };

    addresses.retain(|a| !a.is_link_local());
    if dynamic {
        let before = addresses.len();
        addresses.retain(|a| !a.is_dynamic());
        let dropped = before - addresses.len();
        if dropped > 0 {
            debug!(
                iface,
                family = %T::FAMILY,
                dropped,
                "ignoring addresses with lifetime while dynamic configuration is on"
            );
        }
    } else {
        addresses.iter_mut().for_each(IpAddrEntry::strip_lifetime);
    }
}

/// Remove addresses with a finite lifetime from dynamically configured
/// families, leaving every other address in place.
pub(crate) fn drop_leases<T: IpConfig>(cfg: &mut T) {
    if !cfg.is_dynamic() {
        return;
    }
    if let Some(addresses) = cfg.addresses_mut() {
        addresses.retain(|a| !a.is_dynamic());
    }
}
