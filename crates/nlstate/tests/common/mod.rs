//! Common test utilities for integration tests.
//!
//! Provides a standard simulated host (`lo`, `eth1` with a DHCP server,
//! `eth2` without one) and helpers to inspect states.

use std::time::Duration;

use nlstate::NetState;
use nlstate::lab::{DhcpServer, SimulatedHost};
use nlstate::state::{Interface, InterfaceIpv4, InterfaceIpv6, IpAddrEntry, NetworkState};

pub const ETH1: &str = "eth1";
pub const ETH2: &str = "eth2";

/// Assert that a result failed with an error of the given class.
///
/// # Example
///
/// ```ignore
/// assert_err!(engine.apply(&desired).await, is_value_error);
/// ```
macro_rules! assert_err {
    ($result:expr, $class:ident) => {
        match $result {
            Ok(_) => panic!("expected {} error, got success", stringify!($class)),
            Err(e) => assert!(e.$class(), "unexpected error: {}", e),
        }
    };
}

/// Create the standard test host.
pub fn host() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH1)
        .with_ethernet(ETH2)
        .with_dhcp_server(ETH1, DhcpServer::standard())
}

/// Create an engine on the standard test host.
pub fn engine() -> NetState<SimulatedHost> {
    NetState::new(host())
}

/// Let simulated time pass so pending leases show up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(5)).await;
}

/// Get an interface, panicking with a useful message when it is missing.
pub fn iface<'a>(state: &'a NetworkState, name: &str) -> &'a Interface {
    state
        .get_interface(name)
        .unwrap_or_else(|| panic!("interface {} missing", name))
}

/// IPv4 configuration of an interface.
pub fn ipv4<'a>(state: &'a NetworkState, name: &str) -> &'a InterfaceIpv4 {
    iface(state, name)
        .ipv4
        .as_ref()
        .unwrap_or_else(|| panic!("{} has no ipv4 section", name))
}

/// IPv6 configuration of an interface.
pub fn ipv6<'a>(state: &'a NetworkState, name: &str) -> &'a InterfaceIpv6 {
    iface(state, name)
        .ipv6
        .as_ref()
        .unwrap_or_else(|| panic!("{} has no ipv6 section", name))
}

/// Address strings of an address list, without prefix.
pub fn ips(addresses: Option<&Vec<IpAddrEntry>>) -> Vec<String> {
    addresses
        .map(|a| a.iter().map(|e| e.ip.clone()).collect())
        .unwrap_or_default()
}

/// A desired document touching only `eth1`.
pub fn eth1(iface: Interface) -> NetworkState {
    NetworkState::new().interface(iface)
}
