//! DHCP and autoconf tests.

use std::time::Duration;

use nlstate::state::{
    AddrGenMode, AutoIpConfig, Interface, InterfaceIpv4, InterfaceIpv6, IpAddrEntry, IpConfig,
    NetworkState, RouteEntry, RouteProtocol, WaitIp,
};
use nlstate::{ApplyOptions, Result};
use tokio::time::Instant;

use crate::common::{self, ETH1, ETH2};

fn dhcp_eth1() -> NetworkState {
    common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .wait_ip(WaitIp::Ipv4)
            .with_ipv4(InterfaceIpv4::with_dhcp()),
    )
}

fn running_route<'a>(state: &'a NetworkState, destination: &str) -> Option<&'a RouteEntry> {
    state
        .routes
        .running
        .iter()
        .flatten()
        .find(|r| r.destination.as_deref() == Some(destination))
}

fn running_dns(state: &NetworkState) -> Vec<String> {
    state
        .dns
        .running
        .as_ref()
        .map(|d| d.servers().to_vec())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn test_dhcpv4_end_to_end() -> Result<()> {
    let engine = common::engine();

    let state = engine.apply(&dhcp_eth1()).await?;

    let ipv4 = common::ipv4(&state, ETH1);
    assert!(ipv4.is_dhcp());
    let leases = ipv4.leased_addresses();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].ip, "192.0.2.200");
    assert_eq!(leases[0].prefix_length, 24);
    assert_eq!(leases[0].valid_lifetime.as_deref(), Some("172800sec"));

    let gateway = running_route(&state, "0.0.0.0/0").expect("default route");
    assert_eq!(gateway.next_hop_address.as_deref(), Some("192.0.2.251"));
    assert_eq!(gateway.protocol, Some(RouteProtocol::Dhcp));
    assert!(running_route(&state, "198.51.100.0/24").is_some());
    assert!(running_dns(&state).contains(&"192.0.2.251".to_string()));

    // Auto options are filled in while DHCP is on.
    assert_eq!(ipv4.auto.auto_dns, Some(true));
    assert_eq!(ipv4.auto.auto_gateway, Some(true));
    assert_eq!(ipv4.auto.auto_routes, Some(true));

    // The persistent view carries none of the learned data.
    let config = engine.show_running_config().await?;
    assert!(common::ips(common::ipv4(&config, ETH1).addresses.as_ref()).is_empty());
    assert_eq!(config.routes.config_routes().count(), 0);
    assert!(config.routes.running.is_none());
    assert!(config.dns.config.as_ref().is_some_and(|d| d.is_empty()));
    assert!(config.dns.running.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wait_ip_holds_until_lease() -> Result<()> {
    let engine = common::engine();
    let started = Instant::now();

    engine.apply(&dhcp_eth1()).await?;

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_without_wait_ip_returns_before_lease() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv4(InterfaceIpv4::with_dhcp()),
    );

    let state = engine.apply(&desired).await?;
    assert!(common::ipv4(&state, ETH1).leased_addresses().is_empty());

    common::settle().await;
    let state = engine.show().await?;
    assert_eq!(common::ipv4(&state, ETH1).leased_addresses().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_verify_returns_immediately() -> Result<()> {
    let engine = common::engine();
    let started = Instant::now();

    let state = engine
        .apply_with_options(&dhcp_eth1(), ApplyOptions::default().no_verify())
        .await?;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(common::ipv4(&state, ETH1).is_dhcp());
    assert!(common::ipv4(&state, ETH1).leased_addresses().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dhcp_off_keeps_lease_as_static() -> Result<()> {
    let engine = common::engine();
    engine.apply(&dhcp_eth1()).await?;

    let desired = common::eth1(Interface::ethernet(ETH1).with_ipv4(InterfaceIpv4::new().dhcp(false)));
    let state = engine.apply(&desired).await?;

    let ipv4 = common::ipv4(&state, ETH1);
    assert!(ipv4.is_enabled());
    assert!(!ipv4.is_dhcp());
    assert_eq!(
        ipv4.addresses,
        Some(vec![IpAddrEntry::new("192.0.2.200", 24)])
    );
    assert!(ipv4.auto.is_empty());
    assert!(running_route(&state, "0.0.0.0/0").is_none());
    assert!(!running_dns(&state).contains(&"192.0.2.251".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auto_options_hidden_when_static() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1).up().with_ipv4(
            InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.5", 24)]).auto_options(
                AutoIpConfig {
                    auto_dns: Some(false),
                    auto_table_id: Some(100),
                    ..Default::default()
                },
            ),
        ),
    );

    let state = engine.apply(&desired).await?;

    assert!(common::ipv4(&state, ETH1).auto.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auto_options_control_learned_data() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1).up().wait_ip(WaitIp::Ipv4).with_ipv4(
            InterfaceIpv4::with_dhcp().auto_options(AutoIpConfig {
                auto_dns: Some(false),
                auto_gateway: Some(false),
                auto_table_id: Some(100),
                auto_route_metric: Some(50),
                ..Default::default()
            }),
        ),
    );

    let state = engine.apply(&desired).await?;

    assert!(running_route(&state, "0.0.0.0/0").is_none());
    assert!(running_dns(&state).is_empty());
    let route = running_route(&state, "198.51.100.0/24").expect("classless route");
    assert_eq!(route.table_id, Some(100));
    assert_eq!(route.metric, Some(50));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_addresses_dropped_under_dhcp() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1).up().with_ipv4(
            InterfaceIpv4::with_dhcp()
                .address(IpAddrEntry::new("192.0.2.251", 24).with_lifetime("60sec", "60sec"))
                .address(IpAddrEntry::new("192.0.2.252", 24)),
        ),
    );

    engine.apply(&desired).await?;
    common::settle().await;
    let state = engine.show().await?;

    let ipv4 = common::ipv4(&state, ETH1);
    let ips = common::ips(ipv4.addresses.as_ref());
    assert!(ips.contains(&"192.0.2.252".to_string()));
    assert!(ips.contains(&"192.0.2.200".to_string()));
    assert!(!ips.contains(&"192.0.2.251".to_string()));
    assert_eq!(ipv4.static_addresses().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dhcpv6_only() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .wait_ip(WaitIp::Ipv6)
            .with_ipv6(InterfaceIpv6::with_auto(true, false)),
    );

    let state = engine.apply(&desired).await?;

    let ipv6 = common::ipv6(&state, ETH1);
    let leases = ipv6.leased_addresses();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].ip, "2001:db8:1::100");
    assert_eq!(leases[0].prefix_length, 128);
    assert!(running_route(&state, "::/0").is_none());
    assert!(running_dns(&state).contains(&"2001:db8:1::1".to_string()));
    assert!(!common::ipv4(&state, ETH1).is_enabled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_autoconf_with_token() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .wait_ip(WaitIp::Ipv6)
            .with_ipv6(InterfaceIpv6::with_auto(true, true).token("::fac")),
    );

    let state = engine.apply(&desired).await?;

    let ipv6 = common::ipv6(&state, ETH1);
    assert_eq!(ipv6.token.as_deref(), Some("::fac"));
    let ips = common::ips(ipv6.addresses.as_ref());
    assert!(ips.contains(&"2001:db8:1::fac".to_string()));
    assert!(ips.contains(&"2001:db8:1::100".to_string()));

    let gateway = running_route(&state, "::/0").expect("default route");
    assert_eq!(gateway.next_hop_address.as_deref(), Some("fe80::1"));
    assert_eq!(gateway.protocol, Some(RouteProtocol::Ra));
    assert!(running_route(&state, "2001:db8:f::/64").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ipv6_dynamic_off_keeps_leases_as_static() -> Result<()> {
    let engine = common::engine();
    engine
        .apply(&common::eth1(
            Interface::ethernet(ETH1)
                .up()
                .wait_ip(WaitIp::Ipv6)
                .with_ipv6(InterfaceIpv6::with_auto(true, true).token("::fac")),
        ))
        .await?;

    let desired = common::eth1(Interface::ethernet(ETH1).with_ipv6(InterfaceIpv6::with_auto(false, false)));
    let state = engine.apply(&desired).await?;

    let ipv6 = common::ipv6(&state, ETH1);
    assert!(ipv6.is_enabled());
    assert!(!ipv6.is_dhcp());
    assert!(!ipv6.is_autoconf());
    assert_eq!(ipv6.token, None);
    let kept: Vec<IpAddrEntry> = ipv6
        .addresses
        .iter()
        .flatten()
        .filter(|a| !a.is_link_local())
        .cloned()
        .collect();
    assert_eq!(
        kept,
        vec![
            IpAddrEntry::new("2001:db8:1::100", 128),
            IpAddrEntry::new("2001:db8:1::fac", 64),
        ]
    );
    assert!(running_route(&state, "::/0").is_none());
    assert!(running_route(&state, "2001:db8:f::/64").is_none());
    assert!(!running_dns(&state).contains(&"2001:db8:1::1".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dual_stack_wait() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .wait_ip(WaitIp::Ipv4AndIpv6)
            .with_ipv4(InterfaceIpv4::with_dhcp())
            .with_ipv6(InterfaceIpv6::with_auto(true, true)),
    );

    let state = engine.apply(&desired).await?;

    assert_eq!(common::ipv4(&state, ETH1).leased_addresses().len(), 1);
    assert_eq!(common::ipv6(&state, ETH1).leased_addresses().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_autoconf_without_dhcp_not_supported() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv6(InterfaceIpv6::with_auto(false, true)),
    );

    assert_err!(engine.apply(&desired).await, is_not_supported);
    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_token_errors() -> Result<()> {
    let engine = common::engine();

    let without_autoconf = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv6(InterfaceIpv6::with_auto(true, false).token("::fac")),
    );
    assert_err!(engine.apply(&without_autoconf).await, is_value_error);

    let malformed = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv6(InterfaceIpv6::with_auto(true, true).token("not-a-token")),
    );
    assert_err!(engine.apply(&malformed).await, is_value_error);

    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_addr_gen_mode_removed_when_ipv6_disabled() -> Result<()> {
    let engine = common::engine();
    let mut ipv6 = InterfaceIpv6::with_static(vec![IpAddrEntry::new("2001:db8:2::1", 64)]);
    ipv6.addr_gen_mode = Some(AddrGenMode::StablePrivacy);

    let state = engine
        .apply(&common::eth1(Interface::ethernet(ETH1).up().with_ipv6(ipv6)))
        .await?;
    assert_eq!(
        common::ipv6(&state, ETH1).addr_gen_mode,
        Some(AddrGenMode::StablePrivacy)
    );

    let state = engine
        .apply(&common::eth1(
            Interface::ethernet(ETH1).with_ipv6(InterfaceIpv6::disabled()),
        ))
        .await?;
    assert_eq!(common::ipv6(&state, ETH1), &InterfaceIpv6::disabled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_kernel_only_rejects_dhcp() -> Result<()> {
    let engine = common::engine();

    assert_err!(
        engine
            .apply_with_options(&dhcp_eth1(), ApplyOptions::default().kernel_only())
            .await,
        is_not_supported
    );
    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dhcp_without_server_times_out() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().interface(
        Interface::ethernet(ETH2)
            .up()
            .wait_ip(WaitIp::Ipv4)
            .with_ipv4(InterfaceIpv4::with_dhcp()),
    );
    let started = Instant::now();

    let err = engine.apply(&desired).await.unwrap_err();

    assert!(err.is_verification_failure());
    assert!(started.elapsed() >= Duration::from_secs(45));
    let report = err.verification_report().expect("report");
    assert!(report.get("interfaces.eth2.wait-ip").is_some());

    // Rolled back to the disabled family.
    let state = engine.show().await?;
    assert!(!common::ipv4(&state, ETH2).is_enabled());
    Ok(())
}
