//! Static configuration tests.

use std::time::Duration;

use nlstate::state::{
    DnsConfig, Interface, InterfaceIpv4, InterfaceIpv6, IpAddrEntry, NetworkState, RouteEntry,
    RouteRuleEntry, WaitIp,
};
use nlstate::{ApplyOptions, Result};
use tokio::time::Instant;

use crate::common::{self, ETH1, ETH2};

fn static_eth1() -> Interface {
    Interface::ethernet(ETH1)
        .up()
        .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new(
            "192.0.2.5",
            24,
        )]))
}

#[tokio::test(start_paused = true)]
async fn test_apply_current_state_is_noop() -> Result<()> {
    let engine = common::engine();

    let current = engine.show().await?;
    let after = engine.apply(&current).await?;

    assert_eq!(after, current);
    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_apply_running_config_is_noop() -> Result<()> {
    let engine = common::engine();
    engine.apply(&common::eth1(static_eth1())).await?;

    let config = engine.show_running_config().await?;
    engine.apply(&config).await?;

    assert_eq!(engine.backend().apply_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_config_still_waits_for_ip() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().interface(
        Interface::ethernet(ETH2)
            .up()
            .wait_ip(WaitIp::Ipv4)
            .with_ipv4(InterfaceIpv4::with_dhcp()),
    );
    engine
        .apply_with_options(&desired, ApplyOptions::default().no_verify())
        .await?;
    assert_eq!(engine.backend().apply_count(), 1);

    // Nothing left to change, but eth2 has no lease to wait for.
    let started = Instant::now();
    let err = engine.apply(&desired).await.unwrap_err();

    assert!(err.is_verification_failure());
    assert!(started.elapsed() >= Duration::from_secs(45));
    let report = err.verification_report().expect("report");
    assert!(report.get("interfaces.eth2.wait-ip").is_some());
    assert_eq!(engine.backend().apply_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_static_addresses() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv4(InterfaceIpv4::with_static(vec![
                IpAddrEntry::new("192.0.2.251", 24),
                IpAddrEntry::new("192.0.2.252", 24),
            ]))
            .with_ipv6(InterfaceIpv6::with_static(vec![IpAddrEntry::new(
                "2001:db8:2::1",
                64,
            )])),
    );

    let state = engine.apply(&desired).await?;

    assert_eq!(
        common::ips(common::ipv4(&state, ETH1).addresses.as_ref()),
        vec!["192.0.2.251", "192.0.2.252"]
    );
    let v6 = common::ips(common::ipv6(&state, ETH1).addresses.as_ref());
    assert!(v6.contains(&"2001:db8:2::1".to_string()));
    assert!(v6.iter().any(|ip| ip.starts_with("fe80::")));

    // Applying again changes nothing.
    engine.apply(&desired).await?;
    assert_eq!(engine.backend().apply_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ipv6_address_is_canonicalized() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .with_ipv6(InterfaceIpv6::with_static(vec![IpAddrEntry::new(
                "2001:0db8:0002:0000:0000:0000:0000:0001",
                64,
            )])),
    );

    let state = engine.apply(&desired).await?;

    let v6 = common::ips(common::ipv6(&state, ETH1).addresses.as_ref());
    assert!(v6.contains(&"2001:db8:2::1".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_same_address_on_two_interfaces() -> Result<()> {
    let engine = common::engine();
    let address = || InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.251", 24)]);
    let desired = NetworkState::new()
        .interface(Interface::ethernet(ETH1).up().with_ipv4(address()))
        .interface(Interface::ethernet(ETH2).up().with_ipv4(address()));

    let state = engine.apply(&desired).await?;

    for name in [ETH1, ETH2] {
        assert_eq!(
            common::ips(common::ipv4(&state, name).addresses.as_ref()),
            vec!["192.0.2.251"]
        );
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_disable_ipv4_removes_addresses() -> Result<()> {
    let engine = common::engine();
    engine.apply(&common::eth1(static_eth1())).await?;

    let desired = common::eth1(Interface::ethernet(ETH1).with_ipv4(InterfaceIpv4::disabled()));
    let state = engine.apply(&desired).await?;

    assert_eq!(common::ipv4(&state, ETH1), &InterfaceIpv4::disabled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mtu_below_ipv6_minimum() -> Result<()> {
    let engine = common::engine();
    let with_mtu = |mtu| {
        common::eth1(
            Interface::ethernet(ETH1)
                .mtu(mtu)
                .with_ipv6(InterfaceIpv6::with_static(vec![IpAddrEntry::new(
                    "2001:db8:2::1",
                    64,
                )])),
        )
    };

    assert_err!(engine.apply(&with_mtu(1279)).await, is_value_error);
    assert_eq!(engine.backend().apply_count(), 0);
    let state = engine.show().await?;
    assert_eq!(common::iface(&state, ETH1).mtu, Some(1500));

    let state = engine.apply(&with_mtu(1280)).await?;
    assert_eq!(common::iface(&state, ETH1).mtu, Some(1280));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_document_rejected() -> Result<()> {
    let engine = common::engine();

    let long_name = NetworkState::new().interface(Interface::dummy("averyveryverylongname").up());
    assert_err!(engine.apply(&long_name).await, is_value_error);

    let bad_address = common::eth1(
        Interface::ethernet(ETH1)
            .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.300", 24)])),
    );
    assert_err!(engine.apply(&bad_address).await, is_value_error);

    let missing = NetworkState::new().interface(Interface::ethernet("eth9").up());
    assert_err!(engine.apply(&missing).await, is_value_error);

    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_plan_does_not_apply() -> Result<()> {
    let engine = common::engine();

    let plan = engine.plan(&common::eth1(static_eth1())).await?;

    assert_eq!(plan.change_count(), 1);
    assert!(plan.summary().contains("~ interface eth1"));
    assert_eq!(engine.backend().apply_count(), 0);

    let plan = engine.plan(&engine.show().await?).await?;
    assert!(plan.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_static_route_add_and_remove() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(static_eth1())
        .route(RouteEntry::new("198.51.100.0/24").via("192.0.2.1").dev(ETH1));

    let state = engine.apply(&desired).await?;
    let has_route = |state: &NetworkState| {
        state
            .routes
            .config_routes()
            .any(|r| r.destination.as_deref() == Some("198.51.100.0/24"))
    };
    assert!(has_route(&state));
    assert!(
        state
            .routes
            .running
            .iter()
            .flatten()
            .any(|r| r.destination.as_deref() == Some("198.51.100.0/24"))
    );

    let removal = NetworkState::new().route(RouteEntry::absent().destination("198.51.100.0/24"));
    let state = engine.apply(&removal).await?;
    assert!(!has_route(&state));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_route_on_disabled_family_rejected() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().route(RouteEntry::new("198.51.100.0/24").via("192.0.2.1").dev(ETH2));

    assert_err!(engine.apply(&desired).await, is_value_error);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_removing_interface_drops_its_routes() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new()
        .interface(
            Interface::dummy("dummy0")
                .up()
                .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("198.51.100.1", 24)])),
        )
        .route(RouteEntry::new("203.0.113.0/24").via("198.51.100.254").dev("dummy0"));
    let state = engine.apply(&desired).await?;
    assert_eq!(state.routes.config_routes().count(), 1);

    let removal = NetworkState::new().interface(Interface::dummy("dummy0").absent());
    let state = engine.apply(&removal).await?;

    assert!(state.get_interface("dummy0").is_none());
    assert_eq!(state.routes.config_routes().count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rule_without_route_lands_on_loopback() -> Result<()> {
    let engine = common::engine();
    let rule = RouteRuleEntry::new().ip_from("192.0.2.0/24").table(200);

    let state = engine.apply(&NetworkState::new().rule(rule.clone())).await?;

    assert_eq!(state.route_rules.config_rules().count(), 1);
    assert_eq!(engine.backend().rule_owner(&rule).as_deref(), Some("lo"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rule_follows_route_of_same_table() -> Result<()> {
    let engine = common::engine();
    let rule = RouteRuleEntry::new().ip_to("198.51.100.0/24").priority(1000).table(200);
    let desired = common::eth1(static_eth1())
        .route(
            RouteEntry::new("203.0.113.0/24")
                .via("192.0.2.1")
                .dev(ETH1)
                .table(200),
        )
        .rule(rule.clone());

    engine.apply(&desired).await?;

    assert_eq!(engine.backend().rule_owner(&rule).as_deref(), Some(ETH1));

    let removal = NetworkState::new().rule(RouteRuleEntry::absent().table(200));
    let state = engine.apply(&removal).await?;
    assert_eq!(state.route_rules.config_rules().count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rule_follows_existing_route_of_same_table() -> Result<()> {
    let engine = common::engine();
    let desired = common::eth1(static_eth1()).route(
        RouteEntry::new("198.51.100.0/24")
            .via("192.0.2.1")
            .dev(ETH1)
            .table(200),
    );
    engine.apply(&desired).await?;

    let rule = RouteRuleEntry::new().ip_from("192.0.2.0/24").table(200);
    engine.apply(&desired.rule(rule.clone())).await?;

    assert_eq!(engine.backend().apply_count(), 2);
    assert_eq!(engine.backend().rule_owner(&rule).as_deref(), Some(ETH1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dns_replace_and_clear() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().dns(DnsConfig::new(
        &["192.0.2.53", "2001:db8::53"],
        &["example.org", "example.net"],
    ));

    let state = engine.apply(&desired).await?;
    let config = state.dns.config.clone().unwrap_or_default();
    assert_eq!(config.servers(), ["192.0.2.53", "2001:db8::53"]);
    assert_eq!(config.searches(), ["example.org", "example.net"]);

    let state = engine
        .apply(&NetworkState::new().dns(DnsConfig::new(&[], &[])))
        .await?;
    assert!(state.dns.config.as_ref().is_none_or(DnsConfig::is_empty));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_kernel_only_static_apply() -> Result<()> {
    let engine = common::engine();

    let state = engine
        .apply_with_options(&common::eth1(static_eth1()), ApplyOptions::default().kernel_only())
        .await?;

    assert_eq!(
        common::ips(common::ipv4(&state, ETH1).addresses.as_ref()),
        vec!["192.0.2.5"]
    );
    Ok(())
}
