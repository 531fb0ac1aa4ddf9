//! Virtual interface tests.

use nlstate::Result;
use nlstate::state::{
    BondMode, Interface, InterfaceIdentifier, InterfaceIpv4, InterfaceState, InterfaceType,
    IpAddrEntry, NetworkState,
};

use crate::common::{self, ETH1, ETH2};

fn ports(state: &NetworkState, name: &str) -> Vec<String> {
    common::iface(state, name)
        .ports()
        .map(<[String]>::to_vec)
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn test_dummy_create_and_remove() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().interface(
        Interface::dummy("dummy0")
            .up()
            .mtu(9000)
            .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("198.51.100.1", 24)])),
    );

    let state = engine.apply(&desired).await?;

    let dummy = common::iface(&state, "dummy0");
    assert_eq!(dummy.iface_type(), InterfaceType::Dummy);
    assert_eq!(dummy.mtu, Some(9000));
    assert!(dummy.mac_address.is_some());
    assert!(!common::ipv6(&state, "dummy0").is_enabled());

    let state = engine
        .apply(&NetworkState::new().interface(Interface::dummy("dummy0").absent()))
        .await?;
    assert!(state.get_interface("dummy0").is_none());

    // Removing it again is a no-op.
    let count = engine.backend().apply_count();
    engine
        .apply(&NetworkState::new().interface(Interface::dummy("dummy0").absent()))
        .await?;
    assert_eq!(engine.backend().apply_count(), count);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_veth_pair() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().interface(Interface::veth("veth0", "veth0p").up());

    let state = engine.apply(&desired).await?;

    assert_eq!(common::iface(&state, "veth0").veth_peer(), Some("veth0p"));
    assert_eq!(common::iface(&state, "veth0p").veth_peer(), Some("veth0"));
    assert!(common::iface(&state, "veth0p").is_up());

    // The pair is in place, nothing to do.
    engine.apply(&desired).await?;
    assert_eq!(engine.backend().apply_count(), 1);

    let state = engine
        .apply(&NetworkState::new().interface(Interface::veth("veth0", "veth0p").absent()))
        .await?;
    assert!(state.get_interface("veth0").is_none());
    assert!(state.get_interface("veth0p").is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bond_with_ports() -> Result<()> {
    let engine = common::engine();
    let desired = NetworkState::new().interface(
        Interface::bond("bond0", BondMode::ActiveBackup, &[ETH1, ETH2])
            .up()
            .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.5", 24)])),
    );

    let state = engine.apply(&desired).await?;

    assert_eq!(ports(&state, "bond0"), vec![ETH1, ETH2]);
    assert_eq!(common::iface(&state, ETH1).controller.as_deref(), Some("bond0"));
    assert_eq!(common::iface(&state, ETH2).controller.as_deref(), Some("bond0"));
    assert_eq!(
        common::ips(common::ipv4(&state, "bond0").addresses.as_ref()),
        vec!["192.0.2.5"]
    );

    let state = engine
        .apply(&NetworkState::new().interface(Interface::bond("bond0", BondMode::ActiveBackup, &[]).absent()))
        .await?;

    assert!(state.get_interface("bond0").is_none());
    assert!(common::iface(&state, ETH1).controller.is_none());
    assert!(common::iface(&state, ETH2).controller.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_bridge_port_list_is_authoritative() -> Result<()> {
    let engine = common::engine();
    engine
        .apply(&NetworkState::new().interface(Interface::linux_bridge("br0", &[ETH1]).up()))
        .await?;

    let state = engine
        .apply(&NetworkState::new().interface(Interface::linux_bridge("br0", &[ETH2])))
        .await?;

    assert_eq!(ports(&state, "br0"), vec![ETH2]);
    assert!(common::iface(&state, ETH1).controller.is_none());
    assert_eq!(common::iface(&state, ETH2).controller.as_deref(), Some("br0"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_port_attached_by_controller_field() -> Result<()> {
    let engine = common::engine();
    engine
        .apply(&NetworkState::new().interface(Interface::linux_bridge("br0", &[ETH1]).up()))
        .await?;

    let state = engine
        .apply(&NetworkState::new().interface(Interface::ethernet(ETH2).controller("br0")))
        .await?;
    assert_eq!(ports(&state, "br0"), vec![ETH1, ETH2]);

    // An empty controller detaches.
    let state = engine
        .apply(&NetworkState::new().interface(Interface::ethernet(ETH2).controller("")))
        .await?;
    assert_eq!(ports(&state, "br0"), vec![ETH1]);
    assert!(common::iface(&state, ETH2).controller.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_port_relations() -> Result<()> {
    let engine = common::engine();

    let missing_port = NetworkState::new().interface(Interface::linux_bridge("br0", &["eth9"]));
    assert_err!(engine.apply(&missing_port).await, is_value_error);

    let not_a_controller =
        NetworkState::new().interface(Interface::ethernet(ETH2).controller(ETH1));
    assert_err!(engine.apply(&not_a_controller).await, is_value_error);

    let type_change = NetworkState::new().interface(Interface::dummy(ETH1));
    assert_err!(engine.apply(&type_change).await, is_value_error);

    assert_eq!(engine.backend().apply_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_match_by_mac_address() -> Result<()> {
    let engine = common::engine();
    let mut wan = Interface::ethernet("wan").mac("52:54:00:00:00:01").mtu(9000);
    wan.identifier = Some(InterfaceIdentifier::MacAddress);

    let state = engine.apply(&NetworkState::new().interface(wan)).await?;

    assert_eq!(common::iface(&state, ETH1).mtu, Some(9000));
    assert!(state.get_interface("wan").is_none());

    let mut unknown = Interface::ethernet("wan").mac("52:54:00:00:00:99");
    unknown.identifier = Some(InterfaceIdentifier::MacAddress);
    assert_err!(
        engine.apply(&NetworkState::new().interface(unknown)).await,
        is_not_found
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_link_down() -> Result<()> {
    let engine = common::engine();

    let state = engine
        .apply(&NetworkState::new().interface(Interface::ethernet(ETH2).down()))
        .await?;

    assert_eq!(common::iface(&state, ETH2).state, Some(InterfaceState::Down));
    Ok(())
}
