//! Verification failure and rollback tests.

use std::time::Duration;

use nlstate::lab::Fault;
use nlstate::state::{BondMode, Interface, InterfaceIpv4, IpAddrEntry, NetworkState, WaitIp};
use nlstate::{ApplyOptions, Error, NetState, Result};
use tokio::time::Instant;

use crate::common::{self, ETH1, ETH2};

fn mtu_and_address() -> NetworkState {
    common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .mtu(1400)
            .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.5", 24)])),
    )
}

#[tokio::test(start_paused = true)]
async fn test_verification_failure_rolls_back() -> Result<()> {
    let host = common::host();
    host.inject(Fault::IgnoreMtu(ETH1.to_string()));
    let engine = NetState::new(host);
    let started = Instant::now();

    let err = engine.apply(&mtu_and_address()).await.unwrap_err();

    assert!(matches!(err, Error::Verification { rolled_back: true, .. }));
    assert!(err.to_string().contains("rolled back"));
    let report = err.verification_report().expect("report");
    assert!(report.get("interfaces.eth1.mtu").is_some());
    assert!(started.elapsed() >= Duration::from_secs(20));

    // The address that did get applied is gone again.
    let state = engine.show().await?;
    assert_eq!(common::iface(&state, ETH1).mtu, Some(1500));
    assert!(!common::ipv4(&state, ETH1).is_enabled());
    assert_eq!(engine.backend().apply_count(), 2);

    // Once the link accepts the MTU the same document goes through.
    engine.backend().clear_faults();
    let state = engine.apply(&mtu_and_address()).await?;
    assert_eq!(common::iface(&state, ETH1).mtu, Some(1400));
    assert_eq!(engine.backend().apply_count(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_custom_timeout() -> Result<()> {
    let host = common::host();
    host.inject(Fault::IgnoreMtu(ETH1.to_string()));
    let engine = NetState::new(host);
    let started = Instant::now();

    let result = engine
        .apply_with_options(
            &mtu_and_address(),
            ApplyOptions::default().timeout(Duration::from_secs(3)),
        )
        .await;

    assert_err!(result, is_verification_failure);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_apply_leaves_state_unchanged() -> Result<()> {
    let engine = common::engine();
    let before = engine.show().await?;
    engine
        .backend()
        .inject(Fault::RejectApply("daemon busy".to_string()));

    let result = engine.apply(&mtu_and_address()).await;

    assert_err!(result, is_backend_failure);
    assert_eq!(engine.show().await?, before);
    assert_eq!(engine.backend().apply_count(), 0);

    // The fault fires once.
    engine.apply(&mtu_and_address()).await?;
    assert_eq!(engine.backend().apply_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_partial_apply_is_undone() -> Result<()> {
    let engine = common::engine();
    engine
        .backend()
        .inject(Fault::FailOnInterface(ETH1.to_string()));
    let desired = NetworkState::new().interface(
        Interface::bond("bond0", BondMode::ActiveBackup, &[ETH1]).up(),
    );

    let result = engine.apply(&desired).await;

    assert_err!(result, is_backend_failure);
    let state = engine.show().await?;
    assert!(state.get_interface("bond0").is_none());
    assert!(common::iface(&state, ETH1).controller.is_none());

    let plans = engine.backend().applied_plans();
    assert_eq!(plans.len(), 1);
    assert!(plans[0].summary().contains("- interface bond0 (bond)"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_verify_skips_rollback() -> Result<()> {
    let host = common::host();
    host.inject(Fault::IgnoreMtu(ETH1.to_string()));
    let engine = NetState::new(host);

    let state = engine
        .apply_with_options(&mtu_and_address(), ApplyOptions::default().no_verify())
        .await?;

    assert_eq!(common::iface(&state, ETH1).mtu, Some(1500));
    assert!(common::ipv4(&state, ETH1).is_enabled());
    assert_eq!(engine.backend().apply_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_applies_are_serialized() -> Result<()> {
    let engine = common::engine();
    let dhcp = common::eth1(
        Interface::ethernet(ETH1)
            .up()
            .wait_ip(WaitIp::Ipv4)
            .with_ipv4(InterfaceIpv4::with_dhcp()),
    );
    let address = NetworkState::new().interface(
        Interface::ethernet(ETH2)
            .up()
            .with_ipv4(InterfaceIpv4::with_static(vec![IpAddrEntry::new("192.0.2.9", 24)])),
    );

    let (first, second) = tokio::join!(engine.apply(&dhcp), engine.apply(&address));
    first?;
    let state = second?;

    // The second transaction saw the outcome of the first.
    assert!(common::ipv4(&state, ETH1).is_dhcp());
    assert!(common::ipv4(&state, ETH2).is_enabled());
    assert_eq!(engine.backend().apply_count(), 2);
    Ok(())
}
