//! Interface model.

use serde::{Deserialize, Serialize};

use super::ip::{InterfaceIpv4, InterfaceIpv6};

/// Interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    /// Physical ethernet device.
    Ethernet,
    /// Bonding device.
    Bond,
    /// Linux bridge.
    LinuxBridge,
    /// Virtual ethernet pair.
    Veth,
    /// Dummy device.
    Dummy,
    /// Loopback device.
    Loopback,
    /// Type not given or not understood.
    #[default]
    Unknown,
}

impl InterfaceType {
    /// Check if interfaces of this type can be created and removed.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Bond | Self::LinuxBridge | Self::Veth | Self::Dummy)
    }

    /// Check if interfaces of this type can have ports.
    pub fn is_controller(&self) -> bool {
        matches!(self, Self::Bond | Self::LinuxBridge)
    }

    /// Get the type name as used in state documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethernet => "ethernet",
            Self::Bond => "bond",
            Self::LinuxBridge => "linux-bridge",
            Self::Veth => "veth",
            Self::Dummy => "dummy",
            Self::Loopback => "loopback",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative state of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceState {
    /// Interface should be up.
    #[default]
    Up,
    /// Interface should be down.
    Down,
    /// Interface should not exist.
    Absent,
}

/// How a desired interface is matched against existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceIdentifier {
    /// Match by interface name.
    #[default]
    Name,
    /// Match by MAC address; the name is only a profile name.
    MacAddress,
}

/// Which address families must be configured before an interface counts
/// as up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitIp {
    /// Either family.
    #[serde(rename = "any")]
    Any,
    /// IPv4 must have an address.
    #[serde(rename = "ipv4")]
    Ipv4,
    /// IPv6 must have a non link-local address.
    #[serde(rename = "ipv6")]
    Ipv6,
    /// Both families must have an address.
    #[serde(rename = "ipv4+ipv6")]
    Ipv4AndIpv6,
}

/// Bond mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BondMode {
    /// Round-robin (balance-rr).
    #[default]
    #[serde(rename = "balance-rr")]
    BalanceRr,
    /// Active-backup.
    #[serde(rename = "active-backup")]
    ActiveBackup,
    /// XOR (balance-xor).
    #[serde(rename = "balance-xor")]
    BalanceXor,
    /// Broadcast.
    #[serde(rename = "broadcast")]
    Broadcast,
    /// 802.3ad (LACP).
    #[serde(rename = "802.3ad")]
    Ieee802_3ad,
    /// Transmit load balancing.
    #[serde(rename = "balance-tlb")]
    BalanceTlb,
    /// Adaptive load balancing.
    #[serde(rename = "balance-alb")]
    BalanceAlb,
}

/// Bond settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BondConfig {
    /// Bonding mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<BondMode>,
    /// Port list. When given it is authoritative.
    #[serde(default, rename = "port", skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
}

/// Linux bridge settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    /// Port list. When given it is authoritative.
    #[serde(default, rename = "port", skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
}

/// Veth settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VethConfig {
    /// Name of the peer end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

/// Type-specific part of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InterfaceKind {
    /// Physical ethernet device.
    Ethernet,
    /// Bonding device.
    Bond(BondConfig),
    /// Linux bridge.
    LinuxBridge(BridgeConfig),
    /// Virtual ethernet pair.
    Veth(VethConfig),
    /// Dummy device.
    Dummy,
    /// Loopback device.
    Loopback,
    /// Type not given or not understood.
    #[default]
    Unknown,
}

impl InterfaceKind {
    /// Get the interface type.
    pub fn iface_type(&self) -> InterfaceType {
        match self {
            Self::Ethernet => InterfaceType::Ethernet,
            Self::Bond(_) => InterfaceType::Bond,
            Self::LinuxBridge(_) => InterfaceType::LinuxBridge,
            Self::Veth(_) => InterfaceType::Veth,
            Self::Dummy => InterfaceType::Dummy,
            Self::Loopback => InterfaceType::Loopback,
            Self::Unknown => InterfaceType::Unknown,
        }
    }

    /// Create a kind with default settings for a type.
    pub fn for_type(iface_type: InterfaceType) -> Self {
        match iface_type {
            InterfaceType::Ethernet => Self::Ethernet,
            InterfaceType::Bond => Self::Bond(BondConfig::default()),
            InterfaceType::LinuxBridge => Self::LinuxBridge(BridgeConfig::default()),
            InterfaceType::Veth => Self::Veth(VethConfig::default()),
            InterfaceType::Dummy => Self::Dummy,
            InterfaceType::Loopback => Self::Loopback,
            InterfaceType::Unknown => Self::Unknown,
        }
    }

    fn update(&mut self, other: &Self) {
        if *self == Self::Unknown {
            *self = other.clone();
            return;
        }
        match (self, other) {
            (Self::Bond(cur), Self::Bond(new)) => {
                if new.mode.is_some() {
                    cur.mode = new.mode;
                }
                if new.ports.is_some() {
                    cur.ports.clone_from(&new.ports);
                }
            }
            (Self::LinuxBridge(cur), Self::LinuxBridge(new)) => {
                if new.ports.is_some() {
                    cur.ports.clone_from(&new.ports);
                }
            }
            (Self::Veth(cur), Self::Veth(new)) => {
                if new.peer.is_some() {
                    cur.peer.clone_from(&new.peer);
                }
            }
            _ => {}
        }
    }
}

/// A network interface as it appears in a state document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawInterface", into = "RawInterface")]
pub struct Interface {
    /// Interface name (profile name when matched by MAC address).
    pub name: String,
    /// Type-specific settings.
    pub kind: InterfaceKind,
    /// Administrative state.
    pub state: Option<InterfaceState>,
    /// Matching strategy.
    pub identifier: Option<InterfaceIdentifier>,
    /// MAC address (`aa:bb:cc:dd:ee:ff`).
    pub mac_address: Option<String>,
    /// MTU.
    pub mtu: Option<u32>,
    /// Controller (bond or bridge) this interface is a port of.
    pub controller: Option<String>,
    /// Families that must be configured before the interface counts as up.
    pub wait_ip: Option<WaitIp>,
    /// IPv4 configuration.
    pub ipv4: Option<InterfaceIpv4>,
    /// IPv6 configuration.
    pub ipv6: Option<InterfaceIpv6>,
}

impl Interface {
    /// Create an interface with the given kind.
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    /// Create an ethernet interface.
    pub fn ethernet(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceKind::Ethernet)
    }

    /// Create a dummy interface.
    pub fn dummy(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceKind::Dummy)
    }

    /// Create a loopback interface.
    pub fn loopback(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceKind::Loopback)
    }

    /// Create a bond with the given ports.
    pub fn bond(name: impl Into<String>, mode: BondMode, ports: &[&str]) -> Self {
        Self::new(
            name,
            InterfaceKind::Bond(BondConfig {
                mode: Some(mode),
                ports: Some(ports.iter().map(|p| p.to_string()).collect()),
            }),
        )
    }

    /// Create a linux bridge with the given ports.
    pub fn linux_bridge(name: impl Into<String>, ports: &[&str]) -> Self {
        Self::new(
            name,
            InterfaceKind::LinuxBridge(BridgeConfig {
                ports: Some(ports.iter().map(|p| p.to_string()).collect()),
            }),
        )
    }

    /// Create one end of a veth pair.
    pub fn veth(name: impl Into<String>, peer: impl Into<String>) -> Self {
        Self::new(
            name,
            InterfaceKind::Veth(VethConfig {
                peer: Some(peer.into()),
            }),
        )
    }

    /// Set the state to up.
    pub fn up(mut self) -> Self {
        self.state = Some(InterfaceState::Up);
        self
    }

    /// Set the state to down.
    pub fn down(mut self) -> Self {
        self.state = Some(InterfaceState::Down);
        self
    }

    /// Mark the interface for removal.
    pub fn absent(mut self) -> Self {
        self.state = Some(InterfaceState::Absent);
        self
    }

    /// Set the MTU.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set the MAC address.
    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Set the controller.
    pub fn controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    /// Set the wait-ip requirement.
    pub fn wait_ip(mut self, wait_ip: WaitIp) -> Self {
        self.wait_ip = Some(wait_ip);
        self
    }

    /// Set the IPv4 configuration.
    pub fn with_ipv4(mut self, ipv4: InterfaceIpv4) -> Self {
        self.ipv4 = Some(ipv4);
        self
    }

    /// Set the IPv6 configuration.
    pub fn with_ipv6(mut self, ipv6: InterfaceIpv6) -> Self {
        self.ipv6 = Some(ipv6);
        self
    }

    /// Get the interface type.
    pub fn iface_type(&self) -> InterfaceType {
        self.kind.iface_type()
    }

    /// Check if the interface is marked for removal.
    pub fn is_absent(&self) -> bool {
        self.state == Some(InterfaceState::Absent)
    }

    /// Check if the interface is (or should be) up. An omitted state means up.
    pub fn is_up(&self) -> bool {
        matches!(self.state, None | Some(InterfaceState::Up))
    }

    /// Check if the interface is matched by MAC address.
    pub fn is_matched_by_mac(&self) -> bool {
        self.identifier == Some(InterfaceIdentifier::MacAddress)
    }

    /// Check whether IPv4 is enabled.
    pub fn ipv4_enabled(&self) -> bool {
        self.ipv4.as_ref().is_some_and(InterfaceIpv4::is_enabled)
    }

    /// Check whether IPv6 is enabled.
    pub fn ipv6_enabled(&self) -> bool {
        self.ipv6.as_ref().is_some_and(InterfaceIpv6::is_enabled)
    }

    /// Get the port list of a controller.
    pub fn ports(&self) -> Option<&[String]> {
        match &self.kind {
            InterfaceKind::Bond(b) => b.ports.as_deref(),
            InterfaceKind::LinuxBridge(b) => b.ports.as_deref(),
            _ => None,
        }
    }

    /// Get the mutable port list of a controller.
    pub fn ports_mut(&mut self) -> Option<&mut Option<Vec<String>>> {
        match &mut self.kind {
            InterfaceKind::Bond(b) => Some(&mut b.ports),
            InterfaceKind::LinuxBridge(b) => Some(&mut b.ports),
            _ => None,
        }
    }

    /// Get the peer name of a veth.
    pub fn veth_peer(&self) -> Option<&str> {
        match &self.kind {
            InterfaceKind::Veth(v) => v.peer.as_deref(),
            _ => None,
        }
    }

    /// Overlay the non-IP fields set in `other`.
    pub(crate) fn update(&mut self, other: &Self) {
        if other.state.is_some() {
            self.state = other.state;
        }
        if other.identifier.is_some() {
            self.identifier = other.identifier;
        }
        if other.mac_address.is_some() && !other.is_matched_by_mac() {
            self.mac_address.clone_from(&other.mac_address);
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
        if other.controller.is_some() {
            self.controller.clone_from(&other.controller);
        }
        if other.wait_ip.is_some() {
            self.wait_ip = other.wait_ip;
        }
        self.kind.update(&other.kind);
    }
}

/// Flat document form of [`Interface`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawInterface {
    name: String,
    #[serde(rename = "type", default)]
    iface_type: InterfaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<InterfaceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<InterfaceIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wait_ip: Option<WaitIp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv4: Option<InterfaceIpv4>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ipv6: Option<InterfaceIpv6>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link_aggregation: Option<BondConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bridge: Option<BridgeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    veth: Option<VethConfig>,
}

impl TryFrom<RawInterface> for Interface {
    type Error = String;

    fn try_from(raw: RawInterface) -> Result<Self, Self::Error> {
        let payloads = [
            raw.link_aggregation.is_some().then_some(InterfaceType::Bond),
            raw.bridge.is_some().then_some(InterfaceType::LinuxBridge),
            raw.veth.is_some().then_some(InterfaceType::Veth),
        ];
        let mut given = payloads.into_iter().flatten();
        let payload_type = given.next();
        if given.next().is_some() {
            return Err(format!(
                "interface {} carries settings for more than one type",
                raw.name
            ));
        }

        // An omitted type is inferred from the settings block.
        let iface_type = match (raw.iface_type, payload_type) {
            (InterfaceType::Unknown, Some(t)) => t,
            (t, Some(p)) if t != p => {
                return Err(format!(
                    "interface {} of type {} cannot carry {} settings",
                    raw.name, t, p
                ));
            }
            (t, _) => t,
        };

        let kind = match iface_type {
            InterfaceType::Bond => InterfaceKind::Bond(raw.link_aggregation.unwrap_or_default()),
            InterfaceType::LinuxBridge => {
                InterfaceKind::LinuxBridge(raw.bridge.unwrap_or_default())
            }
            InterfaceType::Veth => InterfaceKind::Veth(raw.veth.unwrap_or_default()),
            other => InterfaceKind::for_type(other),
        };

        Ok(Interface {
            name: raw.name,
            kind,
            state: raw.state,
            identifier: raw.identifier,
            mac_address: raw.mac_address,
            mtu: raw.mtu,
            controller: raw.controller,
            wait_ip: raw.wait_ip,
            ipv4: raw.ipv4,
            ipv6: raw.ipv6,
        })
    }
}

impl From<Interface> for RawInterface {
    fn from(iface: Interface) -> Self {
        let iface_type = iface.iface_type();
        let (link_aggregation, bridge, veth) = match iface.kind {
            InterfaceKind::Bond(b) => (Some(b), None, None),
            InterfaceKind::LinuxBridge(b) => (None, Some(b), None),
            InterfaceKind::Veth(v) => (None, None, Some(v)),
            _ => (None, None, None),
        };
        RawInterface {
            name: iface.name,
            iface_type,
            state: iface.state,
            identifier: iface.identifier,
            mac_address: iface.mac_address,
            mtu: iface.mtu,
            controller: iface.controller,
            wait_ip: iface.wait_ip,
            ipv4: iface.ipv4,
            ipv6: iface.ipv6,
            link_aggregation,
            bridge,
            veth,
        }
    }
}
