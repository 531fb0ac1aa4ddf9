//! Route model.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::ip::{AddressParseError, IpFamily, format_network, parse_cidr};

/// Main routing table id as the kernel reports it.
pub const RT_TABLE_MAIN: u32 = 254;

/// Marker for entries that remove matching configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryState {
    /// Remove every entry matching the set fields.
    Absent,
}

/// Who installed a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteProtocol {
    /// Configured statically.
    Static,
    /// Installed during boot.
    Boot,
    /// Learned from DHCP.
    Dhcp,
    /// Learned from a router advertisement.
    Ra,
    /// Installed by the kernel.
    Kernel,
}

impl RouteProtocol {
    /// Check if the route was learned dynamically.
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Dhcp | Self::Ra | Self::Kernel)
    }
}

/// Configured and running routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Routes {
    /// Statically configured routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<RouteEntry>>,
    /// Every route installed, including learned ones. Read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<Vec<RouteEntry>>,
}

impl Routes {
    /// Check if neither list is present.
    pub fn is_empty(&self) -> bool {
        self.config.is_none() && self.running.is_none()
    }

    /// Iterate configured routes that are not removal entries.
    pub fn config_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.config.iter().flatten().filter(|r| !r.is_absent())
    }
}

/// A single route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteEntry {
    /// Set to `absent` to remove matching routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EntryState>,
    /// Destination in CIDR notation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Output interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_interface: Option<String>,
    /// Gateway address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop_address: Option<String>,
    /// Route metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u32>,
    /// Routing table (0 or 254 is the main table).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u32>,
    /// Installer of the route. Only reported, never configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<RouteProtocol>,
}

impl RouteEntry {
    /// Create a route to `destination`.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Default::default()
        }
    }

    /// Create a removal entry. Unset fields act as wildcards.
    pub fn absent() -> Self {
        Self {
            state: Some(EntryState::Absent),
            ..Default::default()
        }
    }

    /// Set the destination.
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Set the gateway.
    pub fn via(mut self, gateway: impl Into<String>) -> Self {
        self.next_hop_address = Some(gateway.into());
        self
    }

    /// Set the output interface.
    pub fn dev(mut self, dev: impl Into<String>) -> Self {
        self.next_hop_interface = Some(dev.into());
        self
    }

    /// Set the metric.
    pub fn metric(mut self, metric: u32) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Set the routing table.
    pub fn table(mut self, table: u32) -> Self {
        self.table_id = Some(table);
        self
    }

    /// Set the protocol.
    pub fn protocol(mut self, protocol: RouteProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Check if this is a removal entry.
    pub fn is_absent(&self) -> bool {
        self.state == Some(EntryState::Absent)
    }

    /// Check if the route was learned from DHCP or RA.
    pub fn is_auto(&self) -> bool {
        self.protocol.is_some_and(|p| p.is_auto())
    }

    /// Routing table with the main table folded to 0.
    pub fn effective_table(&self) -> u32 {
        normalize_table(self.table_id)
    }

    /// Address family, derived from destination or gateway.
    pub fn family(&self) -> Option<IpFamily> {
        if let Some(dst) = &self.destination
            && let Ok((addr, _)) = parse_cidr(dst)
        {
            return Some(IpFamily::of(&addr));
        }
        self.next_hop_address
            .as_deref()
            .and_then(|gw| gw.parse::<IpAddr>().ok())
            .map(|gw| IpFamily::of(&gw))
    }

    /// Validate and rewrite destination and gateway in canonical form.
    pub fn normalize(&mut self) -> Result<(), AddressParseError> {
        if let Some(dst) = &self.destination {
            let (addr, prefix) = parse_cidr(dst)?;
            self.destination = Some(format_network(addr, prefix));
        }
        if let Some(gw) = &self.next_hop_address {
            let addr: IpAddr = gw
                .trim()
                .parse()
                .map_err(|_| AddressParseError::InvalidAddress(gw.clone()))?;
            if self.destination.is_some()
                && let Some(family) = self.family()
                && family != IpFamily::of(&addr)
            {
                return Err(AddressParseError::WrongFamily {
                    address: gw.clone(),
                    expected: family,
                });
            }
            self.next_hop_address = Some(addr.to_string());
        }
        if self.table_id == Some(RT_TABLE_MAIN) {
            self.table_id = Some(0);
        }
        Ok(())
    }

    /// Check whether a removal entry matches `other`.
    ///
    /// Every field set on `self` must equal the field on `other`.
    pub fn matches(&self, other: &RouteEntry) -> bool {
        fn field_matches<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }
        field_matches(&self.destination, &other.destination)
            && field_matches(&self.next_hop_interface, &other.next_hop_interface)
            && field_matches(&self.next_hop_address, &other.next_hop_address)
            && field_matches(&self.metric, &other.metric)
            && self
                .table_id
                .is_none_or(|_| self.effective_table() == other.effective_table())
    }

    /// Check whether two present routes describe the same kernel route.
    ///
    /// An unset metric on either side matches any metric.
    pub fn same_route(&self, other: &RouteEntry) -> bool {
        let metric_eq = match (self.metric, other.metric) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        self.destination == other.destination
            && self.next_hop_interface == other.next_hop_interface
            && gateway_eq(
                self.next_hop_address.as_deref(),
                other.next_hop_address.as_deref(),
            )
            && self.effective_table() == other.effective_table()
            && metric_eq
    }
}

fn gateway_eq(a: Option<&str>, b: Option<&str>) -> bool {
    // An unspecified gateway is the same as none.
    fn effective(gw: Option<&str>) -> Option<&str> {
        gw.filter(|g| !matches!(*g, "0.0.0.0" | "::" | ""))
    }
    effective(a) == effective(b)
}

pub(crate) fn normalize_table(table_id: Option<u32>) -> u32 {
    match table_id {
        None | Some(RT_TABLE_MAIN) => 0,
        Some(t) => t,
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            write!(f, "absent ")?;
        }
        if let Some(dst) = &self.destination {
            write!(f, "{}", dst)?;
        } else {
            write!(f, "*")?;
        }
        if let Some(gw) = &self.next_hop_address {
            write!(f, " via {}", gw)?;
        }
        if let Some(dev) = &self.next_hop_interface {
            write!(f, " dev {}", dev)?;
        }
        if self.effective_table() != 0 {
            write!(f, " table {}", self.effective_table())?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        Ok(())
    }
}
