//! Per-family IP configuration.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Lifetime value meaning "never expires" (a static address).
pub const LIFETIME_FOREVER: &str = "forever";

/// Minimum MTU an interface must have to carry IPv6 (RFC 8200).
pub const IPV6_MIN_MTU: u32 = 1280;

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    /// IPv4.
    Ipv4,
    /// IPv6.
    Ipv6,
}

impl IpFamily {
    /// Get the family of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// Maximum prefix length for this family.
    pub fn max_prefix(&self) -> u8 {
        match self {
            Self::Ipv4 => 32,
            Self::Ipv6 => 128,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// Error parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// Address is missing prefix (no "/").
    #[error("address missing prefix: {0} (expected format: 192.0.2.1/24)")]
    MissingPrefix(String),
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
    /// Invalid prefix length.
    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),
    /// Prefix length too large.
    #[error("prefix length {prefix} exceeds maximum {max}")]
    PrefixTooLarge { prefix: u8, max: u8 },
    /// Address belongs to the other family.
    #[error("address {address} is not an {expected} address")]
    WrongFamily { address: String, expected: IpFamily },
}

/// Parse CIDR notation into an address and prefix length.
pub fn parse_cidr(s: &str) -> Result<(IpAddr, u8), AddressParseError> {
    let (ip_str, prefix_str) = s
        .split_once('/')
        .ok_or_else(|| AddressParseError::MissingPrefix(s.to_string()))?;

    let address: IpAddr = ip_str
        .trim()
        .parse()
        .map_err(|_| AddressParseError::InvalidAddress(ip_str.to_string()))?;

    let prefix_len: u8 = prefix_str
        .trim()
        .parse()
        .map_err(|_| AddressParseError::InvalidPrefix(prefix_str.to_string()))?;

    let max = IpFamily::of(&address).max_prefix();
    if prefix_len > max {
        return Err(AddressParseError::PrefixTooLarge {
            prefix: prefix_len,
            max,
        });
    }

    Ok((address, prefix_len))
}

/// Format an address and prefix length as CIDR, masking host bits.
pub fn format_network(addr: IpAddr, prefix_len: u8) -> String {
    let network = match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            IpAddr::V4((u32::from(v4) & mask).into())
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX
                .checked_shl(128 - u32::from(prefix_len))
                .unwrap_or(0);
            IpAddr::V6((u128::from(v6) & mask).into())
        }
    };
    format!("{}/{}", network, prefix_len)
}

/// Check whether an address is an IPv6 unicast link-local address (fe80::/10).
pub fn is_ipv6_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => v6.is_unicast_link_local(),
        IpAddr::V4(_) => false,
    }
}

fn is_finite_lifetime(lifetime: Option<&str>) -> bool {
    lifetime.is_some_and(|l| !l.trim().eq_ignore_ascii_case(LIFETIME_FOREVER))
}

// ============================================================================
// Address entries
// ============================================================================

/// A single address entry of an IP configuration.
///
/// The address is kept as written in the document until it is normalized
/// so that invalid content on an interface being removed can be ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IpAddrEntry {
    /// The address, without prefix.
    pub ip: String,
    /// Prefix length.
    pub prefix_length: u8,
    /// Valid lifetime (`forever` or e.g. `3600sec`).
    #[serde(
        default,
        rename = "valid-life-time",
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_lifetime: Option<String>,
    /// Preferred lifetime.
    #[serde(
        default,
        rename = "preferred-life-time",
        skip_serializing_if = "Option::is_none"
    )]
    pub preferred_lifetime: Option<String>,
}

impl IpAddrEntry {
    /// Create a static address entry.
    pub fn new(ip: impl Into<String>, prefix_length: u8) -> Self {
        Self {
            ip: ip.into(),
            prefix_length,
            valid_lifetime: None,
            preferred_lifetime: None,
        }
    }

    /// Parse an entry from CIDR notation (e.g. "192.0.2.1/24").
    pub fn parse(cidr: &str) -> Result<Self, AddressParseError> {
        let (addr, prefix_length) = parse_cidr(cidr)?;
        Ok(Self::new(addr.to_string(), prefix_length))
    }

    /// Attach lifetimes, marking the address as leased.
    pub fn with_lifetime(mut self, valid: impl Into<String>, preferred: impl Into<String>) -> Self {
        self.valid_lifetime = Some(valid.into());
        self.preferred_lifetime = Some(preferred.into());
        self
    }

    /// Parse the address.
    pub fn addr(&self) -> Result<IpAddr, AddressParseError> {
        self.ip
            .trim()
            .parse()
            .map_err(|_| AddressParseError::InvalidAddress(self.ip.clone()))
    }

    /// Check whether this address was acquired dynamically (it carries a
    /// finite lifetime).
    pub fn is_dynamic(&self) -> bool {
        is_finite_lifetime(self.valid_lifetime.as_deref())
            || is_finite_lifetime(self.preferred_lifetime.as_deref())
    }

    /// Drop the lifetimes, turning the entry into a static address.
    pub fn strip_lifetime(&mut self) {
        self.valid_lifetime = None;
        self.preferred_lifetime = None;
    }

    /// Check whether this is an IPv6 link-local address.
    pub fn is_link_local(&self) -> bool {
        self.addr().is_ok_and(|a| is_ipv6_link_local(&a))
    }

    /// Compare address and prefix, ignoring lifetimes and textual form.
    pub fn same_address(&self, other: &Self) -> bool {
        if self.prefix_length != other.prefix_length {
            return false;
        }
        match (self.addr(), other.addr()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.ip == other.ip,
        }
    }

    /// Validate against the given family and rewrite the address in its
    /// canonical textual form.
    pub fn normalize(&mut self, family: IpFamily) -> Result<(), AddressParseError> {
        let addr = self.addr()?;
        if IpFamily::of(&addr) != family {
            return Err(AddressParseError::WrongFamily {
                address: self.ip.clone(),
                expected: family,
            });
        }
        let max = family.max_prefix();
        if self.prefix_length > max {
            return Err(AddressParseError::PrefixTooLarge {
                prefix: self.prefix_length,
                max,
            });
        }
        self.ip = addr.to_string();
        Ok(())
    }
}

impl fmt::Display for IpAddrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_length)?;
        if self.is_dynamic() {
            write!(
                f,
                " (valid {})",
                self.valid_lifetime.as_deref().unwrap_or(LIFETIME_FOREVER)
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// Auto-configuration options
// ============================================================================

/// Options controlling what DHCP/autoconf is allowed to install.
///
/// These are only meaningful while dynamic acquisition is enabled for the
/// family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AutoIpConfig {
    /// Use DNS servers learned from DHCP/RA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_dns: Option<bool>,
    /// Install the default gateway learned from DHCP/RA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_gateway: Option<bool>,
    /// Install extra routes learned from DHCP/RA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_routes: Option<bool>,
    /// Routing table for auto routes (0 is the main table).
    #[serde(
        default,
        rename = "auto-route-table-id",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_table_id: Option<u32>,
    /// Metric for auto routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_route_metric: Option<u32>,
}

impl AutoIpConfig {
    /// Check if no option is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay options set in `other`.
    pub(crate) fn update(&mut self, other: &Self) {
        if other.auto_dns.is_some() {
            self.auto_dns = other.auto_dns;
        }
        if other.auto_gateway.is_some() {
            self.auto_gateway = other.auto_gateway;
        }
        if other.auto_routes.is_some() {
            self.auto_routes = other.auto_routes;
        }
        if other.auto_table_id.is_some() {
            self.auto_table_id = other.auto_table_id;
        }
        if other.auto_route_metric.is_some() {
            self.auto_route_metric = other.auto_route_metric;
        }
    }

    /// Fill unset options with their defaults.
    pub(crate) fn fill_defaults(&mut self) {
        self.auto_dns.get_or_insert(true);
        self.auto_gateway.get_or_insert(true);
        self.auto_routes.get_or_insert(true);
        self.auto_table_id.get_or_insert(0);
    }

    /// Whether learned DNS servers are used (defaults to true).
    pub fn dns(&self) -> bool {
        self.auto_dns.unwrap_or(true)
    }

    /// Whether the learned gateway is installed (defaults to true).
    pub fn gateway(&self) -> bool {
        self.auto_gateway.unwrap_or(true)
    }

    /// Whether learned routes are installed (defaults to true).
    pub fn routes(&self) -> bool {
        self.auto_routes.unwrap_or(true)
    }

    /// Routing table for learned routes.
    pub fn table_id(&self) -> u32 {
        self.auto_table_id.unwrap_or(0)
    }
}

/// IPv6 interface identifier generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddrGenMode {
    /// Derive the identifier from the MAC address.
    Eui64,
    /// RFC 7217 stable privacy addresses.
    StablePrivacy,
}

// ============================================================================
// Family configs
// ============================================================================

/// IPv4 configuration of an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceIpv4 {
    /// Whether IPv4 is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Run a DHCPv4 client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    /// Ordered address list.
    #[serde(default, rename = "address", skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<IpAddrEntry>>,
    /// Auto-configuration options.
    #[serde(flatten)]
    pub auto: AutoIpConfig,
    /// DHCPv4 client identifier (`ll`, `iaid+duid` or raw hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_client_id: Option<String>,
    /// Send the host name to the DHCP server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_send_hostname: Option<bool>,
    /// Host name to send instead of the system one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_custom_hostname: Option<String>,
}

impl InterfaceIpv4 {
    /// Create an empty (unmentioned) configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with IPv4 disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }

    /// Configuration with DHCPv4 enabled.
    pub fn with_dhcp() -> Self {
        Self {
            enabled: Some(true),
            dhcp: Some(true),
            ..Default::default()
        }
    }

    /// Configuration with static addresses only.
    pub fn with_static(addresses: Vec<IpAddrEntry>) -> Self {
        Self {
            enabled: Some(true),
            dhcp: Some(false),
            addresses: Some(addresses),
            ..Default::default()
        }
    }

    /// Set the DHCP flag.
    pub fn dhcp(mut self, dhcp: bool) -> Self {
        self.dhcp = Some(dhcp);
        self
    }

    /// Append an address.
    pub fn address(mut self, entry: IpAddrEntry) -> Self {
        self.addresses.get_or_insert_with(Vec::new).push(entry);
        self
    }

    /// Set auto-configuration options.
    pub fn auto_options(mut self, auto: AutoIpConfig) -> Self {
        self.auto = auto;
        self
    }

    /// Check whether DHCPv4 is active.
    pub fn is_dhcp(&self) -> bool {
        self.is_enabled() && self.dhcp == Some(true)
    }
}

/// IPv6 configuration of an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InterfaceIpv6 {
    /// Whether IPv6 is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Run a DHCPv6 client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    /// Accept router advertisements and autoconfigure addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoconf: Option<bool>,
    /// Ordered address list.
    #[serde(default, rename = "address", skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<IpAddrEntry>>,
    /// Auto-configuration options.
    #[serde(flatten)]
    pub auto: AutoIpConfig,
    /// DHCPv6 DUID (`ll`, `llt` or raw hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_duid: Option<String>,
    /// Send the host name to the DHCPv6 server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_send_hostname: Option<bool>,
    /// Host name (FQDN) to send instead of the system one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_custom_hostname: Option<String>,
    /// Static interface identifier used for autoconf addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Interface identifier generation mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr_gen_mode: Option<AddrGenMode>,
}

impl InterfaceIpv6 {
    /// Create an empty (unmentioned) configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with IPv6 disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }

    /// Configuration with DHCPv6 and autoconf set as given.
    pub fn with_auto(dhcp: bool, autoconf: bool) -> Self {
        Self {
            enabled: Some(true),
            dhcp: Some(dhcp),
            autoconf: Some(autoconf),
            ..Default::default()
        }
    }

    /// Configuration with static addresses only.
    pub fn with_static(addresses: Vec<IpAddrEntry>) -> Self {
        Self {
            enabled: Some(true),
            dhcp: Some(false),
            autoconf: Some(false),
            addresses: Some(addresses),
            ..Default::default()
        }
    }

    /// Append an address.
    pub fn address(mut self, entry: IpAddrEntry) -> Self {
        self.addresses.get_or_insert_with(Vec::new).push(entry);
        self
    }

    /// Set auto-configuration options.
    pub fn auto_options(mut self, auto: AutoIpConfig) -> Self {
        self.auto = auto;
        self
    }

    /// Set the interface token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Check whether DHCPv6 is active.
    pub fn is_dhcp(&self) -> bool {
        self.is_enabled() && self.dhcp == Some(true)
    }

    /// Check whether autoconf is active.
    pub fn is_autoconf(&self) -> bool {
        self.is_enabled() && self.autoconf == Some(true)
    }

    /// Parse the token, treating `""` and `::` as "no token".
    pub fn parsed_token(&self) -> Result<Option<Ipv6Addr>, AddressParseError> {
        match self.token.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) => {
                let addr: Ipv6Addr = t
                    .parse()
                    .map_err(|_| AddressParseError::InvalidAddress(t.to_string()))?;
                Ok((!addr.is_unspecified()).then_some(addr))
            }
        }
    }
}

/// Behavior shared by the IPv4 and IPv6 configurations.
///
/// Merging, policy resolution, lease tracking and verification are written
/// once against this trait.
pub trait IpConfig: Clone + Default + PartialEq {
    /// The family this configuration belongs to.
    const FAMILY: IpFamily;

    /// Explicit `enabled` flag.
    fn enabled(&self) -> Option<bool>;
    /// Set the `enabled` flag.
    fn set_enabled(&mut self, enabled: bool);
    /// Whether the desired document asks for dynamic acquisition.
    fn requests_dynamic(&self) -> bool;
    /// Whether dynamic acquisition (DHCP or autoconf) is active.
    fn is_dynamic(&self) -> bool;
    /// Address list.
    fn addresses(&self) -> Option<&Vec<IpAddrEntry>>;
    /// Mutable address list.
    fn addresses_mut(&mut self) -> &mut Option<Vec<IpAddrEntry>>;
    /// Auto-configuration options.
    fn auto(&self) -> &AutoIpConfig;
    /// Mutable auto-configuration options.
    fn auto_mut(&mut self) -> &mut AutoIpConfig;
    /// Overlay fields set in `other`.
    fn update(&mut self, other: &Self);
    /// Drop options that only make sense while a DHCP client runs.
    fn clear_dhcp_options(&mut self);
    /// Configuration with the family disabled.
    fn disabled() -> Self;

    /// Check whether the family is enabled.
    fn is_enabled(&self) -> bool {
        self.enabled() == Some(true)
    }

    /// Addresses without lifetime, excluding link-local.
    fn static_addresses(&self) -> Vec<&IpAddrEntry> {
        self.addresses()
            .map(|a| {
                a.iter()
                    .filter(|e| !e.is_dynamic() && !e.is_link_local())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Addresses carrying a finite lifetime.
    fn leased_addresses(&self) -> Vec<&IpAddrEntry> {
        self.addresses()
            .map(|a| a.iter().filter(|e| e.is_dynamic()).collect())
            .unwrap_or_default()
    }
}

impl InterfaceIpv4 {
    /// Check whether IPv4 is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }
}

impl InterfaceIpv6 {
    /// Check whether IPv6 is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }
}

impl IpConfig for InterfaceIpv4 {
    const FAMILY: IpFamily = IpFamily::Ipv4;

    fn enabled(&self) -> Option<bool> {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = Some(enabled);
    }

    fn requests_dynamic(&self) -> bool {
        self.dhcp == Some(true)
    }

    fn is_dynamic(&self) -> bool {
        self.is_dhcp()
    }

    fn addresses(&self) -> Option<&Vec<IpAddrEntry>> {
        self.addresses.as_ref()
    }

    fn addresses_mut(&mut self) -> &mut Option<Vec<IpAddrEntry>> {
        &mut self.addresses
    }

    fn auto(&self) -> &AutoIpConfig {
        &self.auto
    }

    fn auto_mut(&mut self) -> &mut AutoIpConfig {
        &mut self.auto
    }

    fn update(&mut self, other: &Self) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.dhcp.is_some() {
            self.dhcp = other.dhcp;
        }
        if other.addresses.is_some() {
            self.addresses.clone_from(&other.addresses);
        }
        self.auto.update(&other.auto);
        if other.dhcp_client_id.is_some() {
            self.dhcp_client_id.clone_from(&other.dhcp_client_id);
        }
        if other.dhcp_send_hostname.is_some() {
            self.dhcp_send_hostname = other.dhcp_send_hostname;
        }
        if other.dhcp_custom_hostname.is_some() {
            self.dhcp_custom_hostname
                .clone_from(&other.dhcp_custom_hostname);
        }
    }

    fn clear_dhcp_options(&mut self) {
        self.dhcp_client_id = None;
        self.dhcp_send_hostname = None;
        self.dhcp_custom_hostname = None;
    }

    fn disabled() -> Self {
        InterfaceIpv4::disabled()
    }
}

impl IpConfig for InterfaceIpv6 {
    const FAMILY: IpFamily = IpFamily::Ipv6;

    fn enabled(&self) -> Option<bool> {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = Some(enabled);
    }

    fn requests_dynamic(&self) -> bool {
        self.dhcp == Some(true) || self.autoconf == Some(true)
    }

    fn is_dynamic(&self) -> bool {
        self.is_dhcp() || self.is_autoconf()
    }

    fn addresses(&self) -> Option<&Vec<IpAddrEntry>> {
        self.addresses.as_ref()
    }

    fn addresses_mut(&mut self) -> &mut Option<Vec<IpAddrEntry>> {
        &mut self.addresses
    }

    fn auto(&self) -> &AutoIpConfig {
        &self.auto
    }

    fn auto_mut(&mut self) -> &mut AutoIpConfig {
        &mut self.auto
    }

    fn update(&mut self, other: &Self) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.dhcp.is_some() {
            self.dhcp = other.dhcp;
        }
        if other.autoconf.is_some() {
            self.autoconf = other.autoconf;
        }
        if other.addresses.is_some() {
            self.addresses.clone_from(&other.addresses);
        }
        self.auto.update(&other.auto);
        if other.dhcp_duid.is_some() {
            self.dhcp_duid.clone_from(&other.dhcp_duid);
        }
        if other.dhcp_send_hostname.is_some() {
            self.dhcp_send_hostname = other.dhcp_send_hostname;
        }
        if other.dhcp_custom_hostname.is_some() {
            self.dhcp_custom_hostname
                .clone_from(&other.dhcp_custom_hostname);
        }
        if other.token.is_some() {
            self.token.clone_from(&other.token);
        }
        if other.addr_gen_mode.is_some() {
            self.addr_gen_mode = other.addr_gen_mode;
        }
    }

    fn clear_dhcp_options(&mut self) {
        self.dhcp_duid = None;
        self.dhcp_send_hostname = None;
        self.dhcp_custom_hostname = None;
    }

    fn disabled() -> Self {
        InterfaceIpv6::disabled()
    }
}
