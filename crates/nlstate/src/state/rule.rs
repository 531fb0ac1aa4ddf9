//! Policy routing rule model.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ip::{AddressParseError, IpFamily, format_network, parse_cidr};
use super::route::{EntryState, normalize_table};

/// Configured routing rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteRules {
    /// Rule list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<RouteRuleEntry>>,
}

impl RouteRules {
    /// Iterate rules that are not removal entries.
    pub fn config_rules(&self) -> impl Iterator<Item = &RouteRuleEntry> {
        self.config.iter().flatten().filter(|r| !r.is_absent())
    }
}

/// A policy routing rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteRuleEntry {
    /// Set to `absent` to remove matching rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EntryState>,
    /// Source prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_from: Option<String>,
    /// Destination prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_to: Option<String>,
    /// Rule priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Table to look up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<u32>,
}

impl RouteRuleEntry {
    /// Create an empty rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a removal entry. Unset fields act as wildcards.
    pub fn absent() -> Self {
        Self {
            state: Some(EntryState::Absent),
            ..Default::default()
        }
    }

    /// Set the source prefix.
    pub fn ip_from(mut self, prefix: impl Into<String>) -> Self {
        self.ip_from = Some(prefix.into());
        self
    }

    /// Set the destination prefix.
    pub fn ip_to(mut self, prefix: impl Into<String>) -> Self {
        self.ip_to = Some(prefix.into());
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the table.
    pub fn table(mut self, table: u32) -> Self {
        self.route_table = Some(table);
        self
    }

    /// Check if this is a removal entry.
    pub fn is_absent(&self) -> bool {
        self.state == Some(EntryState::Absent)
    }

    /// Table with the main table folded to 0.
    pub fn effective_table(&self) -> u32 {
        normalize_table(self.route_table)
    }

    /// Address family derived from the prefixes.
    pub fn family(&self) -> Option<IpFamily> {
        [&self.ip_from, &self.ip_to]
            .into_iter()
            .flatten()
            .find_map(|p| parse_prefix(p).ok())
            .map(|(addr, _)| IpFamily::of(&addr))
    }

    /// Validate and rewrite prefixes in canonical form.
    ///
    /// A bare address is treated as a host prefix.
    pub fn normalize(&mut self) -> Result<(), AddressParseError> {
        let mut families = Vec::new();
        for prefix in [&mut self.ip_from, &mut self.ip_to].into_iter().flatten() {
            let (addr, len) = parse_prefix(prefix)?;
            families.push(IpFamily::of(&addr));
            *prefix = format_network(addr, len);
        }
        if let [a, b] = families[..]
            && a != b
        {
            return Err(AddressParseError::WrongFamily {
                address: self.ip_to.clone().unwrap_or_default(),
                expected: a,
            });
        }
        if self.route_table.is_some() {
            self.route_table = Some(self.effective_table());
        }
        Ok(())
    }

    /// Check whether a removal entry matches `other`.
    pub fn matches(&self, other: &RouteRuleEntry) -> bool {
        fn field_matches<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        }
        field_matches(&self.ip_from, &other.ip_from)
            && field_matches(&self.ip_to, &other.ip_to)
            && field_matches(&self.priority, &other.priority)
            && self
                .route_table
                .is_none_or(|_| self.effective_table() == other.effective_table())
    }

    /// Check whether two present rules are the same rule.
    pub fn same_rule(&self, other: &RouteRuleEntry) -> bool {
        self.ip_from == other.ip_from
            && self.ip_to == other.ip_to
            && self.priority == other.priority
            && self.effective_table() == other.effective_table()
    }
}

fn parse_prefix(s: &str) -> Result<(std::net::IpAddr, u8), AddressParseError> {
    if s.contains('/') {
        return parse_cidr(s);
    }
    let addr: std::net::IpAddr = s
        .trim()
        .parse()
        .map_err(|_| AddressParseError::InvalidAddress(s.to_string()))?;
    Ok((addr, IpFamily::of(&addr).max_prefix()))
}

impl fmt::Display for RouteRuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            write!(f, "absent ")?;
        }
        if let Some(priority) = self.priority {
            write!(f, "{}: ", priority)?;
        }
        write!(f, "from {}", self.ip_from.as_deref().unwrap_or("all"))?;
        if let Some(to) = &self.ip_to {
            write!(f, " to {}", to)?;
        }
        write!(f, " lookup {}", self.effective_table())
    }
}
