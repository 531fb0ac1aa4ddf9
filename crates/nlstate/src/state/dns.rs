//! DNS resolver model.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::ip::AddressParseError;

/// Configured and running resolver settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DnsState {
    /// Static resolver configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DnsConfig>,
    /// Effective resolver configuration, including learned servers. Read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<DnsConfig>,
}

/// Resolver settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DnsConfig {
    /// Name servers, in priority order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Vec<String>>,
    /// Search domains, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
}

impl DnsConfig {
    /// Create a configuration with the given servers and search domains.
    pub fn new(servers: &[&str], search: &[&str]) -> Self {
        Self {
            server: Some(servers.iter().map(|s| s.to_string()).collect()),
            search: Some(search.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Server list, empty when unset.
    pub fn servers(&self) -> &[String] {
        self.server.as_deref().unwrap_or_default()
    }

    /// Search list, empty when unset.
    pub fn searches(&self) -> &[String] {
        self.search.as_deref().unwrap_or_default()
    }

    /// Check if no server and no search domain is configured.
    pub fn is_empty(&self) -> bool {
        self.servers().is_empty() && self.searches().is_empty()
    }

    /// Compare server and search lists, treating unset as empty.
    pub fn same_as(&self, other: &DnsConfig) -> bool {
        self.servers() == other.servers() && self.searches() == other.searches()
    }

    /// Overlay lists set in `other`. Each list is replaced wholesale.
    pub(crate) fn update(&mut self, other: &DnsConfig) {
        if other.server.is_some() {
            self.server.clone_from(&other.server);
        }
        if other.search.is_some() {
            self.search.clone_from(&other.search);
        }
    }

    /// Validate servers and rewrite them in canonical form.
    ///
    /// A `%iface` scope suffix is kept for link-local IPv6 servers.
    pub fn normalize(&mut self) -> Result<(), AddressParseError> {
        for server in self.server.iter_mut().flatten() {
            let (addr, scope) = match server.split_once('%') {
                Some((addr, scope)) => (addr, Some(scope)),
                None => (server.as_str(), None),
            };
            let parsed: IpAddr = addr
                .trim()
                .parse()
                .map_err(|_| AddressParseError::InvalidAddress(server.clone()))?;
            *server = match scope {
                Some(scope) => format!("{}%{}", parsed, scope),
                None => parsed.to_string(),
            };
        }
        if let Some(search) = self.search.as_mut() {
            search.retain(|s| !s.trim().is_empty());
        }
        Ok(())
    }
}
