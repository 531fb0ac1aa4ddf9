//! Validation of desired state documents.
//!
//! This module provides the [`Validatable`] trait for document-level checks
//! that need no knowledge of the current state. They run before anything is
//! merged or applied so that malformed input fails fast with every problem
//! reported at once.
//!
//! Checks that depend on the merged target (an MTU too small for IPv6 on an
//! interface whose IPv6 is enabled elsewhere, routes to missing interfaces)
//! live in [`crate::policy`].
//!
//! # Example
//!
//! ```ignore
//! use nlstate::validation::Validatable;
//!
//! let result = desired.validate();
//! for err in &result.errors {
//!     eprintln!("Error in {}: {}", err.field, err.message);
//! }
//! result.into_result()?;
//! ```

use std::collections::HashSet;

use crate::Error;
use crate::error::ValidationErrorInfo;
use crate::state::{
    DnsConfig, Interface, InterfaceIpv4, InterfaceIpv6, IpConfig, NetworkState, RouteEntry,
    RouteRuleEntry,
};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// The document cannot be applied.
    Error,
    /// Part of the document will be ignored.
    Warning,
}

/// A single validation error or warning.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Field that failed validation.
    pub field: String,
    /// Description of the error.
    pub message: String,
    /// Severity of the issue.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new validation warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }

    /// Check if this is an error (not a warning).
    pub fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            ValidationSeverity::Error => "error",
            ValidationSeverity::Warning => "warning",
        };
        write!(f, "{} in '{}': {}", prefix, self.field, self.message)
    }
}

/// Result of validating a document.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Errors that reject the document.
    pub errors: Vec<ValidationError>,
    /// Warnings about content that will be ignored.
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create an empty validation result (valid).
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the document is valid (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::error(field, message));
    }

    /// Add a warning to the result.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationError::warning(field, message));
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Emit every warning through `tracing`.
    pub fn log_warnings(&self) {
        for w in &self.warnings {
            tracing::warn!(field = %w.field, "{}", w.message);
        }
    }

    /// Convert to a Result, failing if there are any errors.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            let errors: Vec<ValidationErrorInfo> = self
                .errors
                .into_iter()
                .map(|e| ValidationErrorInfo::new(e.field, e.message))
                .collect();
            Err(Error::Validation(errors))
        }
    }

    /// Get all issues (errors first, then warnings).
    pub fn all_issues(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().chain(self.warnings.iter())
    }
}

/// Trait for document parts that can be checked on their own.
pub trait Validatable {
    /// Validate this part of the document.
    fn validate(&self) -> ValidationResult;

    /// Check if this part is valid (no errors).
    fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }
}

/// Validate an interface name.
pub fn validate_ifname(name: &str, field: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    if name.is_empty() {
        result.add_error(field, "interface name cannot be empty");
        return result;
    }

    // IFNAMSIZ is 16, but includes null terminator
    if name.len() > 15 {
        result.add_error(
            field,
            format!("interface name too long ({} > 15 chars)", name.len()),
        );
    }

    if name.contains('/') || name.contains('\0') || name.contains(' ') {
        result.add_error(field, "interface name contains invalid characters");
    }

    result
}

/// Validate a MAC address in `aa:bb:cc:dd:ee:ff` form.
pub fn validate_mac(mac: &str, field: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    let octets: Vec<&str> = mac.split(':').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !well_formed {
        result.add_error(field, format!("invalid MAC address '{}'", mac));
    }
    result
}

fn validate_ip<T: IpConfig>(cfg: &T, field: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    for (i, entry) in cfg.addresses().into_iter().flatten().enumerate() {
        let mut entry = entry.clone();
        if let Err(e) = entry.normalize(T::FAMILY) {
            result.add_error(format!("{}.address[{}]", field, i), e.to_string());
        }
    }

    if cfg.enabled() == Some(true) && !cfg.requests_dynamic() && !cfg.auto().is_empty() {
        result.add_warning(
            field,
            "auto-* options are ignored unless dynamic configuration is on",
        );
    }

    result
}

impl Validatable for InterfaceIpv4 {
    fn validate(&self) -> ValidationResult {
        validate_ip(self, "ipv4")
    }
}

impl Validatable for InterfaceIpv6 {
    fn validate(&self) -> ValidationResult {
        let mut result = validate_ip(self, "ipv6");
        if let Err(e) = self.parsed_token() {
            result.add_error("ipv6.token", e.to_string());
        }
        result
    }
}

impl Validatable for Interface {
    fn validate(&self) -> ValidationResult {
        let mut result = validate_ifname(&self.name, "name");

        // Content of an interface being removed is never looked at.
        if self.is_absent() {
            return prefixed(result, &format!("interfaces.{}", self.name));
        }

        if self.is_matched_by_mac() && self.mac_address.is_none() {
            result.add_error(
                "identifier",
                "matching by mac-address requires mac-address to be set",
            );
        }
        if let Some(mac) = &self.mac_address {
            result.merge(validate_mac(mac, "mac-address"));
        }
        if self.mtu == Some(0) {
            result.add_error("mtu", "MTU must be greater than 0");
        }
        if self.controller.as_deref() == Some(self.name.as_str()) {
            result.add_error("controller", "interface cannot be its own controller");
        }
        if self.veth_peer() == Some(self.name.as_str()) {
            result.add_error("veth.peer", "veth peer must differ from the interface");
        }
        if let Some(ports) = self.ports() {
            let mut seen = HashSet::new();
            for port in ports {
                if port == &self.name {
                    result.add_error("port", "interface cannot be its own port");
                } else if !seen.insert(port.as_str()) {
                    result.add_error("port", format!("port {} listed twice", port));
                }
            }
        }
        if let Some(ipv4) = &self.ipv4 {
            result.merge(ipv4.validate());
        }
        if let Some(ipv6) = &self.ipv6 {
            result.merge(ipv6.validate());
        }

        prefixed(result, &format!("interfaces.{}", self.name))
    }
}

impl Validatable for RouteEntry {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut route = self.clone();
        if let Err(e) = route.normalize() {
            result.add_error("route", e.to_string());
        }
        if !self.is_absent() {
            if self.destination.is_none() {
                result.add_error("destination", "route requires a destination");
            }
            if self.next_hop_interface.is_none() {
                result.add_error(
                    "next-hop-interface",
                    "route requires a next-hop-interface",
                );
            }
        }
        result
    }
}

impl Validatable for RouteRuleEntry {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut rule = self.clone();
        if let Err(e) = rule.normalize() {
            result.add_error("rule", e.to_string());
        }
        if !self.is_absent() && self.ip_from.is_none() && self.ip_to.is_none() {
            result.add_error("rule", "route rule requires ip-from or ip-to");
        }
        result
    }
}

impl Validatable for DnsConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut dns = self.clone();
        if let Err(e) = dns.normalize() {
            result.add_error("server", e.to_string());
        }
        result
    }
}

impl Validatable for NetworkState {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        let mut names = HashSet::new();
        for iface in &self.interfaces {
            if !names.insert(iface.name.as_str()) {
                result.add_error(
                    format!("interfaces.{}", iface.name),
                    "interface listed more than once",
                );
            }
            result.merge(iface.validate());
        }

        for (i, route) in self.routes.config.iter().flatten().enumerate() {
            result.merge(prefixed(route.validate(), &format!("routes.config[{}]", i)));
        }
        for (i, rule) in self.route_rules.config.iter().flatten().enumerate() {
            result.merge(prefixed(
                rule.validate(),
                &format!("route-rules.config[{}]", i),
            ));
        }
        if let Some(dns) = &self.dns.config {
            result.merge(prefixed(dns.validate(), "dns-resolver.config"));
        }

        result
    }
}

/// Prefix every field path in `result`.
fn prefixed(mut result: ValidationResult, scope: &str) -> ValidationResult {
    for issue in result.errors.iter_mut().chain(result.warnings.iter_mut()) {
        issue.field = format!("{}.{}", scope, issue.field);
    }
    result
}
