//! Backend abstraction.
//!
//! A backend owns the host: it reports the complete current state and
//! executes plans. The engine never touches the host directly.

use std::future::Future;

use crate::Result;
use crate::plan::Plan;
use crate::state::NetworkState;

/// How a backend should execute a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Store profiles and let the managing daemon activate them. DHCP and
    /// autoconf clients run under the daemon.
    #[default]
    Managed,
    /// Write kernel state directly. No dynamic acquisition is possible.
    KernelOnly,
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Number of operations executed.
    pub changes_made: usize,
    /// One line per executed operation.
    pub summary: Vec<String>,
}

impl ApplyReport {
    /// Build the report for a fully executed plan.
    pub fn for_plan(plan: &Plan) -> Self {
        Self {
            changes_made: plan.change_count(),
            summary: plan.iter().map(|op| op.to_string()).collect(),
        }
    }

    /// Get a human-readable summary.
    pub fn summary_text(&self) -> String {
        if self.summary.is_empty() {
            "No changes made".to_string()
        } else {
            self.summary.join("\n")
        }
    }
}

/// A host the engine can read and change.
///
/// `apply_plan` either executes the whole plan or fails with
/// [`Error::Backend`](crate::Error::Backend); callers roll back on failure.
pub trait Backend: Send + Sync {
    /// Read the complete current state, including learned addresses,
    /// routes and DNS servers.
    fn read_state(&self) -> impl Future<Output = Result<NetworkState>> + Send;

    /// Execute `plan` in order.
    fn apply_plan(
        &self,
        plan: &Plan,
        mode: ApplyMode,
    ) -> impl Future<Output = Result<ApplyReport>> + Send;
}
