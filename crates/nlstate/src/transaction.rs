//! Transactions: checkpoint, apply, verify, commit or roll back.
//!
//! Every [`NetState::apply`] runs as one transaction:
//!
//! ```text
//! Init -> Checkpointed -> Applied -> Verifying -> Committed
//!              |             |           |
//!              +-------------+-----------+------> RolledBack
//! ```
//!
//! The checkpoint is the complete state read before anything changes. On a
//! backend failure or when verification does not pass within the window,
//! the engine plans from the live state back to the checkpoint and applies
//! that plan before returning the error.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{ApplyMode, Backend};
use crate::merge::{merge_state, touched_interfaces};
use crate::plan::{self, Plan, generate_plan};
use crate::poll::{DEFAULT_POLL_INTERVAL, poll};
use crate::state::{IpConfig, NetworkState};
use crate::validation::Validatable;
use crate::verify::{expected_state, verify};
use crate::{Error, Result, policy};

/// Verification windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Window for static configuration.
    pub default: Duration,
    /// Window when a verified interface runs a DHCPv4 client.
    pub dhcpv4: Duration,
    /// Window when a verified interface runs DHCPv6 or autoconf.
    pub ipv6_autoconf: Duration,
    /// Delay between two verification attempts.
    pub interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(20),
            dhcpv4: Duration::from_secs(45),
            ipv6_autoconf: Duration::from_secs(30),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Timeouts {
    /// Largest window applicable to the interfaces of `expected`.
    pub fn window_for(&self, expected: &NetworkState) -> Duration {
        let mut window = self.default;
        for iface in expected.interfaces.iter().filter(|i| !i.is_absent()) {
            if iface.ipv4.as_ref().is_some_and(IpConfig::is_dynamic) {
                window = window.max(self.dhcpv4);
            }
            if iface.ipv6.as_ref().is_some_and(IpConfig::is_dynamic) {
                window = window.max(self.ipv6_autoconf);
            }
        }
        window
    }
}

/// Options for [`NetState::apply_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Verify the result and roll back on mismatch.
    pub verify: bool,
    /// Program the kernel directly instead of going through the managing
    /// daemon. Dynamic acquisition is rejected in this mode.
    pub kernel_only: bool,
    /// Override the verification window.
    pub timeout: Option<Duration>,
    /// Override the delay between verification attempts.
    pub interval: Option<Duration>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            verify: true,
            kernel_only: false,
            timeout: None,
            interval: None,
        }
    }
}

impl ApplyOptions {
    /// Skip verification.
    pub fn no_verify(mut self) -> Self {
        self.verify = false;
        self
    }

    /// Program the kernel directly.
    pub fn kernel_only(mut self) -> Self {
        self.kernel_only = true;
        self
    }

    /// Set the verification window.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn mode(&self) -> ApplyMode {
        if self.kernel_only {
            ApplyMode::KernelOnly
        } else {
            ApplyMode::Managed
        }
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing done yet.
    Init,
    /// The checkpoint was taken.
    Checkpointed,
    /// The plan was executed.
    Applied,
    /// Waiting for the observed state to match.
    Verifying,
    /// Finished successfully.
    Committed,
    /// Finished by restoring the checkpoint.
    RolledBack,
}

impl TransactionState {
    /// Check if `next` may follow this state.
    pub fn can_advance_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Init, Checkpointed)
                | (Checkpointed, Applied | Committed | RolledBack)
                | (Applied, Verifying | Committed)
                | (Verifying, Committed | RolledBack)
        )
    }

    /// Check if the transaction is over.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Checkpointed => "checkpointed",
            Self::Applied => "applied",
            Self::Verifying => "verifying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

struct Transaction {
    state: TransactionState,
}

impl Transaction {
    fn new() -> Self {
        Self {
            state: TransactionState::Init,
        }
    }

    fn advance(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "transaction");
        self.state = next;
    }
}

/// The complete state captured before a transaction changes anything.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    state: NetworkState,
}

impl Checkpoint {
    fn new(state: NetworkState) -> Self {
        Self { state }
    }

    /// The captured state.
    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    /// Build the state that restores this checkpoint from `live`.
    ///
    /// Interfaces created since the checkpoint are removed. Leases and
    /// learned routes are left to the clients that own them.
    pub fn restore_target(&self, live: &NetworkState) -> NetworkState {
        let mut target = NetworkState::new();
        target.interfaces = self.state.interfaces.iter().map(plan::config_view).collect();
        for iface in &live.interfaces {
            if self.state.get_interface(&iface.name).is_none() {
                target.interfaces.push(iface.clone().absent());
            }
        }
        target.routes.config = Some(
            self.state
                .routes
                .config_routes()
                .filter(|r| !r.is_auto())
                .cloned()
                .collect(),
        );
        target.route_rules.config = Some(self.state.route_rules.config_rules().cloned().collect());
        target.dns.config = Some(self.state.dns.config.clone().unwrap_or_default());
        target
    }
}

struct Prepared {
    target: NetworkState,
    touched: BTreeSet<String>,
    plan: Plan,
}

/// Validate, merge and resolve `desired` against `current`, then plan.
fn prepare(desired: &NetworkState, current: &NetworkState, kernel_only: bool) -> Result<Prepared> {
    let validation = desired.validate();
    validation.log_warnings();
    validation.into_result()?;

    let mut target = merge_state(desired, current)?;
    let touched = touched_interfaces(desired, current, &target)?;
    policy::resolve(&mut target, desired, current, &touched)?;
    if kernel_only {
        policy::check_kernel_only(&target, &touched)?;
    }
    let plan = generate_plan(&target, current);
    debug!(changes = plan.change_count(), touched = touched.len(), "plan computed");
    Ok(Prepared {
        target,
        touched,
        plan,
    })
}

/// Declarative network state engine.
///
/// # Example
///
/// ```ignore
/// use nlstate::{NetState, state::*};
///
/// let engine = NetState::new(backend);
/// let desired = NetworkState::new().interface(
///     Interface::ethernet("eth1").with_ipv4(InterfaceIpv4::with_dhcp()),
/// );
/// let applied = engine.apply(&desired).await?;
/// ```
pub struct NetState<B> {
    backend: B,
    lock: Mutex<()>,
    timeouts: Timeouts,
}

impl<B: Backend> NetState<B> {
    /// Create an engine on top of `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
            timeouts: Timeouts::default(),
        }
    }

    /// Use custom verification windows.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the verification windows.
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Read the complete current state.
    pub async fn show(&self) -> Result<NetworkState> {
        self.backend.read_state().await
    }

    /// Read the persistent configuration: the current state without
    /// acquired addresses, learned routes and learned DNS servers.
    pub async fn show_running_config(&self) -> Result<NetworkState> {
        Ok(self.show().await?.to_running_config())
    }

    /// Compute the plan for `desired` without applying it.
    pub async fn plan(&self, desired: &NetworkState) -> Result<Plan> {
        let current = self.backend.read_state().await?;
        Ok(prepare(desired, &current, false)?.plan)
    }

    /// Apply `desired` with verification and rollback.
    ///
    /// Returns the observed state after the change.
    pub async fn apply(&self, desired: &NetworkState) -> Result<NetworkState> {
        self.apply_with_options(desired, ApplyOptions::default())
            .await
    }

    /// Apply `desired` with custom options.
    pub async fn apply_with_options(
        &self,
        desired: &NetworkState,
        options: ApplyOptions,
    ) -> Result<NetworkState> {
        let _guard = self.lock.lock().await;
        let mut tx = Transaction::new();

        let checkpoint = Checkpoint::new(self.backend.read_state().await?);
        tx.advance(TransactionState::Checkpointed);

        let prepared = prepare(desired, checkpoint.state(), options.kernel_only)?;
        if prepared.plan.is_empty() {
            // The configuration matches, but leases and wait-ip are only
            // visible in the observed state, so verification still runs.
            info!("configuration already in place");
            tx.advance(TransactionState::Applied);
            if !options.verify {
                tx.advance(TransactionState::Committed);
                return Ok(checkpoint.state);
            }
        } else {
            info!(changes = prepared.plan.change_count(), "applying plan");
            debug!("plan:\n{}", prepared.plan.summary());
            if let Err(err) = self.backend.apply_plan(&prepared.plan, options.mode()).await {
                warn!(error = %err, "apply failed, restoring checkpoint");
                self.rollback(&checkpoint).await;
                tx.advance(TransactionState::RolledBack);
                return Err(err);
            }
            tx.advance(TransactionState::Applied);

            if !options.verify {
                tx.advance(TransactionState::Committed);
                return self.backend.read_state().await;
            }
        }

        tx.advance(TransactionState::Verifying);
        let expected = expected_state(&prepared.target, desired, &prepared.touched);
        let window = options
            .timeout
            .unwrap_or_else(|| self.timeouts.window_for(&expected));
        let interval = options.interval.unwrap_or(self.timeouts.interval);
        debug!(?window, ?interval, "verifying");

        let backend = &self.backend;
        let expected = &expected;
        let outcome = poll(Instant::now() + window, interval, || async move {
            let observed = backend.read_state().await?;
            verify(expected, &observed)
                .map(|()| observed)
                .map_err(|report| Error::Verification {
                    report,
                    rolled_back: false,
                })
        })
        .await;

        match outcome {
            Ok(observed) => {
                info!("verified, committing");
                tx.advance(TransactionState::Committed);
                Ok(observed)
            }
            Err(err) => {
                warn!(error = %err, "verification failed, restoring checkpoint");
                let rolled_back = self.rollback(&checkpoint).await;
                tx.advance(TransactionState::RolledBack);
                Err(match err {
                    Error::Verification { report, .. } => Error::Verification {
                        report,
                        rolled_back,
                    },
                    other => other,
                })
            }
        }
    }

    /// Restore `checkpoint`, best effort. Returns whether the restore plan
    /// was applied.
    async fn rollback(&self, checkpoint: &Checkpoint) -> bool {
        let live = match self.backend.read_state().await {
            Ok(live) => live,
            Err(err) => {
                warn!(error = %err, "rollback: cannot read live state");
                return false;
            }
        };
        let plan = generate_plan(&checkpoint.restore_target(&live), &live);
        if plan.is_empty() {
            info!("rollback: nothing to restore");
            return true;
        }
        // Profiles are restored through the daemon so dynamic families come
        // back too.
        match self.backend.apply_plan(&plan, ApplyMode::Managed).await {
            Ok(report) => {
                info!(changes = report.changes_made, "rolled back to checkpoint");
                true
            }
            Err(err) => {
                warn!(error = %err, "rollback failed");
                false
            }
        }
    }
}
