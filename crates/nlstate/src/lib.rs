//! Declarative network state reconciler.
//!
//! This crate takes a *desired* network state (interfaces, IP addresses,
//! routes, routing rules and DNS settings), merges it onto the host's
//! current state, computes an ordered plan, hands the plan to a
//! [`Backend`] and verifies the result. When verification fails the host
//! is rolled back to the state captured before the change.
//!
//! # Features
//!
//! - `lab` - In-memory simulated host with DHCP and router advertisement
//!   services, used by the integration tests and the `nlstatectl` tool
//! - `full` - All features enabled
//!
//! # Example
//!
//! ```ignore
//! use nlstate::NetState;
//! use nlstate::state::{Interface, InterfaceIpv4, IpAddrEntry, NetworkState};
//!
//! #[tokio::main]
//! async fn main() -> nlstate::Result<()> {
//!     let engine = NetState::new(backend);
//!
//!     let desired = NetworkState::new().interface(
//!         Interface::ethernet("eth1").up().with_ipv4(InterfaceIpv4::with_static(vec![
//!             IpAddrEntry::new("192.0.2.251", 24),
//!         ])),
//!     );
//!
//!     // Preview
//!     println!("{}", engine.plan(&desired).await?.summary());
//!
//!     // Apply, verify, roll back on failure
//!     engine.apply(&desired).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline
//!
//! 1. [`validation`] rejects malformed documents before anything runs.
//! 2. [`merge`] overlays the desired document on the current state.
//! 3. [`policy`] resolves per-family rules (auto options, tokens, MTU).
//! 4. [`plan`] diffs target and current state into ordered operations.
//! 5. [`transaction`] applies the plan, then [`verify`]s it with [`poll`].

pub mod backend;
pub mod error;
pub mod merge;
pub mod plan;
pub mod policy;
pub mod poll;
pub mod state;
pub mod transaction;
pub mod validation;
pub mod verify;

mod dynamic;

// Feature-gated modules
#[cfg(feature = "lab")]
pub mod lab;

pub use backend::{ApplyMode, ApplyReport, Backend};
pub use error::{Error, Result, ValidationErrorInfo};
pub use plan::{Operation, Plan, generate_plan};
pub use state::NetworkState;
pub use transaction::{ApplyOptions, Checkpoint, NetState, Timeouts, TransactionState};
pub use validation::{Validatable, ValidationResult};
pub use verify::{Difference, VerificationReport};
