//! Fairness scheduler for Lode.
//!
//! Each scheduling decision runs inside one registry lease:
//!
//! 1. reconcile the registry with the live, filtered listing
//! 2. collect eligible blobs (unread bytes, unowned or owned by us)
//! 3. pick the lowest generation, unless the oldest-modified candidate has
//!    been starved for longer than 1.5 poll intervals
//! 4. claim it: set the owner, raise its generation, renormalize
//!
//! The pure steps live in [`policy`]; [`Scheduler`] wires them to the store.

pub mod config;
pub mod error;
pub mod policy;
pub mod scheduler;

pub use config::{CreatePolicy, SchedulerConfig};
pub use error::{SchedError, SchedResult};
pub use policy::{Claim, ReconcileReport};
pub use scheduler::Scheduler;
