//! Registry persistence for Lode.
//!
//! The registry document is the only state Lode workers share, and its
//! store-native lease is the only lock. This crate owns both:
//!
//! - [`RegistryPersister::acquire_lease`] retries on contention with a fixed
//!   interval and recovers from stuck leases by breaking them (see
//!   [`StuckLeasePolicy`]).
//! - [`RegistryPersister::with_registry`] is the critical section: lease,
//!   reload, mutate, save, release, with the release guaranteed on every
//!   exit path.
//! - Saving requires a [`LeaseGuard`], which only `acquire_lease` hands out.

pub mod config;
pub mod error;
pub mod guard;
pub mod persister;

pub use config::{LeaseConfig, StuckLeasePolicy};
pub use error::{PersistError, PersistResult};
pub use guard::LeaseGuard;
pub use persister::RegistryPersister;
