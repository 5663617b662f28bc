//! Error handling for Cumulus
//!
//! Placement distinguishes three kinds of failure:
//!
//! - **Expected exhaustion**: no host fits. Planners report this as `Ok(None)`; it only
//!   becomes [`CumulusError::InsufficientCapacity`] at the orchestrator boundary when the
//!   caller demanded a placement.
//! - **Policy errors**: contradictory affinity rules ([`CumulusError::AffinityConflict`]) or
//!   an administrator misconfiguration such as a bare-metal offering that does not match
//!   its host ([`CumulusError::BareMetalCapacityMismatch`]). These always propagate.
//! - **Infrastructure errors**: storage, serialization and IO failures. Inside the capacity
//!   ledger these are absorbed and reported as a failed reservation; everywhere else they
//!   propagate with the operation that produced them.

pub mod constructors;
pub mod types;

pub use types::{CumulusError, CumulusResult};

#[cfg(test)]
mod tests;
