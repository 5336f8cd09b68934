//! The state machine proper: small value types (`smr_types`) plus the `Replica` actor
//! (`state_machine`) that drives the consensus rules.

pub mod smr_types;
mod state_machine;

pub use state_machine::Replica;
