//! A didactic, single-process core implementation of a Tendermint-style BFT consensus state
//! machine (see `SPEC_FULL.md`): the height/round/step bookkeeping, the seven trigger rules, the
//! per-round vote log, and the three timers, generic over pluggable proposer-selection, validity
//! and value-production collaborators.

/// Consensus error types.
pub mod error;
/// Replica and timing configuration.
pub mod config;
/// Message and event types exchanged between replicas.
pub mod types;
/// Collaborator traits the core consumes (proposer selection, validity, value production) plus
/// their toy implementations.
pub mod collaborators;
/// The per-replica vote log.
pub mod log;
/// The propose/prevote/precommit timer service.
pub mod timer;
/// The transport facade replicas broadcast and send through.
pub mod transport;
/// The state machine replica itself.
pub mod smr;

pub use error::{ConsensusError, ConsensusResult};
pub use smr::Replica;
