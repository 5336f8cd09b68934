use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, ConsensusResult};

/// Replica population and fault-tolerance parameters, replacing the source's module-level `n`
/// and `f` globals with a value passed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// This replica's id, in `[0, n)`.
    pub id: u64,
    /// Total replica count.
    pub n: u64,
    /// Maximum tolerated Byzantine replicas. Must satisfy `n > 3f`.
    pub f: u64,
}

impl ReplicaConfig {
    /// Build a config, rejecting `n <= 3f` or an out-of-range id.
    pub fn new(id: u64, n: u64, f: u64) -> ConsensusResult<Self> {
        if n <= 3 * f {
            return Err(ConsensusError::ConfigErr(format!(
                "n ({}) must be greater than 3f ({})",
                n,
                3 * f
            )));
        }
        if id >= n {
            return Err(ConsensusError::ConfigErr(format!(
                "replica id {} out of range [0, {})",
                id, n
            )));
        }
        Ok(ReplicaConfig { id, n, f })
    }

    /// Size of a quorum: `2f + 1`.
    #[inline]
    pub fn quorum(&self) -> u64 {
        2 * self.f + 1
    }
}

/// The propose/prevote/precommit timeout schedule, replacing the source's module-level
/// `initTimeoutPropose`/`timeoutDelta` constants.
///
/// Delay for round `r` is `base + r * delta`, in seconds. The source uses the same base (6s) and
/// delta (1s) for all three timer kinds; that is the default here, but each kind is configurable
/// independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationConfig {
    /// Base delay, in seconds, for the proposal timer.
    pub propose_base: u64,
    /// Base delay, in seconds, for the prevote timer.
    pub prevote_base: u64,
    /// Base delay, in seconds, for the precommit timer.
    pub precommit_base: u64,
    /// Per-round increment, in seconds, added to every timer kind's base delay.
    pub delta: u64,
}

impl DurationConfig {
    /// Create a duration configuration.
    pub fn new(propose_base: u64, prevote_base: u64, precommit_base: u64, delta: u64) -> Self {
        DurationConfig {
            propose_base,
            prevote_base,
            precommit_base,
            delta,
        }
    }

    /// `timeoutPropose(round)`.
    pub fn timeout_propose(&self, round: u64) -> std::time::Duration {
        std::time::Duration::from_secs(self.propose_base + round * self.delta)
    }

    /// `timeoutPrevote(round)`.
    pub fn timeout_prevote(&self, round: u64) -> std::time::Duration {
        std::time::Duration::from_secs(self.prevote_base + round * self.delta)
    }

    /// `timeoutPrecommit(round)`.
    pub fn timeout_precommit(&self, round: u64) -> std::time::Duration {
        std::time::Duration::from_secs(self.precommit_base + round * self.delta)
    }
}

impl Default for DurationConfig {
    /// Matches the source: a 6 second base for every timer kind, growing by 1 second per round.
    fn default() -> Self {
        DurationConfig {
            propose_base: 6,
            prevote_base: 6,
            precommit_base: 6,
            delta: 1,
        }
    }
}
