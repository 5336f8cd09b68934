//! Small value types used only by the replica state machine (§3).

use derive_more::Display;

use crate::types::Value;

/// A value together with the round in which it reached some status: locked-in (via a
/// PRECOMMIT) or valid (via a prevote quorum). Reused for both `lockedValue`/`lockedRound` and
/// `validValue`/`validRound`, the way the source pairs each value with its round.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "RoundValue(round={}, value={:?})", round, value)]
pub struct RoundValue {
    pub value: Value,
    pub round: u64,
}

impl RoundValue {
    pub fn new(value: Value, round: u64) -> Self {
        RoundValue { value, round }
    }
}

/// The "for the first time" one-shot flags guarding rules R3, R4 and R6. Reset to `false` on
/// every round or height change (§3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OneShotFlags {
    /// R3 has already armed the prevote timer this round.
    pub first_prevote: bool,
    /// R6 has already armed the precommit timer this round.
    pub first_precommit: bool,
    /// R4 has already locked (or updated `validValue` without locking) this round.
    pub locked: bool,
}

impl OneShotFlags {
    pub fn reset(&mut self) {
        *self = OneShotFlags::default();
    }
}
