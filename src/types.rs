use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A decided-upon value, or a piece of one circulating in a proposal/vote. Opaque to the core:
/// validity and identity are supplied by collaborators (see [`crate::collaborators`]).
pub type Value = Bytes;

/// `id(v)`: the identifier used to key prevote/precommit buckets. In this didactic core `id` is
/// the identity function (see [`crate::collaborators::id_of`]), so `ValueId` and `Value` share a
/// representation, but the alias keeps call sites honest about which role a `Bytes` is playing.
pub type ValueId = Bytes;

/// Replica identifier, `[0, n)`.
pub type ReplicaId = u64;

/// Initial height, `h = 0`.
pub const INIT_HEIGHT: u64 = 0;
/// Initial round, `round = 0`.
pub const INIT_ROUND: u64 = 0;

/// The current phase of a round.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// Waiting for (or producing) this round's proposal.
    #[display(fmt = "propose")]
    Propose,
    /// Casting or collecting prevotes.
    #[display(fmt = "prevote")]
    Prevote,
    /// Casting or collecting precommits.
    #[display(fmt = "precommit")]
    Precommit,
}

impl Default for Step {
    fn default() -> Self {
        Step::Propose
    }
}

/// A proposer's suggested value for `(height, round)`.
///
/// `valid_round = None` means "fresh": the proposer has no earlier round in which this value
/// gathered a prevote quorum. `valid_round = Some(vr)` means the value became valid for the
/// sender in round `vr` (§4.1 rule R2). `Option<u64>`'s derived `Ord` places `None` below every
/// `Some`, which is exactly the `-1 < vr` relationship the algorithm relies on for `lockedRound`
/// comparisons.
#[derive(Clone, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[display(
    fmt = "PROPOSAL(h={}, round={}, valid_round={:?}, from={})",
    height,
    round,
    valid_round,
    from
)]
pub struct Proposal {
    pub height: u64,
    pub round: u64,
    pub value: Value,
    pub valid_round: Option<u64>,
    pub from: ReplicaId,
}

/// A vote for `id(v)`, or nil (`None`).
#[derive(Clone, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[display(fmt = "PREVOTE(h={}, round={}, id={:?}, from={})", height, round, id, from)]
pub struct Prevote {
    pub height: u64,
    pub round: u64,
    pub id: Option<ValueId>,
    pub from: ReplicaId,
}

/// A vote for the locked value, or nil (`None`).
#[derive(Clone, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[display(fmt = "PRECOMMIT(h={}, round={}, id={:?}, from={})", height, round, id, from)]
pub struct Precommit {
    pub height: u64,
    pub round: u64,
    pub id: Option<ValueId>,
    pub from: ReplicaId,
}

/// Fired when the proposal timer for `(height, round)` elapses without a valid proposal.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(fmt = "ProposalTimeout(h={}, round={})", height, round)]
pub struct ProposalTimeout {
    pub height: u64,
    pub round: u64,
}

/// Fired when the prevote timer for `(height, round)` elapses.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(fmt = "PrevoteTimeout(h={}, round={})", height, round)]
pub struct PrevoteTimeout {
    pub height: u64,
    pub round: u64,
}

/// Fired when the precommit timer for `(height, round)` elapses.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display(fmt = "PrecommitTimeout(h={}, round={})", height, round)]
pub struct PrecommitTimeout {
    pub height: u64,
    pub round: u64,
}

/// Everything that can land in a replica's single inbound event queue: network messages
/// (including self-broadcast proposals), and timer firings.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Event {
    #[display(fmt = "{}", _0)]
    Proposal(Proposal),
    #[display(fmt = "{}", _0)]
    Prevote(Prevote),
    #[display(fmt = "{}", _0)]
    Precommit(Precommit),
    #[display(fmt = "{}", _0)]
    ProposalTimeout(ProposalTimeout),
    #[display(fmt = "{}", _0)]
    PrevoteTimeout(PrevoteTimeout),
    #[display(fmt = "{}", _0)]
    PrecommitTimeout(PrecommitTimeout),
}

impl From<Proposal> for Event {
    fn from(m: Proposal) -> Self {
        Event::Proposal(m)
    }
}

impl From<Prevote> for Event {
    fn from(m: Prevote) -> Self {
        Event::Prevote(m)
    }
}

impl From<Precommit> for Event {
    fn from(m: Precommit) -> Self {
        Event::Precommit(m)
    }
}

impl From<ProposalTimeout> for Event {
    fn from(m: ProposalTimeout) -> Self {
        Event::ProposalTimeout(m)
    }
}

impl From<PrevoteTimeout> for Event {
    fn from(m: PrevoteTimeout) -> Self {
        Event::PrevoteTimeout(m)
    }
}

impl From<PrecommitTimeout> for Event {
    fn from(m: PrecommitTimeout) -> Self {
        Event::PrecommitTimeout(m)
    }
}
