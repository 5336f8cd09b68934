//! The in-memory vote log (§4.2, §9).
//!
//! Grounded on the source's `TendermintMessageLog`, with the two fixes §9 calls out as required
//! for soundness: votes are deduplicated by sender, and threshold queries are scoped to a single
//! round rather than summed across the whole height. Proposals are kept indexed by value across
//! every round of the height (not just the current round), which is what lets rule R2 look up a
//! quorum a value gathered in an earlier round.

use std::collections::{BTreeMap, HashMap};

use hummer::coding::hex_encode;

use crate::types::{Precommit, Prevote, Proposal, ReplicaId, Value, ValueId};

/// Per-round tally of prevotes or precommits, deduplicated by sender.
#[derive(Debug, Default, Clone)]
struct RoundVotes<M> {
    /// Bucket keyed by `id(v)` (`None` is the nil bucket); within a bucket, at most one vote per
    /// sender is retained.
    buckets: HashMap<Option<ValueId>, HashMap<ReplicaId, M>>,
}

impl<M: Clone> RoundVotes<M> {
    fn add(&mut self, id: Option<ValueId>, from: ReplicaId, msg: M) {
        self.buckets.entry(id).or_default().insert(from, msg);
    }

    fn count_for(&self, id: &Option<ValueId>) -> u64 {
        self.buckets.get(id).map_or(0, |b| b.len() as u64)
    }

    fn total(&self) -> u64 {
        self.buckets.values().map(|b| b.len() as u64).sum()
    }
}

/// The per-replica vote log. One instance per height; rebuilt on every commit (§3).
#[derive(Debug, Clone)]
pub struct MessageLog {
    /// Owning replica, kept only for log messages.
    id: ReplicaId,
    /// Proposals indexed by value, retained across every round of the current height.
    proposals: HashMap<Value, Proposal>,
    /// Prevotes, partitioned by round.
    prevotes: BTreeMap<u64, RoundVotes<Prevote>>,
    /// Precommits, partitioned by round.
    precommits: BTreeMap<u64, RoundVotes<Precommit>>,
}

impl MessageLog {
    /// Create a fresh, empty log for the given replica.
    pub fn new(id: ReplicaId) -> Self {
        MessageLog {
            id,
            proposals: HashMap::new(),
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
        }
    }

    /// Store a proposal, indexed by its value. §9 fix (c): only the round's designated proposer's
    /// value should ever reach this call; the replica state machine is responsible for that
    /// check before calling `add_proposal` (the log itself has no notion of who the proposer is).
    pub fn add_proposal(&mut self, msg: Proposal) {
        log::debug!(
            "replica {} - log: storing proposal for value {:?} (h={}, round={})",
            self.id,
            hex_encode(msg.value.clone()),
            msg.height,
            msg.round
        );
        self.proposals.insert(msg.value.clone(), msg);
    }

    /// Insert a prevote, replacing any earlier prevote from the same sender in the same round.
    pub fn add_prevote(&mut self, msg: Prevote) {
        log::debug!(
            "replica {} - log: prevote from {} for {:?} (h={}, round={})",
            self.id,
            msg.from,
            msg.id,
            msg.height,
            msg.round
        );
        self.prevotes
            .entry(msg.round)
            .or_default()
            .add(msg.id.clone(), msg.from, msg);
    }

    /// Insert a precommit, replacing any earlier precommit from the same sender in the same
    /// round.
    pub fn add_precommit(&mut self, msg: Precommit) {
        log::debug!(
            "replica {} - log: precommit from {} for {:?} (h={}, round={})",
            self.id,
            msg.from,
            msg.id,
            msg.height,
            msg.round
        );
        self.precommits
            .entry(msg.round)
            .or_default()
            .add(msg.id.clone(), msg.from, msg);
    }

    /// Return the stored proposal for `value`, if any, from any round of this height.
    pub fn proposal(&self, value: &Value) -> Option<&Proposal> {
        self.proposals.get(value)
    }

    /// All proposals seen this height, across every round.
    pub fn proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    /// Total prevotes (any value, including nil) received in `round`.
    pub fn num_prevotes(&self, round: u64) -> u64 {
        self.prevotes.get(&round).map_or(0, RoundVotes::total)
    }

    /// Prevotes for `id` (use `None` for nil) received in `round`.
    pub fn num_prevotes_for(&self, round: u64, id: &Option<ValueId>) -> u64 {
        self.prevotes.get(&round).map_or(0, |r| r.count_for(id))
    }

    /// Total precommits (any value, including nil) received in `round`.
    pub fn num_precommits(&self, round: u64) -> u64 {
        self.precommits.get(&round).map_or(0, RoundVotes::total)
    }

    /// Precommits for `id` (use `None` for nil) received in `round`.
    pub fn num_precommits_for(&self, round: u64, id: &Option<ValueId>) -> u64 {
        self.precommits.get(&round).map_or(0, |r| r.count_for(id))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Precommit, Prevote, Proposal};

    fn proposal(round: u64, value: &str, from: ReplicaId) -> Proposal {
        Proposal {
            height: 0,
            round,
            value: Value::from(value.to_string()),
            valid_round: None,
            from,
        }
    }

    fn prevote(round: u64, id: Option<&str>, from: ReplicaId) -> Prevote {
        Prevote {
            height: 0,
            round,
            id: id.map(|s| ValueId::from(s.to_string())),
            from,
        }
    }

    fn precommit(round: u64, id: Option<&str>, from: ReplicaId) -> Precommit {
        Precommit {
            height: 0,
            round,
            id: id.map(|s| ValueId::from(s.to_string())),
            from,
        }
    }

    #[test]
    fn dedups_repeated_sender_in_same_round() {
        let mut log = MessageLog::new(0);
        log.add_prevote(prevote(0, Some("a"), 3));
        log.add_prevote(prevote(0, Some("b"), 3));
        // Same sender voted twice in the same round: only the latest counts once.
        assert_eq!(log.num_prevotes(0), 1);
        assert_eq!(log.num_prevotes_for(0, &Some(ValueId::from("a".to_string()))), 0);
        assert_eq!(log.num_prevotes_for(0, &Some(ValueId::from("b".to_string()))), 1);
    }

    #[test]
    fn counts_distinct_senders() {
        let mut log = MessageLog::new(0);
        log.add_prevote(prevote(0, Some("a"), 0));
        log.add_prevote(prevote(0, Some("a"), 1));
        log.add_prevote(prevote(0, Some("a"), 2));
        assert_eq!(log.num_prevotes_for(0, &Some(ValueId::from("a".to_string()))), 3);
        assert_eq!(log.num_prevotes(0), 3);
    }

    #[test]
    fn rounds_are_scoped_independently() {
        let mut log = MessageLog::new(0);
        log.add_prevote(prevote(0, Some("a"), 0));
        log.add_prevote(prevote(1, Some("a"), 0));
        assert_eq!(log.num_prevotes(0), 1);
        assert_eq!(log.num_prevotes(1), 1);
    }

    #[test]
    fn proposals_are_retained_across_rounds() {
        let mut log = MessageLog::new(0);
        log.add_proposal(proposal(0, "v", 0));
        assert!(log.proposal(&Value::from("v".to_string())).is_some());
        // A later round's lookup still finds it: proposals aren't cleared on round change.
        assert_eq!(log.proposals().count(), 1);
    }

    #[test]
    fn nil_bucket_is_independent_of_the_value_bucket() {
        let mut log = MessageLog::new(0);
        log.add_precommit(precommit(0, None, 0));
        log.add_precommit(precommit(0, None, 1));
        log.add_precommit(precommit(0, Some("v"), 2));
        assert_eq!(log.num_precommits_for(0, &None), 2);
        assert_eq!(log.num_precommits(0), 3);
    }
}
