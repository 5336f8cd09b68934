//! External collaborators the core consumes but does not implement: the value producer, the
//! validity predicate, the value identifier, and the proposer-selection oracle (§6). Production
//! deployments supply their own; this crate ships the toy implementations the source uses so the
//! demo harness and tests have something concrete to run against.

use async_trait::async_trait;

use crate::types::{ReplicaId, Value, ValueId};

/// `getValue()`: called only by the proposer of a round when it has no `validValue` carried over
/// from an earlier round. Left `async` so a real deployment can pull a value from a mempool or
/// block builder without blocking the replica's event loop.
#[async_trait]
pub trait ValueProducer: Send + Sync {
    async fn get_value(&self) -> Value;
}

/// `valid(value)`: the application-level validity predicate. Never evaluated on nil.
pub trait Validator: Send + Sync {
    fn valid(&self, value: &Value) -> bool;
}

/// `proposer(h, round)`: the proposer-selection oracle. Implementations must be referentially
/// transparent and agree across all correct replicas.
pub trait Proposer: Send + Sync {
    fn proposer(&self, height: u64, round: u64) -> ReplicaId;
}

/// `id(v)`: deterministic and injective on distinct values. This didactic core treats values as
/// already being their own identifier, matching the source's `id_of`.
pub fn id_of(value: &Value) -> ValueId {
    value.clone()
}

/// The source's literal proposer schedule: `h mod n`, ignoring `round` entirely.
///
/// §9 open question: if the round-0 proposer for a height is Byzantine and simply never
/// proposes, every later round at that height has the *same* proposer, and the height can never
/// decide, since `(h, r)` and `(h, r+1)` map to the same replica. This type exists to let a caller
/// reproduce the source exactly; prefer [`RoundRobinByHeightAndRound`] for an actual deployment.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinByHeight {
    pub n: u64,
}

impl Proposer for RoundRobinByHeight {
    fn proposer(&self, height: u64, _round: u64) -> ReplicaId {
        height % self.n
    }
}

/// The corrected schedule `(h + round) mod n`: every round at a height gets a different
/// proposer, so a single faulty proposer cannot stall a height forever. This is the schedule
/// `ReplicaConfig`-driven replicas should use.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinByHeightAndRound {
    pub n: u64,
}

impl Proposer for RoundRobinByHeightAndRound {
    fn proposer(&self, height: u64, round: u64) -> ReplicaId {
        (height + round) % self.n
    }
}

/// A validity predicate that accepts everything, matching the source's toy `valid()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysValid;

impl Validator for AlwaysValid {
    fn valid(&self, _value: &Value) -> bool {
        true
    }
}

/// A value producer that always returns the same fixed value, matching the source's toy
/// `getValue()` (which always returns the literal string `"valid"`).
#[derive(Clone, Debug)]
pub struct FixedValue(pub Value);

#[async_trait]
impl ValueProducer for FixedValue {
    async fn get_value(&self) -> Value {
        self.0.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn height_only_schedule_sticks_on_one_proposer_per_height() {
        let p = RoundRobinByHeight { n: 4 };
        assert_eq!(p.proposer(5, 0), p.proposer(5, 1));
        assert_eq!(p.proposer(5, 0), 1);
    }

    #[test]
    fn height_and_round_schedule_rotates_within_a_height() {
        let p = RoundRobinByHeightAndRound { n: 4 };
        assert_ne!(p.proposer(5, 0), p.proposer(5, 1));
        assert_eq!(p.proposer(5, 0), 1);
        assert_eq!(p.proposer(5, 1), 2);
    }

    #[test]
    fn id_of_is_identity() {
        let v = Value::from_static(b"v");
        assert_eq!(id_of(&v), v);
    }

    #[tokio::test]
    async fn fixed_value_producer_returns_its_value() {
        let producer = FixedValue(Value::from_static(b"v"));
        assert_eq!(producer.get_value().await, Value::from_static(b"v"));
    }
}
