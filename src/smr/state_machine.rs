use derive_more::Display;
use hummer::coding::hex_encode;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::collaborators::{id_of, Proposer, ValueProducer, Validator};
use crate::config::{DurationConfig, ReplicaConfig};
use crate::error::{ConsensusError, ConsensusResult};
use crate::log::MessageLog;
use crate::smr::smr_types::{OneShotFlags, RoundValue};
use crate::timer::TimerService;
use crate::transport::Transport;
use crate::types::{Event, Precommit, Prevote, Proposal, Step, Value, INIT_HEIGHT, INIT_ROUND};

/// The per-replica consensus state machine (§4.1).
///
/// `P`, `V` and `G` are the proposer-selection, validity and value-producer collaborators (§6);
/// `T` is the transport. All four are injected at construction so the core never hard-codes a
/// network or a toy application.
#[derive(Display)]
#[display(fmt = "replica height {}, round {}, step {}", height, round, step)]
pub struct Replica<P, V, G, T> {
    config: ReplicaConfig,
    durations: DurationConfig,

    height: u64,
    round: u64,
    step: Step,

    /// The value this replica is locked on, and the round it locked in.
    locked: Option<RoundValue>,
    /// The value this replica last saw a prevote quorum for, and that round.
    valid: Option<RoundValue>,
    /// One committed value per height, in order. `decisions.len() == height`.
    decisions: Vec<Value>,

    flags: OneShotFlags,
    log: MessageLog,
    timer: TimerService,
    transport: T,

    proposer: P,
    validator: V,
    value_producer: G,
}

impl<P, V, G, T> Replica<P, V, G, T>
where
    P: Proposer,
    V: Validator,
    G: ValueProducer,
    T: Transport,
{
    /// Construct a new replica. `self_tx` is this replica's own inbound sender, used by the
    /// timer service to enqueue firings.
    pub fn new(
        config: ReplicaConfig,
        durations: DurationConfig,
        proposer: P,
        validator: V,
        value_producer: G,
        transport: T,
        self_tx: tokio::sync::mpsc::UnboundedSender<Event>,
    ) -> Self {
        let id = config.id;
        Replica {
            config,
            durations,
            height: INIT_HEIGHT,
            round: INIT_ROUND,
            step: Step::default(),
            locked: None,
            valid: None,
            decisions: Vec::new(),
            flags: OneShotFlags::default(),
            log: MessageLog::new(id),
            timer: TimerService::new(id, durations, self_tx),
            transport,
            proposer,
            validator,
            value_producer,
        }
    }

    /// The values this replica has decided, one per height, in order.
    pub fn decisions(&self) -> &[Value] {
        &self.decisions
    }

    /// This replica's current height.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// This replica's current round.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// This replica's current step.
    pub fn step(&self) -> Step {
        self.step
    }

    /// Read-only access to the vote log, for tests and observability tooling.
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Run the replica's event loop to completion: consume events from `rx` forever, or until
    /// the channel closes. This is `process_events()` (§4.1).
    pub async fn process_events(mut self, mut rx: UnboundedReceiver<Event>) -> ConsensusResult<()> {
        self.start_round(INIT_ROUND).await?;

        while let Some(event) = rx.recv().await {
            if let Err(e) = self.process_event(event).await {
                log::error!("replica {} - {}", self.config.id, e);
                if matches!(e, ConsensusError::QueueClosed(_)) {
                    return Ok(());
                }
                return Err(e);
            }
        }

        log::info!("replica {} - event queue closed, shutting down", self.config.id);
        Ok(())
    }

    /// Like [`Replica::process_events`], but also returns as soon as `shutdown` fires instead of
    /// waiting for the channel to drain, handing the replica back so a caller can inspect its
    /// final state. This is the best-effort `shutdown()` mentioned in §5: not part of the
    /// original rules, useful for a demo harness or test suite that wants to tear replicas down
    /// deterministically rather than waiting on a closed channel.
    pub async fn process_events_until(
        mut self,
        mut rx: UnboundedReceiver<Event>,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> ConsensusResult<Self> {
        self.start_round(INIT_ROUND).await?;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.process_event(event).await {
                            log::error!("replica {} - {}", self.config.id, e);
                            if matches!(e, ConsensusError::QueueClosed(_)) {
                                break;
                            }
                            return Err(e);
                        }
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    log::info!("replica {} - shutdown requested", self.config.id);
                    break;
                }
            }
        }

        Ok(self)
    }

    /// Consume a single event: update the log for messages, then re-evaluate the trigger rules.
    /// Timeout events go straight to their dedicated handler instead (§4.1).
    pub async fn process_event(&mut self, event: Event) -> ConsensusResult<()> {
        match event {
            Event::Proposal(m) => {
                self.ingest_proposal(m);
                self.evaluate_rules().await
            }
            Event::Prevote(m) => {
                self.ingest_prevote(m);
                self.evaluate_rules().await
            }
            Event::Precommit(m) => {
                self.ingest_precommit(m);
                self.evaluate_rules().await
            }
            Event::ProposalTimeout(t) => self.on_timeout_propose(t.height, t.round).await,
            Event::PrevoteTimeout(t) => self.on_timeout_prevote(t.height, t.round).await,
            Event::PrecommitTimeout(t) => self.on_timeout_precommit(t.height, t.round).await,
        }
    }

    /// §9 fix (a)+(c): drop proposals for a height we're not at, and drop proposals that didn't
    /// come from that round's designated proposer, before they ever reach the log.
    fn ingest_proposal(&mut self, m: Proposal) {
        if m.height != self.height {
            log::warn!(
                "replica {} - dropping proposal for height {}, we're at height {}",
                self.config.id,
                m.height,
                self.height
            );
            return;
        }

        let expected = self.proposer.proposer(m.height, m.round);
        if m.from != expected {
            log::warn!(
                "replica {} - dropping proposal for round {} from {}, expected proposer {}",
                self.config.id,
                m.round,
                m.from,
                expected
            );
            return;
        }

        self.log.add_proposal(m);
    }

    /// §9 fix (a): drop votes for a height we're not at; votes for other rounds of our current
    /// height are kept (R2 depends on it).
    fn ingest_prevote(&mut self, m: Prevote) {
        if m.height != self.height {
            log::warn!(
                "replica {} - dropping prevote for height {}, we're at height {}",
                self.config.id,
                m.height,
                self.height
            );
            return;
        }
        self.log.add_prevote(m);
    }

    fn ingest_precommit(&mut self, m: Precommit) {
        if m.height != self.height {
            log::warn!(
                "replica {} - dropping precommit for height {}, we're at height {}",
                self.config.id,
                m.height,
                self.height
            );
            return;
        }
        self.log.add_precommit(m);
    }

    /// `startRound(r)` (§4.1).
    async fn start_round(&mut self, round: u64) -> ConsensusResult<()> {
        self.timer.disarm_all();
        self.round = round;
        self.step = Step::Propose;
        self.flags.reset();

        log::debug!(
            "replica {} - starting round {} at height {}",
            self.config.id,
            self.round,
            self.height
        );

        if self.proposer.proposer(self.height, self.round) == self.config.id {
            let (value, valid_round) = match &self.valid {
                Some(rv) => (rv.value.clone(), Some(rv.round)),
                None => (self.value_producer.get_value().await, None),
            };

            let proposal = Proposal {
                height: self.height,
                round: self.round,
                value,
                valid_round,
                from: self.config.id,
            };

            log::info!(
                "replica {} - proposing {:?} for (h={}, round={})",
                self.config.id,
                hex_encode(proposal.value.clone()),
                self.height,
                self.round
            );

            self.transport.broadcast(proposal.into())
        } else {
            self.timer.arm_proposal(self.height, self.round);
            Ok(())
        }
    }

    /// Evaluate R1 through R7 in order; the first that fires returns immediately, matching
    /// "rules are evaluated each time process consumes a message" (§4.1).
    async fn evaluate_rules(&mut self) -> ConsensusResult<()> {
        if self.rule_fresh_proposal()? {
            return Ok(());
        }
        if self.rule_proposal_with_valid_round()? {
            return Ok(());
        }
        if self.rule_first_prevote_quorum() {
            return Ok(());
        }
        if self.rule_lock()? {
            return Ok(());
        }
        if self.rule_nil_prevote_quorum()? {
            return Ok(());
        }
        if self.rule_first_precommit_quorum() {
            return Ok(());
        }
        if self.rule_commit().await? {
            return Ok(());
        }

        // No rule fired: e.g. we'd need a catch-up via f+1 future-round messages here, which is
        // out of scope (§1).
        Ok(())
    }

    /// The proposal this replica expects for its current `(height, round)`, from the round's
    /// designated proposer, optionally filtered on `valid_round`.
    fn matching_proposal(&self, valid_round: Option<Option<u64>>) -> Option<&Proposal> {
        let expected_proposer = self.proposer.proposer(self.height, self.round);
        self.log.proposals().find(|m| {
            m.height == self.height
                && m.round == self.round
                && m.from == expected_proposer
                && valid_round.map_or(true, |vr| m.valid_round == vr)
        })
    }

    /// R1: fresh proposal (`validRound = None`) accepted while we're still proposing.
    fn rule_fresh_proposal(&mut self) -> ConsensusResult<bool> {
        if self.step != Step::Propose {
            return Ok(false);
        }

        let Some(m) = self.matching_proposal(Some(None)).cloned() else {
            return Ok(false);
        };

        log::debug!("replica {} - R1: fresh proposal accepted", self.config.id);

        let ok = self.validator.valid(&m.value)
            && self.locked.as_ref().map_or(true, |l| l.value == m.value);
        let id = ok.then(|| id_of(&m.value));

        self.transport.broadcast(
            Prevote {
                height: self.height,
                round: self.round,
                id,
                from: self.config.id,
            }
            .into(),
        )?;

        self.timer.disarm_proposal();
        self.step = Step::Prevote;
        Ok(true)
    }

    /// R2: a proposal carrying a prior valid round, backed by a prevote quorum from that round.
    fn rule_proposal_with_valid_round(&mut self) -> ConsensusResult<bool> {
        if self.step != Step::Propose {
            return Ok(false);
        }

        let quorum = self.config.quorum();
        let expected_proposer = self.proposer.proposer(self.height, self.round);
        let candidate = self.log.proposals().find(|m| {
            m.height == self.height
                && m.round == self.round
                && m.from == expected_proposer
                && m.valid_round.is_some()
        });
        let Some(m) = candidate.cloned() else {
            return Ok(false);
        };
        let vr = m.valid_round.expect("filtered to Some above");
        let id = id_of(&m.value);

        if self.log.num_prevotes_for(vr, &Some(id.clone())) < quorum {
            return Ok(false);
        }

        log::debug!(
            "replica {} - R2: proposal with prior valid round {} accepted",
            self.config.id,
            vr
        );

        // The lock-compatibility check is intentionally re-derived here, matching the source's
        // own redundant recheck inside the branch that actually casts the vote.
        let vote_ok = self.validator.valid(&m.value)
            && (self.locked.as_ref().map_or(true, |l| l.round <= vr)
                || self.locked.as_ref().map_or(false, |l| l.value == m.value));
        let vote_id = vote_ok.then_some(id);

        self.transport.broadcast(
            Prevote {
                height: self.height,
                round: self.round,
                id: vote_id,
                from: self.config.id,
            }
            .into(),
        )?;

        self.timer.disarm_proposal();
        self.step = Step::Prevote;
        Ok(true)
    }

    /// R3: the first time 2f+1 prevotes (any mixture of values) are seen this round.
    fn rule_first_prevote_quorum(&mut self) -> bool {
        if self.step != Step::Prevote || self.flags.first_prevote {
            return false;
        }
        if self.log.num_prevotes(self.round) < self.config.quorum() {
            return false;
        }

        log::debug!("replica {} - R3: first prevote quorum this round", self.config.id);
        self.flags.first_prevote = true;
        self.timer.arm_prevote(self.height, self.round);
        true
    }

    /// R4: lock. Fires at most once per round, from either the prevote or precommit step.
    fn rule_lock(&mut self) -> ConsensusResult<bool> {
        if !matches!(self.step, Step::Prevote | Step::Precommit) || self.flags.locked {
            return Ok(false);
        }

        let quorum = self.config.quorum();
        let expected_proposer = self.proposer.proposer(self.height, self.round);
        let candidate = self
            .log
            .proposals()
            .find(|m| {
                m.height == self.height
                    && m.round == self.round
                    && m.from == expected_proposer
                    && self.validator.valid(&m.value)
            })
            .cloned();
        let Some(m) = candidate else {
            return Ok(false);
        };

        if self.log.num_prevotes_for(self.round, &Some(id_of(&m.value))) < quorum {
            return Ok(false);
        }

        log::info!(
            "replica {} - R4: locking value {:?} in round {}",
            self.config.id,
            hex_encode(m.value.clone()),
            self.round
        );
        self.flags.locked = true;

        if self.step == Step::Prevote {
            self.locked = Some(RoundValue::new(m.value.clone(), self.round));
            self.transport.broadcast(
                Precommit {
                    height: self.height,
                    round: self.round,
                    id: Some(id_of(&m.value)),
                    from: self.config.id,
                }
                .into(),
            )?;
            self.timer.disarm_prevote();
            self.step = Step::Precommit;
        }

        // Regardless of step: the value that just gathered a prevote quorum becomes validValue.
        // (§9 fix (b): this correctly sets validRound/validValue, not lockedRound.)
        self.valid = Some(RoundValue::new(m.value, self.round));
        Ok(true)
    }

    /// R5: 2f+1 nil prevotes, meaning this round has failed; move to precommit with nil.
    fn rule_nil_prevote_quorum(&mut self) -> ConsensusResult<bool> {
        if self.step != Step::Prevote {
            return Ok(false);
        }
        if self.log.num_prevotes_for(self.round, &None) < self.config.quorum() {
            return Ok(false);
        }

        log::debug!("replica {} - R5: nil prevote quorum", self.config.id);
        self.transport.broadcast(
            Precommit {
                height: self.height,
                round: self.round,
                id: None,
                from: self.config.id,
            }
            .into(),
        )?;
        self.timer.disarm_prevote();
        self.step = Step::Precommit;
        Ok(true)
    }

    /// R6: the first time 2f+1 precommits (any mixture) are seen this round.
    fn rule_first_precommit_quorum(&mut self) -> bool {
        if self.flags.first_precommit {
            return false;
        }
        if self.log.num_precommits(self.round) < self.config.quorum() {
            return false;
        }

        log::debug!("replica {} - R6: first precommit quorum this round", self.config.id);
        self.flags.first_precommit = true;
        self.timer.arm_precommit(self.height, self.round);
        true
    }

    /// R7: commit, if we're locked on a value with a matching proposal and precommit quorum, and
    /// haven't already decided this height.
    async fn rule_commit(&mut self) -> ConsensusResult<bool> {
        let Some(locked) = self.locked.clone() else {
            return Ok(false);
        };

        let expected_proposer = self.proposer.proposer(self.height, self.round);
        let matches = self.log.proposal(&locked.value).map_or(false, |m| {
            m.height == self.height && m.round == self.round && m.from == expected_proposer
        });
        if !matches {
            return Ok(false);
        }

        if self.log.num_precommits_for(self.round, &Some(id_of(&locked.value))) < self.config.quorum() {
            return Ok(false);
        }

        // `decisions.len() == height` means this height hasn't decided yet.
        if self.decisions.len() as u64 != self.height {
            return Ok(false);
        }

        log::debug!("replica {} - R7: commit conditions met", self.config.id);
        self.commit(locked.value).await?;
        Ok(true)
    }

    /// `onTimeoutPropose`.
    async fn on_timeout_propose(&mut self, height: u64, round: u64) -> ConsensusResult<()> {
        if height != self.height || round != self.round || self.step != Step::Propose {
            return Ok(());
        }

        log::info!("replica {} - proposal timeout at (h={}, round={})", self.config.id, height, round);
        self.transport.broadcast(
            Prevote {
                height: self.height,
                round: self.round,
                id: None,
                from: self.config.id,
            }
            .into(),
        )?;
        self.timer.disarm_proposal();
        self.step = Step::Prevote;
        Ok(())
    }

    /// `onTimeoutPrevote`.
    async fn on_timeout_prevote(&mut self, height: u64, round: u64) -> ConsensusResult<()> {
        if height != self.height || round != self.round || self.step != Step::Prevote {
            return Ok(());
        }

        log::info!("replica {} - prevote timeout at (h={}, round={})", self.config.id, height, round);
        self.transport.broadcast(
            Precommit {
                height: self.height,
                round: self.round,
                id: None,
                from: self.config.id,
            }
            .into(),
        )?;
        self.timer.disarm_prevote();
        self.step = Step::Precommit;
        Ok(())
    }

    /// `onTimeoutPrecommit`.
    async fn on_timeout_precommit(&mut self, height: u64, round: u64) -> ConsensusResult<()> {
        if height != self.height || round != self.round {
            return Ok(());
        }

        log::info!("replica {} - precommit timeout at (h={}, round={})", self.config.id, height, round);
        self.start_round(self.round + 1).await
    }

    /// `commit(value)` (§4.1).
    async fn commit(&mut self, value: Value) -> ConsensusResult<()> {
        self.timer.disarm_all();

        log::info!(
            "replica {} - COMMITTING {:?} at height {}",
            self.config.id,
            hex_encode(value.clone()),
            self.height
        );
        self.decisions.push(value);
        if self.decisions.len() as u64 - 1 != self.height {
            return Err(ConsensusError::SelfCheckErr(format!(
                "decisions length {} inconsistent with height {}",
                self.decisions.len(),
                self.height
            )));
        }

        self.height += 1;
        self.round = INIT_ROUND;
        self.locked = None;
        self.valid = None;
        self.flags.reset();
        self.log = MessageLog::new(self.config.id);

        self.start_round(INIT_ROUND).await
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use tokio::sync::mpsc;

    use super::*;
    use crate::collaborators::{AlwaysValid, FixedValue, RoundRobinByHeightAndRound};
    use crate::transport::ChannelTransport;

    fn lone_replica(
        id: u64,
        n: u64,
        f: u64,
    ) -> Replica<RoundRobinByHeightAndRound, AlwaysValid, FixedValue, ChannelTransport> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut peers = HashMap::new();
        peers.insert(id, tx.clone());
        let transport = ChannelTransport::new(id, peers);

        Replica::new(
            ReplicaConfig::new(id, n, f).unwrap(),
            DurationConfig::new(6, 6, 6, 1),
            RoundRobinByHeightAndRound { n },
            AlwaysValid,
            FixedValue(Value::from_static(b"v")),
            transport,
            tx,
        )
    }

    #[tokio::test]
    async fn fresh_proposal_moves_to_prevote() {
        let mut replica = lone_replica(1, 4, 1);
        assert_eq!(replica.step(), Step::Propose);

        let proposer = replica.proposer.proposer(0, 0);
        replica.ingest_proposal(Proposal {
            height: 0,
            round: 0,
            value: Value::from_static(b"v"),
            valid_round: None,
            from: proposer,
        });
        replica.evaluate_rules().await.unwrap();
        assert_eq!(replica.step(), Step::Prevote);
    }

    #[tokio::test]
    async fn proposal_from_non_proposer_is_dropped() {
        let mut replica = lone_replica(1, 4, 1);
        let wrong_sender = (replica.proposer.proposer(0, 0) + 1) % 4;

        replica.ingest_proposal(Proposal {
            height: 0,
            round: 0,
            value: Value::from_static(b"v"),
            valid_round: None,
            from: wrong_sender,
        });
        assert!(replica.log.proposals().next().is_none());
    }

    #[tokio::test]
    async fn prevote_quorum_locks_and_advances_to_precommit() {
        let mut replica = lone_replica(1, 4, 1);
        let proposer = replica.proposer.proposer(0, 0);
        let value = Value::from_static(b"v");

        replica.ingest_proposal(Proposal {
            height: 0,
            round: 0,
            value: value.clone(),
            valid_round: None,
            from: proposer,
        });

        for sender in 0..3 {
            replica.ingest_prevote(Prevote {
                height: 0,
                round: 0,
                id: Some(value.clone()),
                from: sender,
            });
        }

        replica.evaluate_rules().await.unwrap();
        assert_eq!(replica.step(), Step::Precommit);
        assert!(replica.locked.is_some());
        assert_eq!(replica.locked.as_ref().unwrap().value, value);
    }

    #[tokio::test]
    async fn precommit_quorum_commits_and_starts_next_height() {
        let mut replica = lone_replica(1, 4, 1);
        let proposer = replica.proposer.proposer(0, 0);
        let value = Value::from_static(b"v");

        replica.ingest_proposal(Proposal {
            height: 0,
            round: 0,
            value: value.clone(),
            valid_round: None,
            from: proposer,
        });
        for sender in 0..3 {
            replica.ingest_prevote(Prevote {
                height: 0,
                round: 0,
                id: Some(value.clone()),
                from: sender,
            });
        }
        replica.evaluate_rules().await.unwrap();
        assert_eq!(replica.step(), Step::Precommit);

        for sender in 0..3 {
            replica.ingest_precommit(Precommit {
                height: 0,
                round: 0,
                id: Some(value.clone()),
                from: sender,
            });
        }
        replica.evaluate_rules().await.unwrap();

        assert_eq!(replica.decisions(), &[value]);
        assert_eq!(replica.height(), 1);
        assert_eq!(replica.round(), 0);
        assert_eq!(replica.step(), Step::Propose);
    }

    #[tokio::test]
    async fn nil_prevote_quorum_moves_to_precommit_with_nil() {
        let mut replica = lone_replica(1, 4, 1);

        for sender in 0..3 {
            replica.ingest_prevote(Prevote {
                height: 0,
                round: 0,
                id: None,
                from: sender,
            });
        }
        replica.evaluate_rules().await.unwrap();
        assert_eq!(replica.step(), Step::Precommit);
        assert!(replica.locked.is_none());
    }

    #[tokio::test]
    async fn stale_timeout_is_ignored() {
        let mut replica = lone_replica(1, 4, 1);
        replica.on_timeout_propose(5, 0).await.unwrap();
        assert_eq!(replica.step(), Step::Propose);
        assert_eq!(replica.height(), 0);
    }
}
