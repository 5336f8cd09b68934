//! The timer service (§4.3).
//!
//! Each of the three timer kinds (propose / prevote / precommit) has a single armed flag, shared
//! between the replica actor (which arms and disarms it) and a spawned `tokio` task (which reads
//! it right before firing). The read is racy by design (§5): a firing that is already in flight
//! when `disarm` runs still lands on the replica's queue, but the handlers' `(height, round,
//! step)` guards turn that into a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::DurationConfig;
use crate::types::{Event, PrecommitTimeout, PrevoteTimeout, ProposalTimeout, ReplicaId};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TimerKind {
    Propose,
    Prevote,
    Precommit,
}

/// Arms and disarms the three per-round timeouts, enqueuing a firing onto the replica's own
/// event queue (via `self_tx`) for as long as the corresponding flag stays armed, matching the
/// source's `while self.xTimer: sleep(...); put_event(...)` loop.
pub struct TimerService {
    id: ReplicaId,
    durations: DurationConfig,
    armed: Arc<Mutex<HashMap<TimerKind, bool>>>,
    self_tx: UnboundedSender<Event>,
}

impl TimerService {
    /// Create a timer service that enqueues firings onto `self_tx`.
    pub fn new(id: ReplicaId, durations: DurationConfig, self_tx: UnboundedSender<Event>) -> Self {
        TimerService {
            id,
            durations,
            armed: Arc::new(Mutex::new(HashMap::new())),
            self_tx,
        }
    }

    /// Arm the proposal timer for `(height, round)`.
    pub fn arm_proposal(&self, height: u64, round: u64) {
        let delay = self.durations.timeout_propose(round);
        self.arm(TimerKind::Propose, height, round, delay, |height, round| {
            ProposalTimeout { height, round }.into()
        });
    }

    /// Arm the prevote timer for `(height, round)`.
    pub fn arm_prevote(&self, height: u64, round: u64) {
        let delay = self.durations.timeout_prevote(round);
        self.arm(TimerKind::Prevote, height, round, delay, |height, round| {
            PrevoteTimeout { height, round }.into()
        });
    }

    /// Arm the precommit timer for `(height, round)`.
    pub fn arm_precommit(&self, height: u64, round: u64) {
        let delay = self.durations.timeout_precommit(round);
        self.arm(TimerKind::Precommit, height, round, delay, |height, round| {
            PrecommitTimeout { height, round }.into()
        });
    }

    /// Disarm the proposal timer.
    pub fn disarm_proposal(&self) {
        self.disarm(TimerKind::Propose);
    }

    /// Disarm the prevote timer.
    pub fn disarm_prevote(&self) {
        self.disarm(TimerKind::Prevote);
    }

    /// Disarm the precommit timer.
    pub fn disarm_precommit(&self) {
        self.disarm(TimerKind::Precommit);
    }

    /// Disarm all three timers, as `startRound` and `commit` do.
    pub fn disarm_all(&self) {
        self.disarm_proposal();
        self.disarm_prevote();
        self.disarm_precommit();
    }

    fn arm(
        &self,
        kind: TimerKind,
        height: u64,
        round: u64,
        delay: Duration,
        to_event: fn(u64, u64) -> Event,
    ) {
        self.armed.lock().insert(kind, true);

        let armed = self.armed.clone();
        let tx = self.self_tx.clone();
        let id = self.id;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;

                if !*armed.lock().get(&kind).unwrap_or(&false) {
                    log::debug!(
                        "replica {} - timer: {:?} timer for (h={}, round={}) disarmed, not firing",
                        id,
                        kind,
                        height,
                        round
                    );
                    break;
                }

                log::debug!(
                    "replica {} - timer: firing {:?} timeout for (h={}, round={})",
                    id,
                    kind,
                    height,
                    round
                );

                if tx.send(to_event(height, round)).is_err() {
                    break;
                }
            }
        });
    }

    fn disarm(&self, kind: TimerKind) {
        self.armed.lock().insert(kind, false);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_after_its_delay() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let durations = DurationConfig::new(1, 1, 1, 1);
        let timer = TimerService::new(0, durations, tx);

        timer.arm_proposal(0, 0);
        tokio::time::advance(Duration::from_secs(2)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::ProposalTimeout(ProposalTimeout { height: 0, round: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let durations = DurationConfig::new(1, 1, 1, 1);
        let timer = TimerService::new(0, durations, tx);

        timer.arm_proposal(0, 0);
        timer.disarm_proposal();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
    }
}
