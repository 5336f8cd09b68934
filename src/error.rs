use derive_more::Display;

/// Errors that can occur while a replica runs its consensus loop.
///
/// Recoverable protocol anomalies (invalid proposals, stale timeouts, duplicate votes) are never
/// represented here; the state machine absorbs those locally by casting nil votes or ignoring
/// the event. `ConsensusError` only covers failures of the surrounding machinery: channels,
/// configuration, and self-check assertions.
#[derive(Debug, Display)]
pub enum ConsensusError {
    /// Broadcasting or self-enqueuing a message failed because the transport's channel is closed.
    #[display(fmt = "transport error: {}", _0)]
    TransportErr(String),

    /// A proposal value was structurally invalid (empty hash standing in for a value, etc).
    #[display(fmt = "proposal error: {}", _0)]
    ProposalErr(String),

    /// A self-check invariant did not hold; this indicates a bug in the state machine, not a
    /// Byzantine peer.
    #[display(fmt = "self check error: {}", _0)]
    SelfCheckErr(String),

    /// The supplied `ReplicaConfig` violates `n > 3f` or places `id` outside `[0, n)`.
    #[display(fmt = "config error: {}", _0)]
    ConfigErr(String),

    /// The replica's own event queue was dropped from under it.
    #[display(fmt = "event queue closed: {}", _0)]
    QueueClosed(String),

    /// Catch-all for anomalies that don't fit another variant.
    #[display(fmt = "consensus error: {}", _0)]
    Other(String),
}

impl std::error::Error for ConsensusError {}

/// Convenience alias used throughout the crate.
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
