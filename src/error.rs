use thiserror::Error;

/// Crate-wide error taxonomy (spec §7). Variant names are semantic, not
/// mirrors of any particular errno space.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("no space: {0}")]
    NoSpace(String),

    /// The ring has no room for another record; caller must swap.
    #[error("queue full")]
    QueueFull,

    /// Async enqueue refused because the channel was full.
    #[error("would block")]
    WouldBlock,

    #[error("not found")]
    NotFound,

    #[error("capability not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("transport failed: {0}")]
    TransportFail(String),

    #[error("filesystem error: {0}")]
    FsFail(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of [`crate::serializer::Serializer::put`] — `must-swap`/
/// `queue-full` are recoverable control flow, not failures, so acceptance
/// is carried as an `Ok` variant rather than folded into [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was committed into the ring and counted in `fit_cnt`.
    Accepted,
    /// The record was accepted into the ring but will only encode into the
    /// *next* buffer; the caller must swap before more records will fit.
    AcceptedMustSwap,
}

/// Outcome of [`crate::serializer::Serializer::swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Everything that was pending has been flushed into the outgoing buffer.
    Done,
    /// The new buffer still can't hold everything already queued; caller
    /// should swap again once the outgoing buffer has been drained.
    MustSwapAgain,
}
