use thiserror::Error;

/// Errors surfaced to the caller of a source-change request.
///
/// Mid-stream failures never show up here; they are reported to the
/// controller as [`crate::relay::RestartReason`] and healed by a restart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unsupported source {url:?}: {reason}")]
    UnsupportedSource { url: String, reason: String },

    #[error("resolution failed (exit code {exit_code:?}): {diagnostic}")]
    ResolutionFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("resolver returned no playable url")]
    ResolutionEmpty,

    #[error("transcoder start failed: {cause}")]
    StartFailed { cause: String },

    /// A newer source-change request took over before this one finished.
    #[error("superseded by a newer source change")]
    Superseded,

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Failures of the resolve stage (no generation was launched).
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedSource { .. }
                | EngineError::ResolutionFailed { .. }
                | EngineError::ResolutionEmpty
        )
    }
}

/// Write failure of a single listener sink. Never propagated past the sink.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The listener is not draining fast enough; the chunk was dropped.
    #[error("sink is full")]
    Backpressure,
    /// The listener is gone.
    #[error("sink is closed")]
    Closed,
}

impl SinkError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SinkError::Closed)
    }
}
