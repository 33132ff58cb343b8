//! Pipeline state machine.
//!
//! ```text
//! Idle ──setSource──▶ Resolving ──ok──▶ Launching ──ok──▶ Streaming
//!                         │                 │                 │
//!                         └──err──▶ Failed ◀┘      read error / stall /
//!                                     │            new setSource
//!                                     │                 ▼
//!                                     └──setSource──▶ Restarting ──▶ Resolving
//! any state ──stop──▶ Idle
//! ```
//!
//! The table in [`PipelineState::can_transition_to`] is advisory: the
//! controller logs a warning for a transition outside it but still applies
//! it. An explicit source change swaps make-before-break, so it runs
//! `Resolving → Launching → Restarting → Streaming` while the old
//! generation keeps streaming.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Identifier of one resolve → transcode → relay lifecycle.
///
/// Strictly increasing; only the controller mints new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Generation(pub u64);

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    #[default]
    Idle,
    Resolving,
    Launching,
    Streaming,
    Stalled,
    Restarting,
    Failed,
}

impl PipelineState {
    /// Whether the controller is allowed to move from `self` to `next`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;

        match (self, next) {
            // explicit shutdown
            (_, Idle) => true,
            // last-writer-wins: a new request may abandon any in-flight one
            (_, Resolving) => true,
            (Resolving, Launching | Failed) => true,
            (Launching, Streaming | Failed | Restarting) => true,
            (Streaming, Stalled | Restarting) => true,
            (Stalled, Restarting) => true,
            // a superseding request or the failed generation is still live
            (Failed, Stalled | Restarting) => true,
            (Restarting, Resolving | Streaming | Failed) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Resolving => "resolving",
            PipelineState::Launching => "launching",
            PipelineState::Streaming => "streaming",
            PipelineState::Stalled => "stalled",
            PipelineState::Restarting => "restarting",
            PipelineState::Failed => "failed",
        }
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
