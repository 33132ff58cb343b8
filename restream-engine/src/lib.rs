//! Restream engine: relays one live audio source to many listeners.
//!
//! Data flow:
//! ```text
//! setSource(url) ─► Resolver ─► Transcoder (ffmpeg, listen socket)
//!                                      │
//!                                      ▼
//!                               RelayLoop (single reader per generation)
//!                                      │
//!                      ┌───────────────┼───────────────┐
//!                      ▼               ▼               ▼
//!                 ListenerSink    ListenerSink    ListenerSink
//! ```
//!
//! Each (resolve → transcoder → relay) lifecycle is a *generation*. The
//! [`controller::Restreamer`] is the only component that mints generations,
//! swaps them in and tears them down.

pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod state;
pub mod transcoder;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use controller::{EngineStatus, Restreamer};
pub use error::{EngineError, SinkError};
pub use registry::{ChunkSink, ConsumerRegistry, SinkId};
pub use sink::{ListenerSink, ListenerStream};
pub use source::{Source, SourceKind};
pub use state::{Generation, PipelineState};
