//! Incremental consumer for streamed answers.
//!
//! A `StreamSession` opens one answer stream through an `AnswerTransport`,
//! splits the body into frames with `FrameDecoder`, turns frames into
//! `Event`s with `interpret`, and reports every update to a `RenderSink`
//! before resolving to exactly one `SessionOutcome`. The `ActionCoordinator`
//! owns the conversation slots and makes sure a regenerated answer is never
//! overwritten by the session it superseded.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use answer_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::from_env()?);
//! let coordinator = ActionCoordinator::builder()
//!     .transport(transport)
//!     .channel("my-channel")
//!     .sink_factory(|_slot: SlotId| Arc::new(NullSink) as Arc<dyn RenderSink>)
//!     .build()?;
//!
//! let session = coordinator.submit("What changed in the last video?")?;
//! if let SessionOutcome::Completed { accumulated_text, .. } = session.outcome().await {
//!     println!("{accumulated_text}");
//! }
//! # Ok(())
//! # }
//! ```

/// Slot ownership, supersession, and the per-slot generation guard.
pub mod coordinator;
/// Splits the raw byte stream into `\n\n`-delimited frames.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Maps frames to semantic stream events.
pub mod interpreter;
/// Shared identifiers and request/transcript types.
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Channel refresh with task polling.
pub mod refresh;
/// One request's stream lifecycle and cancellation handle.
pub mod session;
/// Share-link generation.
pub mod share;
/// Render sink contract.
pub mod sink;
/// Transport seam and the HTTP implementation.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{ActionCoordinator, ActionCoordinatorBuilder, SlotSession};
pub use decoder::{Frame, FrameDecoder};
pub use errors::{
    CoordinatorError, ParseError, RefreshError, SessionFailure, ShareError, TransportError,
};
pub use interpreter::{Event, interpret};
pub use model::{AnswerRequest, ChannelId, Exchange, SlotId, Source, SubmitKind};
pub use observability::init_observability;
pub use refresh::{
    RefreshBackend, RefreshCoordinator, RefreshOptions, RefreshOutcome, TaskState, TaskStatus,
};
pub use session::{
    AbortHandle, SessionHandle, SessionOutcome, SessionState, StreamEnding, StreamSession,
};
pub use share::{ShareLinks, ShareStore};
pub use sink::{NullSink, RenderSink, SinkFactory};
pub use transport::{AnswerTransport, ChunkStream, HttpTransport, HttpTransportConfig};
