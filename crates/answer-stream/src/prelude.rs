//! Common imports for wiring a coordinator to a transport and sinks.
pub use crate::{
    ActionCoordinator, AnswerTransport, ChannelId, CoordinatorError, HttpTransport,
    HttpTransportConfig, NullSink, RenderSink, SessionHandle, SessionOutcome, SinkFactory, SlotId,
    SlotSession, Source, TransportError,
};
