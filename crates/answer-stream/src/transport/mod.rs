//! Transport seam for opening answer streams, plus the HTTP implementation.
//!
//! A session only sees `AnswerTransport`; dropping the returned `ChunkStream`
//! must release the underlying connection, which is how cancellation aborts
//! an in-flight request.
mod config;
mod http;

pub use config::HttpTransportConfig;
pub use http::HttpTransport;

use std::pin::Pin;

use bytes::Bytes;

use crate::errors::TransportError;
use crate::model::AnswerRequest;

/// Raw chunks of the response body, with no alignment to frame boundaries.
pub type ChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Opens the streamed response for one question.
#[async_trait::async_trait]
pub trait AnswerTransport: Send + Sync {
    /// Sends the request and returns the body stream once a success status
    /// has been received.
    async fn open(&self, request: &AnswerRequest) -> Result<ChunkStream, TransportError>;
}
