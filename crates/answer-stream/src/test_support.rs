//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;

use crate::errors::TransportError;
use crate::model::{AnswerRequest, Source};
use crate::sink::RenderSink;
use crate::transport::{AnswerTransport, ChunkStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Answer(String),
    Sources(Vec<Source>),
    Auxiliary(String),
    Error { message: String, quota: bool },
    Cancelled,
    Completed,
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    fn push(&self, call: SinkCall) {
        self.calls.lock().push(call);
    }
}

impl RenderSink for RecordingSink {
    fn on_answer_update(&self, full_text: &str) {
        self.push(SinkCall::Answer(full_text.to_string()));
    }

    fn on_sources_update(&self, sources: &[Source]) {
        self.push(SinkCall::Sources(sources.to_vec()));
    }

    fn on_auxiliary_update(&self, html: &str) {
        self.push(SinkCall::Auxiliary(html.to_string()));
    }

    fn on_error(&self, message: &str, is_quota_error: bool) {
        self.push(SinkCall::Error {
            message: message.to_string(),
            quota: is_quota_error,
        });
    }

    fn on_cancelled(&self) {
        self.push(SinkCall::Cancelled);
    }

    fn on_completed(&self) {
        self.push(SinkCall::Completed);
    }
}

/// What one `open` call on `ScriptedTransport` does.
#[derive(Clone)]
pub(crate) enum Script {
    /// Yields the chunks, then ends the stream.
    Chunks(Vec<Result<Bytes, TransportError>>),
    /// `open` never resolves.
    OpenPending,
    /// Opens a stream that never yields.
    Pending,
    /// `open` fails.
    OpenError(TransportError),
    /// Chunks are pushed by the test through a channel.
    Channel(Arc<Mutex<Option<futures::channel::mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>>>),
}

/// Transport whose successive `open` calls follow a script.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<AnswerRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<AnswerRequest> {
        self.requests.lock().clone()
    }
}

/// Script that yields each text chunk and then closes.
pub(crate) fn text_chunks(parts: &[&str]) -> Script {
    Script::Chunks(
        parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect(),
    )
}

/// Returns a script fed by the returned sender.
pub(crate) fn channel_script() -> (
    futures::channel::mpsc::UnboundedSender<Result<Bytes, TransportError>>,
    Script,
) {
    let (tx, rx) = futures::channel::mpsc::unbounded();
    (tx, Script::Channel(Arc::new(Mutex::new(Some(rx)))))
}

#[async_trait::async_trait]
impl AnswerTransport for ScriptedTransport {
    async fn open(&self, request: &AnswerRequest) -> Result<ChunkStream, TransportError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Pending);
        match script {
            Script::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
            Script::Pending => Ok(Box::pin(stream::pending())),
            Script::OpenPending => futures::future::pending().await,
            Script::OpenError(err) => Err(err),
            Script::Channel(rx) => {
                let rx = rx.lock().take().expect("channel script opened once");
                Ok(Box::pin(rx))
            }
        }
    }
}
