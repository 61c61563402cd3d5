//! One request's lifecycle: open, stream, resolve exactly once.

use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decoder::FrameDecoder;
use crate::errors::{
    GENERIC_GENERATION_ERROR, GENERIC_REGENERATE_ERROR, GENERIC_SUBMIT_ERROR, SessionFailure,
};
use crate::interpreter::{Event, interpret};
use crate::model::{AnswerRequest, Source, SubmitKind};
use crate::sink::RenderSink;
use crate::transport::AnswerTransport;

/// Lifecycle states of a `StreamSession`. No state is ever revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Completing,
    Failing,
    Cancelling,
    Closed,
}

/// How a completed stream ended.
///
/// All three are reported to the sink as a normal completion; the protocol
/// has no signal that separates a finished producer from a dropped
/// connection, so the distinction is only informational.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StreamEnding {
    /// The producer sent `[DONE]`.
    DoneMarker,
    /// The transport closed cleanly without `[DONE]`.
    TransportClosed,
    /// Reading failed after the stream had opened.
    TransportDropped,
}

/// The single result of a session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionOutcome {
    Completed {
        accumulated_text: String,
        sources: Vec<Source>,
        ending: StreamEnding,
    },
    Failed {
        reason: SessionFailure,
    },
    Cancelled,
}

/// Handle used to request cancellation of a running session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Takes effect at the session's next suspension point (open or read).
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// A not-yet-started session for one request.
pub struct StreamSession {
    session_id: uuid::Uuid,
    request: AnswerRequest,
    transport: Arc<dyn AnswerTransport>,
    sink: Arc<dyn RenderSink>,
}

impl StreamSession {
    pub fn new(
        request: AnswerRequest,
        transport: Arc<dyn AnswerTransport>,
        sink: Arc<dyn RenderSink>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            request,
            transport,
            sink,
        }
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Moves the session to `Opening` and drives it on the current tokio
    /// runtime.
    pub fn start(self) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (abort_tx, abort_rx) = watch::channel(false);
        state_tx.send_replace(SessionState::Opening);

        info!(
            session_id = %self.session_id,
            channel = %self.request.channel,
            regenerating = self.request.is_regenerating(),
            "stream session started"
        );
        let run = SessionRun {
            session_id: self.session_id,
            request: self.request,
            sink: self.sink,
            state_tx,
            answer: String::new(),
            sources: Vec::new(),
        };
        tokio::spawn(run.run(self.transport, abort_rx, outcome_tx));

        SessionHandle {
            session_id: self.session_id,
            abort: AbortHandle {
                tx: Arc::new(abort_tx),
            },
            state_rx,
            outcome_rx,
        }
    }
}

/// Observes and controls a started session. Clones share the same session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: uuid::Uuid,
    abort: AbortHandle,
    state_rx: watch::Receiver<SessionState>,
    outcome_rx: watch::Receiver<Option<SessionOutcome>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Returns a handle that can cancel the session.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Requests cancellation. No-op once the session is closed.
    pub fn cancel(&self) {
        if !self.is_closed() {
            self.abort.abort();
        }
    }

    /// Waits for the session's outcome. Every clone observes the same value.
    pub async fn outcome(&self) -> SessionOutcome {
        let mut rx = self.outcome_rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            warn!(session_id = %self.session_id, "session task ended without an outcome");
            SessionOutcome::Cancelled
        })
    }
}

struct SessionRun {
    session_id: uuid::Uuid,
    request: AnswerRequest,
    sink: Arc<dyn RenderSink>,
    state_tx: watch::Sender<SessionState>,
    answer: String,
    sources: Vec<Source>,
}

impl SessionRun {
    async fn run(
        mut self,
        transport: Arc<dyn AnswerTransport>,
        mut abort_rx: watch::Receiver<bool>,
        outcome_tx: watch::Sender<Option<SessionOutcome>>,
    ) {
        let outcome = self.drive(transport.as_ref(), &mut abort_rx).await;
        self.transition(SessionState::Closed);
        info!(session_id = %self.session_id, outcome = outcome_label(&outcome), "stream session closed");
        outcome_tx.send_replace(Some(outcome));
    }

    async fn drive(
        &mut self,
        transport: &dyn AnswerTransport,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> SessionOutcome {
        let opened = tokio::select! {
            biased;
            _ = abort_requested(abort_rx) => return self.cancel(),
            opened = transport.open(&self.request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "answer stream failed to open");
                let fallback = match self.request.kind {
                    SubmitKind::New => GENERIC_SUBMIT_ERROR,
                    SubmitKind::Regenerate => GENERIC_REGENERATE_ERROR,
                };
                return self.fail(SessionFailure::from_open_error(&err, fallback));
            }
        };
        self.transition(SessionState::Streaming);

        let mut decoder = FrameDecoder::new();
        let mut frames_seen = 0_u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = abort_requested(abort_rx) => None,
                next = stream.next() => Some(next),
            };
            let Some(next) = next else {
                drop(stream);
                decoder.finish();
                return self.cancel();
            };
            match next {
                Some(Ok(chunk)) => {
                    for frame in decoder.push_chunk(&chunk) {
                        if *abort_rx.borrow() {
                            drop(stream);
                            decoder.finish();
                            return self.cancel();
                        }
                        frames_seen += 1;
                        let events = match interpret(&frame) {
                            Ok(events) => events,
                            Err(err) => {
                                warn!(session_id = %self.session_id, frame = frames_seen, error = %err, "malformed stream frame");
                                return self.fail(SessionFailure::Parse {
                                    message: GENERIC_GENERATION_ERROR.to_string(),
                                });
                            }
                        };
                        for event in events {
                            if let Some(outcome) = self.apply(event) {
                                return outcome;
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    let discarded = decoder.finish();
                    warn!(session_id = %self.session_id, error = %err, discarded, "answer stream dropped; treating as completion");
                    return self.complete(StreamEnding::TransportDropped);
                }
                None => {
                    let discarded = decoder.finish();
                    if discarded > 0 {
                        debug!(session_id = %self.session_id, discarded, "discarding incomplete trailing frame");
                    }
                    return self.complete(StreamEnding::TransportClosed);
                }
            }
        }
    }

    /// Applies one event; returns the outcome when the event is terminal.
    fn apply(&mut self, event: Event) -> Option<SessionOutcome> {
        match event {
            Event::AnswerDelta { text } => {
                self.answer.push_str(&text);
                debug!(session_id = %self.session_id, delta_len = text.len(), total_len = self.answer.len(), "answer delta");
                self.sink.on_answer_update(&self.answer);
                None
            }
            Event::SourcesUpdate { sources } => {
                debug!(session_id = %self.session_id, count = sources.len(), "sources update");
                self.sources = sources;
                self.sink.on_sources_update(&self.sources);
                None
            }
            Event::QueryStringUpdate { html } => {
                self.sink.on_auxiliary_update(&html);
                None
            }
            Event::Error { message } => Some(self.fail(SessionFailure::Producer { message })),
            Event::Done => Some(self.complete(StreamEnding::DoneMarker)),
        }
    }

    fn complete(&mut self, ending: StreamEnding) -> SessionOutcome {
        self.transition(SessionState::Completing);
        self.sink.on_completed();
        SessionOutcome::Completed {
            accumulated_text: std::mem::take(&mut self.answer),
            sources: std::mem::take(&mut self.sources),
            ending,
        }
    }

    fn fail(&mut self, reason: SessionFailure) -> SessionOutcome {
        self.transition(SessionState::Failing);
        self.sink
            .on_error(reason.display_message(), reason.is_quota());
        SessionOutcome::Failed { reason }
    }

    fn cancel(&mut self) -> SessionOutcome {
        self.transition(SessionState::Cancelling);
        self.sink.on_cancelled();
        SessionOutcome::Cancelled
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next);
        debug!(session_id = %self.session_id, from = ?previous, to = ?next, "session state");
    }
}

/// Resolves once cancellation has been requested; never resolves if every
/// abort handle is gone.
async fn abort_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

fn outcome_label(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Completed { .. } => "completed",
        SessionOutcome::Failed { .. } => "failed",
        SessionOutcome::Cancelled => "cancelled",
    }
}
