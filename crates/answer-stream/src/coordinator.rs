use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::CoordinatorError;
use crate::model::{AnswerRequest, ChannelId, Exchange, SlotId, Source, SubmitKind};
use crate::session::{SessionHandle, SessionOutcome, StreamSession};
use crate::sink::{RenderSink, SinkFactory};
use crate::transport::AnswerTransport;

/// Per-slot write gate. The generation only ever increases.
struct SlotGate {
    generation: u64,
    answer: String,
    sources: Vec<Source>,
    completed: bool,
}

struct Slot {
    id: SlotId,
    question: String,
    sink: Arc<dyn RenderSink>,
    gate: Mutex<SlotGate>,
}

impl Slot {
    fn exchange(&self) -> Option<Exchange> {
        let gate = self.gate.lock();
        gate.completed.then(|| Exchange {
            question: self.question.clone(),
            answer: gate.answer.clone(),
            sources: gate.sources.clone(),
        })
    }
}

struct SlotRecord {
    slot: Arc<Slot>,
    live: Option<SessionHandle>,
}

impl SlotRecord {
    fn live_session(&self) -> Option<&SessionHandle> {
        self.live.as_ref().filter(|handle| !handle.is_closed())
    }
}

#[derive(Default)]
struct CoordinatorState {
    next_slot: u64,
    slots: Vec<SlotRecord>,
}

impl CoordinatorState {
    fn record_mut(&mut self, slot: SlotId) -> Option<&mut SlotRecord> {
        self.slots.iter_mut().find(|record| record.slot.id == slot)
    }
}

/// Forwards sink calls only while its generation is the slot's current one.
///
/// The check and the forwarded call happen under the slot gate, so once a
/// regenerate has bumped the generation no call from the superseded session
/// can reach the sink.
struct GuardedSink {
    slot: Arc<Slot>,
    generation: u64,
}

impl GuardedSink {
    fn forward(&self, method: &'static str, apply: impl FnOnce(&mut SlotGate, &dyn RenderSink)) {
        let mut gate = self.slot.gate.lock();
        if gate.generation != self.generation {
            debug!(
                slot = %self.slot.id,
                stale_generation = self.generation,
                current_generation = gate.generation,
                method,
                "dropping sink call from superseded session"
            );
            return;
        }
        apply(&mut *gate, self.slot.sink.as_ref());
    }
}

impl RenderSink for GuardedSink {
    fn on_answer_update(&self, full_text: &str) {
        self.forward("on_answer_update", |gate, sink| {
            gate.answer.clear();
            gate.answer.push_str(full_text);
            sink.on_answer_update(full_text);
        });
    }

    fn on_sources_update(&self, sources: &[Source]) {
        self.forward("on_sources_update", |gate, sink| {
            gate.sources = sources.to_vec();
            sink.on_sources_update(sources);
        });
    }

    fn on_auxiliary_update(&self, html: &str) {
        self.forward("on_auxiliary_update", |_, sink| sink.on_auxiliary_update(html));
    }

    fn on_error(&self, message: &str, is_quota_error: bool) {
        self.forward("on_error", |_, sink| sink.on_error(message, is_quota_error));
    }

    fn on_cancelled(&self) {
        self.forward("on_cancelled", |_, sink| sink.on_cancelled());
    }

    fn on_completed(&self) {
        self.forward("on_completed", |gate, sink| {
            gate.completed = true;
            sink.on_completed();
        });
    }
}

/// A session started by the coordinator, tagged with its slot and generation.
#[derive(Clone)]
pub struct SlotSession {
    slot: SlotId,
    generation: u64,
    handle: SessionHandle,
}

impl SlotSession {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Waits for the session's outcome.
    ///
    /// A superseded session still resolves (usually to `Cancelled`), but none
    /// of its sink calls after the supersession were forwarded.
    pub async fn outcome(&self) -> SessionOutcome {
        self.handle.outcome().await
    }
}

struct CoordinatorInner {
    transport: Arc<dyn AnswerTransport>,
    channel: ChannelId,
    sinks: Arc<dyn SinkFactory>,
    state: Mutex<CoordinatorState>,
}

/// Serializes submit / regenerate / cancel for one channel's conversation.
///
/// Each `submit` opens a new conversation slot. `regenerate` re-asks the
/// latest slot's question, superseding any session still live there. Must be
/// used from within a tokio runtime.
#[derive(Clone)]
pub struct ActionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ActionCoordinator {
    /// Starts a builder for wiring the transport, channel, and sinks.
    pub fn builder() -> ActionCoordinatorBuilder {
        ActionCoordinatorBuilder::default()
    }

    pub fn channel(&self) -> &ChannelId {
        &self.inner.channel
    }

    /// Opens a new slot for `question` and starts streaming into it.
    pub fn submit(&self, question: impl Into<String>) -> Result<SlotSession, CoordinatorError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "question must not be empty".into(),
            ));
        }

        let mut state = self.inner.state.lock();
        state.next_slot += 1;
        let slot_id = SlotId(state.next_slot);
        let slot = Arc::new(Slot {
            id: slot_id,
            sink: self.inner.sinks.sink_for(slot_id),
            question,
            gate: Mutex::new(SlotGate {
                generation: 1,
                answer: String::new(),
                sources: Vec::new(),
                completed: false,
            }),
        });
        info!(slot = %slot_id, channel = %self.inner.channel, "submitting question");
        let session = self.start(&slot, 1, SubmitKind::New);
        state.slots.push(SlotRecord {
            slot,
            live: Some(session.handle.clone()),
        });
        Ok(session)
    }

    /// Regenerates the latest slot.
    pub fn regenerate(&self) -> Result<SlotSession, CoordinatorError> {
        let latest = self.latest_slot().ok_or_else(|| {
            CoordinatorError::Validation("there is no answer to regenerate".into())
        })?;
        self.regenerate_slot(latest)
    }

    /// Regenerates `slot`, cancelling the session currently live in it.
    ///
    /// Only the latest slot can be regenerated, since the server replaces the
    /// last exchange of its history when regenerating.
    pub fn regenerate_slot(&self, slot: SlotId) -> Result<SlotSession, CoordinatorError> {
        let mut state = self.inner.state.lock();
        let latest = state.slots.last().map(|record| record.slot.id);
        let record = state
            .record_mut(slot)
            .ok_or(CoordinatorError::UnknownSlot(slot))?;
        if latest != Some(slot) {
            return Err(CoordinatorError::Validation(format!(
                "only the latest slot can be regenerated, {slot} is not"
            )));
        }

        let generation = {
            let mut gate = record.slot.gate.lock();
            gate.generation += 1;
            gate.answer.clear();
            gate.sources.clear();
            gate.completed = false;
            gate.generation
        };
        if let Some(previous) = record.live_session() {
            debug!(slot = %slot, session_id = %previous.session_id(), "cancelling superseded session");
            previous.cancel();
        }
        info!(slot = %slot, generation, "regenerating answer");
        let session = self.start(&record.slot, generation, SubmitKind::Regenerate);
        record.live = Some(session.handle.clone());
        Ok(session)
    }

    /// Cancels every live session. Their sinks receive `on_cancelled`.
    ///
    /// Returns how many sessions were asked to cancel.
    pub fn cancel_active(&self) -> usize {
        let state = self.inner.state.lock();
        let mut cancelled = 0;
        for handle in state.slots.iter().filter_map(SlotRecord::live_session) {
            handle.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled active sessions");
        }
        cancelled
    }

    /// Most recently submitted slot, if any.
    pub fn latest_slot(&self) -> Option<SlotId> {
        self.inner.state.lock().slots.last().map(|record| record.slot.id)
    }

    /// Live session in `slot`, if one is still running.
    pub fn live_session(&self, slot: SlotId) -> Option<SessionHandle> {
        let state = self.inner.state.lock();
        state
            .slots
            .iter()
            .find(|record| record.slot.id == slot)
            .and_then(SlotRecord::live_session)
            .cloned()
    }

    pub fn has_live_session(&self) -> bool {
        let state = self.inner.state.lock();
        state.slots.iter().any(|record| record.live_session().is_some())
    }

    /// Completed exchanges in slot order.
    pub fn transcript(&self) -> Vec<Exchange> {
        let state = self.inner.state.lock();
        state
            .slots
            .iter()
            .filter_map(|record| record.slot.exchange())
            .collect()
    }

    fn start(&self, slot: &Arc<Slot>, generation: u64, kind: SubmitKind) -> SlotSession {
        let request = AnswerRequest::new(slot.question.clone(), self.inner.channel.clone(), kind);
        let sink = Arc::new(GuardedSink {
            slot: slot.clone(),
            generation,
        });
        let handle = StreamSession::new(request, self.inner.transport.clone(), sink).start();
        SlotSession {
            slot: slot.id,
            generation,
            handle,
        }
    }
}

/// Builder for `ActionCoordinator`.
#[derive(Default)]
pub struct ActionCoordinatorBuilder {
    transport: Option<Arc<dyn AnswerTransport>>,
    channel: Option<ChannelId>,
    sinks: Option<Arc<dyn SinkFactory>>,
}

impl ActionCoordinatorBuilder {
    pub fn transport(mut self, transport: Arc<dyn AnswerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the factory that yields one render sink per slot.
    pub fn sink_factory(mut self, sinks: impl SinkFactory + 'static) -> Self {
        self.sinks = Some(Arc::new(sinks));
        self
    }

    /// Builds the coordinator. A transport and a non-empty channel are required.
    pub fn build(self) -> Result<ActionCoordinator, CoordinatorError> {
        let transport = self
            .transport
            .ok_or_else(|| CoordinatorError::Validation("a transport is required".into()))?;
        let channel = self
            .channel
            .filter(|channel| !channel.as_str().trim().is_empty())
            .ok_or_else(|| CoordinatorError::Validation("a channel is required".into()))?;
        let sinks = self.sinks.unwrap_or_else(|| {
            Arc::new(|_: SlotId| Arc::new(crate::sink::NullSink) as Arc<dyn RenderSink>)
                as Arc<dyn SinkFactory>
        });
        Ok(ActionCoordinator {
            inner: Arc::new(CoordinatorInner {
                transport,
                channel,
                sinks,
                state: Mutex::new(CoordinatorState::default()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;

    use super::*;
    use crate::session::{SessionState, StreamEnding};
    use crate::test_support::{
        RecordingSink, Script, ScriptedTransport, SinkCall, channel_script, text_chunks,
    };

    const HI_STREAM: [&str; 2] = [
        "data: {\"answer\":\"Hi\"}\n\n",
        "data: {\"sources\":[{\"title\":\"T\",\"url\":\"U\"}]}\n\ndata: [DONE]\n\n",
    ];

    #[derive(Default)]
    struct Sinks {
        by_slot: parking_lot::Mutex<HashMap<SlotId, Arc<RecordingSink>>>,
    }

    impl Sinks {
        fn get(&self, slot: SlotId) -> Arc<RecordingSink> {
            self.by_slot.lock().entry(slot).or_default().clone()
        }
    }

    fn coordinator(scripts: Vec<Script>) -> (ActionCoordinator, Arc<ScriptedTransport>, Arc<Sinks>) {
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let sinks = Arc::new(Sinks::default());
        let factory = sinks.clone();
        let coordinator = ActionCoordinator::builder()
            .transport(transport.clone())
            .channel("docs-bot")
            .sink_factory(move |slot: SlotId| factory.get(slot) as Arc<dyn RenderSink>)
            .build()
            .expect("coordinator");
        (coordinator, transport, sinks)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        while !check() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn submit_streams_into_its_slot_and_records_transcript() {
        let (coordinator, transport, sinks) = coordinator(vec![text_chunks(&HI_STREAM)]);
        let session = coordinator.submit("What is up?").expect("submit");
        assert_eq!(session.slot(), SlotId(1));
        assert_eq!(session.generation(), 1);

        let outcome = session.outcome().await;
        assert!(matches!(outcome, SessionOutcome::Completed { ending: StreamEnding::DoneMarker, .. }));
        assert_eq!(
            sinks.get(SlotId(1)).calls(),
            vec![
                SinkCall::Answer("Hi".into()),
                SinkCall::Sources(vec![Source::new("T", "U")]),
                SinkCall::Completed,
            ]
        );
        assert_eq!(
            coordinator.transcript(),
            vec![Exchange {
                question: "What is up?".into(),
                answer: "Hi".into(),
                sources: vec![Source::new("T", "U")],
            }]
        );
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].channel, ChannelId::new("docs-bot"));
        assert!(!requests[0].is_regenerating());
        assert!(!coordinator.has_live_session());
    }

    #[tokio::test]
    async fn superseded_session_produces_no_sink_calls() {
        let (tx, first) = channel_script();
        let (coordinator, transport, sinks) = coordinator(vec![first, text_chunks(&HI_STREAM)]);
        let sink = sinks.get(SlotId(1));

        let session_a = coordinator.submit("q").expect("submit");
        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"answer\":\"old\"}\n\n")))
            .expect("send");
        wait_until(|| !sink.calls().is_empty()).await;

        let session_b = coordinator.regenerate().expect("regenerate");
        assert_eq!(session_b.slot(), session_a.slot());
        assert_eq!(session_b.generation(), 2);
        assert!(matches!(session_b.outcome().await, SessionOutcome::Completed { .. }));

        // Bytes that reach A after the regenerate are never rendered.
        let _ = tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"answer\":\" late\"}\n\n")));
        assert_eq!(session_a.outcome().await, SessionOutcome::Cancelled);
        tokio::task::yield_now().await;

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Answer("old".into()),
                SinkCall::Answer("Hi".into()),
                SinkCall::Sources(vec![Source::new("T", "U")]),
                SinkCall::Completed,
            ]
        );
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].is_regenerating());
        assert_eq!(requests[1].question, "q");
        assert_eq!(coordinator.transcript()[0].answer, "Hi");
    }

    #[tokio::test]
    async fn regenerate_during_opening_cancels_silently() {
        let (coordinator, transport, sinks) =
            coordinator(vec![Script::OpenPending, text_chunks(&HI_STREAM)]);
        let session_a = coordinator.submit("q").expect("submit");
        wait_until(|| transport.requests().len() == 1).await;
        let session_b = coordinator.regenerate().expect("regenerate");

        assert_eq!(session_a.outcome().await, SessionOutcome::Cancelled);
        session_b.outcome().await;
        assert!(
            !sinks.get(SlotId(1)).calls().contains(&SinkCall::Cancelled),
            "superseded cancellation must not reach the sink"
        );
    }

    #[tokio::test]
    async fn cancel_active_reaches_sink_and_skips_transcript() {
        let (coordinator, _transport, sinks) = coordinator(vec![Script::Pending]);
        let session = coordinator.submit("q").expect("submit");
        wait_until(|| session.handle().state() == SessionState::Streaming).await;
        assert!(coordinator.has_live_session());

        assert_eq!(coordinator.cancel_active(), 1);
        assert_eq!(session.outcome().await, SessionOutcome::Cancelled);
        assert_eq!(sinks.get(SlotId(1)).calls(), vec![SinkCall::Cancelled]);
        assert!(coordinator.transcript().is_empty());
        assert_eq!(coordinator.cancel_active(), 0);
    }

    #[tokio::test]
    async fn each_submit_gets_its_own_slot_and_sink() {
        let (coordinator, _transport, sinks) = coordinator(vec![
            text_chunks(&["data: {\"answer\":\"one\"}\n\n"]),
            text_chunks(&["data: {\"answer\":\"two\"}\n\n"]),
        ]);
        coordinator.submit("first").expect("submit").outcome().await;
        coordinator.submit("second").expect("submit").outcome().await;

        assert_eq!(coordinator.latest_slot(), Some(SlotId(2)));
        assert_eq!(
            sinks.get(SlotId(1)).calls(),
            vec![SinkCall::Answer("one".into()), SinkCall::Completed]
        );
        assert_eq!(
            sinks.get(SlotId(2)).calls(),
            vec![SinkCall::Answer("two".into()), SinkCall::Completed]
        );
        let answers: Vec<_> = coordinator
            .transcript()
            .into_iter()
            .map(|exchange| exchange.answer)
            .collect();
        assert_eq!(answers, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn regenerate_rejects_missing_stale_and_unknown_slots() {
        let (coordinator, _transport, _sinks) = coordinator(vec![
            text_chunks(&HI_STREAM),
            text_chunks(&HI_STREAM),
        ]);
        assert!(matches!(
            coordinator.regenerate(),
            Err(CoordinatorError::Validation(_))
        ));

        coordinator.submit("first").expect("submit").outcome().await;
        coordinator.submit("second").expect("submit").outcome().await;
        assert!(matches!(
            coordinator.regenerate_slot(SlotId(1)),
            Err(CoordinatorError::Validation(_))
        ));
        assert_eq!(
            coordinator.regenerate_slot(SlotId(9)).err(),
            Some(CoordinatorError::UnknownSlot(SlotId(9)))
        );
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let (coordinator, transport, _sinks) = coordinator(vec![]);
        assert!(matches!(
            coordinator.submit("   "),
            Err(CoordinatorError::Validation(_))
        ));
        assert!(transport.requests().is_empty());
        assert_eq!(coordinator.latest_slot(), None);
    }

    #[test]
    fn build_requires_transport_and_channel() {
        assert!(matches!(
            ActionCoordinator::builder().channel("c").build(),
            Err(CoordinatorError::Validation(_))
        ));
        let transport: Arc<dyn AnswerTransport> = Arc::new(ScriptedTransport::default());
        assert!(matches!(
            ActionCoordinator::builder().transport(transport).channel(" ").build(),
            Err(CoordinatorError::Validation(_))
        ));
    }

    #[test]
    fn stale_guard_drops_calls() {
        let sink = Arc::new(RecordingSink::default());
        let slot = Arc::new(Slot {
            id: SlotId(1),
            question: "q".into(),
            sink: sink.clone(),
            gate: Mutex::new(SlotGate {
                generation: 3,
                answer: String::new(),
                sources: Vec::new(),
                completed: false,
            }),
        });
        let stale = GuardedSink { slot: slot.clone(), generation: 2 };
        let current = GuardedSink { slot: slot.clone(), generation: 3 };

        stale.on_answer_update("stale");
        stale.on_completed();
        current.on_answer_update("fresh");

        assert_eq!(sink.calls(), vec![SinkCall::Answer("fresh".into())]);
        assert!(slot.exchange().is_none());
    }
}
