use std::sync::Arc;

use crate::model::{SlotId, Source};

/// Presentation-layer collaborator that receives interpreted stream updates.
///
/// Calls for one session are never interleaved. `on_answer_update` always
/// carries the full accumulated answer, so implementations replace what they
/// display instead of appending. Implementations must not call back into the
/// `ActionCoordinator` synchronously from these methods.
pub trait RenderSink: Send + Sync {
    /// Full answer text accumulated so far.
    fn on_answer_update(&self, full_text: &str);
    /// Replaces the displayed source list.
    fn on_sources_update(&self, sources: &[Source]);
    /// Replaces the auxiliary (query-count) fragment.
    fn on_auxiliary_update(&self, html: &str);
    /// Terminal failure. Quota errors belong in a dismissible notice.
    fn on_error(&self, message: &str, is_quota_error: bool);
    /// Terminal cancellation requested by the user.
    fn on_cancelled(&self);
    /// Terminal success; the in-progress affordance can be removed.
    fn on_completed(&self);
}

/// Yields the render sink for a conversation slot.
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, slot: SlotId) -> Arc<dyn RenderSink>;
}

impl<F> SinkFactory for F
where
    F: Fn(SlotId) -> Arc<dyn RenderSink> + Send + Sync,
{
    fn sink_for(&self, slot: SlotId) -> Arc<dyn RenderSink> {
        self(slot)
    }
}

/// Sink that drops every update.
pub struct NullSink;

impl RenderSink for NullSink {
    fn on_answer_update(&self, _full_text: &str) {}
    fn on_sources_update(&self, _sources: &[Source]) {}
    fn on_auxiliary_update(&self, _html: &str) {}
    fn on_error(&self, _message: &str, _is_quota_error: bool) {}
    fn on_cancelled(&self) {}
    fn on_completed(&self) {}
}
