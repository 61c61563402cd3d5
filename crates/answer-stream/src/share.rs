//! Shareable links for a channel, optionally pinned to a stored transcript.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::errors::ShareError;
use crate::model::{ChannelId, Exchange};

/// Persists a transcript server-side and returns its history id.
#[async_trait::async_trait]
pub trait ShareStore: Send + Sync {
    async fn store_history(&self, history: &[Exchange]) -> Result<String, ShareError>;
}

struct StoredHistory {
    history: Vec<Exchange>,
    history_id: String,
}

/// Share-link generator owned by one channel's conversation.
pub struct ShareLinks {
    base: Url,
    store: Arc<dyn ShareStore>,
    stored: Mutex<Option<StoredHistory>>,
}

impl ShareLinks {
    /// Creates links under `origin` (scheme, host, optional port) for `channel`.
    pub fn new(
        origin: &str,
        channel: &ChannelId,
        store: Arc<dyn ShareStore>,
    ) -> Result<Self, ShareError> {
        let mut base =
            Url::parse(origin).map_err(|e| ShareError::InvalidOrigin(format!("{origin}: {e}")))?;
        base.path_segments_mut()
            .map_err(|_| ShareError::InvalidOrigin(format!("{origin}: cannot carry a path")))?
            .clear()
            .push("c")
            .push(channel.as_str());
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self {
            base,
            store,
            stored: Mutex::new(None),
        })
    }

    /// Link to the channel itself.
    pub fn base_link(&self) -> String {
        self.base.to_string()
    }

    /// Returns the link to share.
    ///
    /// With `include_history`, exchanges with an empty question or answer are
    /// dropped and the rest is stored; the stored id is reused for as long as
    /// the filtered transcript is unchanged. Without it, the base link is
    /// returned and any stored id is forgotten.
    pub async fn link(
        &self,
        include_history: bool,
        transcript: &[Exchange],
    ) -> Result<String, ShareError> {
        let mut stored = self.stored.lock().await;
        if !include_history {
            *stored = None;
            return Ok(self.base_link());
        }

        let history: Vec<Exchange> = transcript
            .iter()
            .filter(|exchange| !exchange.question.is_empty() && !exchange.answer.is_empty())
            .cloned()
            .collect();
        if history.is_empty() {
            return Err(ShareError::NoHistory);
        }

        let history_id = match stored.as_ref() {
            Some(previous) if previous.history == history => {
                debug!(history_id = %previous.history_id, "reusing stored share history");
                previous.history_id.clone()
            }
            _ => {
                let history_id = self.store.store_history(&history).await?;
                info!(%history_id, exchanges = history.len(), "stored share history");
                *stored = Some(StoredHistory {
                    history,
                    history_id: history_id.clone(),
                });
                history_id
            }
        };

        let mut link = self.base.clone();
        link.query_pairs_mut().append_pair("history_id", &history_id);
        Ok(link.to_string())
    }
}
