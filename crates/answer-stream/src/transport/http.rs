use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::errors::{RefreshError, ShareError, TransportError};
use crate::model::{AnswerRequest, Exchange};
use crate::refresh::{RefreshBackend, TaskState, TaskStatus};
use crate::share::ShareStore;

use super::config::{Endpoints, HttpTransportConfig};
use super::{AnswerTransport, ChunkStream};

const LIMIT_REACHED: &str = "limit_reached";
const REFRESH_START_FALLBACK: &str = "Refresh failed to start.";

/// JSON envelope used by every non-streaming server reply.
#[derive(Debug, Default, serde::Deserialize)]
struct ServerReply {
    status: Option<String>,
    message: Option<String>,
    task_id: Option<String>,
    history_id: Option<String>,
    progress: Option<f64>,
}

impl ServerReply {
    fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// `reqwest`-backed transport for the answer server.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    endpoints: Endpoints,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let endpoints = config.endpoints()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            endpoints,
        })
    }

    /// Creates a transport from `ANSWER_STREAM_*` environment variables.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::new(HttpTransportConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    /// Parsed server origin.
    pub fn base_url(&self) -> &url::Url {
        self.endpoints.base()
    }

    fn with_session(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.session_cookie {
            Some(cookie) => builder.header(reqwest::header::COOKIE, cookie),
            None => builder,
        }
    }
}

pub(crate) fn stream_form(request: &AnswerRequest) -> [(&'static str, &str); 3] {
    [
        ("question", request.question.as_str()),
        ("channel_name", request.channel.as_str()),
        (
            "is_regenerating",
            if request.is_regenerating() { "true" } else { "false" },
        ),
    ]
}

pub(crate) fn open_error(status: u16, body: &str) -> TransportError {
    let reply = ServerReply::parse(body).unwrap_or_default();
    TransportError::Open {
        status: Some(status),
        quota: reply.status.as_deref() == Some(LIMIT_REACHED),
        message: reply.message,
    }
}

#[async_trait::async_trait]
impl AnswerTransport for HttpTransport {
    async fn open(&self, request: &AnswerRequest) -> Result<ChunkStream, TransportError> {
        debug!(channel = %request.channel, regenerating = request.is_regenerating(), "opening answer stream");
        let response = self
            .with_session(self.client.post(self.endpoints.stream_url()))
            .form(&stream_form(request))
            .send()
            .await
            .map_err(|e| TransportError::network(format!("answer stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "answer stream rejected");
            return Err(open_error(status.as_u16(), &body));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| TransportError::network(format!("answer stream read failed: {e}")))
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait::async_trait]
impl ShareStore for HttpTransport {
    async fn store_history(&self, history: &[Exchange]) -> Result<String, ShareError> {
        let response = self
            .with_session(self.client.post(self.endpoints.share_url()))
            .json(&serde_json::json!({ "history": history }))
            .send()
            .await
            .map_err(|e| TransportError::network(format!("share request failed: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::network(format!("share response read failed: {e}")))?;
        let reply = ServerReply::parse(&body)
            .ok_or_else(|| TransportError::protocol("share response was not JSON"))?;
        match (reply.is_success(), reply.history_id) {
            (true, Some(id)) if !id.trim().is_empty() => Ok(id),
            _ => Err(ShareError::Rejected {
                message: reply
                    .message
                    .unwrap_or_else(|| "Could not create share link.".to_string()),
            }),
        }
    }
}

#[async_trait::async_trait]
impl RefreshBackend for HttpTransport {
    async fn start_refresh(&self, channel_id: &str) -> Result<String, RefreshError> {
        let response = self
            .with_session(self.client.post(self.endpoints.refresh_url(channel_id)))
            .send()
            .await
            .map_err(|e| {
                warn!(channel_id, error = %e, "refresh request failed");
                RefreshError::Start {
                    message: REFRESH_START_FALLBACK.to_string(),
                }
            })?;
        let body = response.text().await.unwrap_or_default();
        let reply = ServerReply::parse(&body).unwrap_or_default();
        match (reply.is_success(), reply.task_id) {
            (true, Some(task_id)) => Ok(task_id),
            _ => Err(RefreshError::Start {
                message: reply
                    .message
                    .unwrap_or_else(|| REFRESH_START_FALLBACK.to_string()),
            }),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, RefreshError> {
        let status_err = |e: String| RefreshError::Status { message: e };
        let response = self
            .with_session(self.client.get(self.endpoints.task_status_url(task_id)))
            .send()
            .await
            .map_err(|e| status_err(e.to_string()))?;
        let body = response.text().await.map_err(|e| status_err(e.to_string()))?;
        let reply = ServerReply::parse(&body)
            .ok_or_else(|| status_err("task status response was not JSON".to_string()))?;
        Ok(task_status_from_reply(reply))
    }
}

fn task_status_from_reply(reply: ServerReply) -> TaskStatus {
    let state = match reply.status.as_deref() {
        Some("complete") => TaskState::Complete,
        Some("failed") => TaskState::Failed,
        _ => TaskState::Pending,
    };
    TaskStatus {
        state,
        message: reply.message,
        progress: reply.progress,
    }
}
