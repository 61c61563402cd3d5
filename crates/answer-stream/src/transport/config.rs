use std::time::Duration;

use url::Url;

use crate::errors::TransportError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Configuration for `HttpTransport`.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Origin of the answer server, also used for share links.
    pub base_url: String,
    /// Connection establishment timeout. Streams themselves have no deadline.
    pub connect_timeout: Duration,
    pub stream_path: String,
    pub share_path: String,
    pub refresh_path: String,
    pub task_status_path: String,
    /// Raw `Cookie` header value carrying the server session, if any.
    pub session_cookie: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            stream_path: "/stream_answer".to_string(),
            share_path: "/api/share_chat".to_string(),
            refresh_path: "/refresh_channel".to_string(),
            task_status_path: "/task_result".to_string(),
            session_cookie: None,
        }
    }
}

impl HttpTransportConfig {
    /// Creates a config for the given server origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from the environment.
    ///
    /// - `ANSWER_STREAM_BASE_URL`: server origin (default `http://127.0.0.1:5000`).
    /// - `ANSWER_STREAM_CONNECT_TIMEOUT_SECS`: connect timeout in seconds.
    /// - `ANSWER_STREAM_SESSION_COOKIE`: cookie header forwarded on every request.
    pub fn from_env() -> Result<Self, TransportError> {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var("ANSWER_STREAM_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url.trim().to_string();
        }
        if let Ok(raw) = std::env::var("ANSWER_STREAM_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                TransportError::Config(format!(
                    "ANSWER_STREAM_CONNECT_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.session_cookie = std::env::var("ANSWER_STREAM_SESSION_COOKIE")
            .ok()
            .filter(|c| !c.trim().is_empty());
        Ok(config)
    }

    /// Overrides the server origin.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the session cookie.
    pub fn session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Parses `base_url` and resolves the endpoint layout.
    pub(crate) fn endpoints(&self) -> Result<Endpoints, TransportError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(TransportError::Config("base_url must not be empty".into()));
        }
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::Config(format!("invalid base_url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::Config(format!(
                "base_url {base_url:?} cannot carry a path"
            )));
        }
        Ok(Endpoints {
            base,
            stream_path: self.stream_path.clone(),
            share_path: self.share_path.clone(),
            refresh_path: self.refresh_path.clone(),
            task_status_path: self.task_status_path.clone(),
        })
    }
}

/// Endpoint URLs under a parsed server origin.
///
/// Ids are pushed as single path segments, so `/`, `?` and `#` in an id are
/// percent-encoded instead of changing the URL's structure.
#[derive(Clone, Debug)]
pub(crate) struct Endpoints {
    base: Url,
    stream_path: String,
    share_path: String,
    refresh_path: String,
    task_status_path: String,
}

impl Endpoints {
    pub(crate) fn base(&self) -> &Url {
        &self.base
    }

    pub(crate) fn stream_url(&self) -> Url {
        self.join(&self.stream_path, None)
    }

    pub(crate) fn share_url(&self) -> Url {
        self.join(&self.share_path, None)
    }

    pub(crate) fn refresh_url(&self, channel_id: &str) -> Url {
        self.join(&self.refresh_path, Some(channel_id))
    }

    pub(crate) fn task_status_url(&self, task_id: &str) -> Url {
        self.join(&self.task_status_path, Some(task_id))
    }

    fn join(&self, path: &str, id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }
}
