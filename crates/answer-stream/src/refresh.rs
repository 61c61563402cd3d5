//! Channel refresh: start a background task server-side, then poll it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::RefreshError;

/// Server-side state of a background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Complete,
    Failed,
}

/// One task status poll.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: Option<String>,
    /// Percentage reported by the server while the task runs.
    pub progress: Option<f64>,
}

/// Backend able to start channel refreshes and report task status.
#[async_trait::async_trait]
pub trait RefreshBackend: Send + Sync {
    /// Starts a refresh and returns the background task id.
    async fn start_refresh(&self, channel_id: &str) -> Result<String, RefreshError>;
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, RefreshError>;
}

#[derive(Clone, Debug)]
pub struct RefreshOptions {
    /// Delay before each status poll.
    pub poll_interval: Duration,
    /// Upper bound on status polls; `None` polls until the task finishes.
    pub max_polls: Option<u32>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_polls: None,
        }
    }
}

impl RefreshOptions {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}

/// Final state of a refresh task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub task_id: String,
    pub succeeded: bool,
    pub message: Option<String>,
}

/// Runs refreshes, at most one in flight per channel.
#[derive(Clone)]
pub struct RefreshCoordinator {
    backend: Arc<dyn RefreshBackend>,
    options: RefreshOptions,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Removes its channel from the in-flight set when dropped.
struct InFlight {
    channel_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.channel_id);
    }
}

impl RefreshCoordinator {
    pub fn new(backend: Arc<dyn RefreshBackend>, options: RefreshOptions) -> Self {
        Self {
            backend,
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        self.in_flight.lock().contains(channel_id)
    }

    /// Starts a refresh of `channel_id` and polls until it completes or fails.
    ///
    /// Fails fast with `AlreadyRunning` while another refresh of the same
    /// channel is in flight. Dropping the returned future stops polling.
    pub async fn refresh(&self, channel_id: &str) -> Result<RefreshOutcome, RefreshError> {
        let _guard = self.acquire(channel_id)?;

        let task_id = self.backend.start_refresh(channel_id).await?;
        info!(channel_id, %task_id, "channel refresh started");

        let mut polls = 0_u32;
        loop {
            if let Some(max) = self.options.max_polls
                && polls >= max
            {
                warn!(channel_id, %task_id, polls, "refresh task still running; giving up");
                return Err(RefreshError::TimedOut { task_id, polls });
            }
            tokio::time::sleep(self.options.poll_interval).await;
            polls += 1;

            let status = self.backend.task_status(&task_id).await.inspect_err(|err| {
                warn!(channel_id, %task_id, error = %err, "task status poll failed");
            })?;
            match status.state {
                TaskState::Pending => {
                    debug!(%task_id, polls, progress = ?status.progress, "refresh task pending");
                }
                TaskState::Complete | TaskState::Failed => {
                    let succeeded = status.state == TaskState::Complete;
                    info!(channel_id, %task_id, polls, succeeded, "channel refresh finished");
                    return Ok(RefreshOutcome {
                        task_id,
                        succeeded,
                        message: status.message,
                    });
                }
            }
        }
    }

    fn acquire(&self, channel_id: &str) -> Result<InFlight, RefreshError> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(channel_id.to_string()) {
            return Err(RefreshError::AlreadyRunning(channel_id.to_string()));
        }
        Ok(InFlight {
            channel_id: channel_id.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        start: Option<RefreshError>,
        statuses: Mutex<VecDeque<Result<TaskState, RefreshError>>>,
        polled_at: Mutex<Vec<Instant>>,
    }

    impl FakeBackend {
        fn with_states(states: Vec<Result<TaskState, RefreshError>>) -> Self {
            Self {
                statuses: Mutex::new(states.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl RefreshBackend for FakeBackend {
        async fn start_refresh(&self, channel_id: &str) -> Result<String, RefreshError> {
            match &self.start {
                Some(err) => Err(err.clone()),
                None => Ok(format!("task-{channel_id}")),
            }
        }

        async fn task_status(&self, _task_id: &str) -> Result<TaskStatus, RefreshError> {
            self.polled_at.lock().push(Instant::now());
            let state = self
                .statuses
                .lock()
                .pop_front()
                .unwrap_or(Ok(TaskState::Pending))?;
            Ok(TaskStatus {
                state,
                message: (state != TaskState::Pending).then(|| format!("{state:?}")),
                progress: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_complete() {
        let backend = Arc::new(FakeBackend::with_states(vec![
            Ok(TaskState::Pending),
            Ok(TaskState::Pending),
            Ok(TaskState::Complete),
        ]));
        let refresher = RefreshCoordinator::new(backend.clone(), RefreshOptions::default());
        let started = Instant::now();

        let outcome = refresher.refresh("42").await.expect("refresh");
        assert_eq!(
            outcome,
            RefreshOutcome {
                task_id: "task-42".into(),
                succeeded: true,
                message: Some("Complete".into()),
            }
        );
        let offsets: Vec<_> = backend
            .polled_at
            .lock()
            .iter()
            .map(|at| at.duration_since(started))
            .collect();
        assert_eq!(
            offsets,
            vec![Duration::from_secs(3), Duration::from_secs(6), Duration::from_secs(9)]
        );
        assert!(!refresher.is_running("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_an_unsuccessful_outcome() {
        let backend = Arc::new(FakeBackend::with_states(vec![Ok(TaskState::Failed)]));
        let refresher = RefreshCoordinator::new(backend, RefreshOptions::default());
        let outcome = refresher.refresh("7").await.expect("refresh");
        assert!(!outcome.succeeded);
        assert_eq!(outcome.message.as_deref(), Some("Failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_refresh_of_same_channel_is_rejected_while_running() {
        let backend = Arc::new(FakeBackend::default());
        let refresher = RefreshCoordinator::new(backend.clone(), RefreshOptions::default());

        let running = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh("42").await }
        });
        while backend.polled_at.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        assert_eq!(
            refresher.refresh("42").await,
            Err(RefreshError::AlreadyRunning("42".into()))
        );
        assert!(refresher.is_running("42"));

        running.abort();
        assert!(running.await.is_err());
        assert!(!refresher.is_running("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn status_error_stops_polling_and_releases_channel() {
        let backend = Arc::new(FakeBackend::with_states(vec![
            Ok(TaskState::Pending),
            Err(RefreshError::Status {
                message: "HTTP 500".into(),
            }),
        ]));
        let refresher = RefreshCoordinator::new(backend.clone(), RefreshOptions::default());
        let result = refresher.refresh("42").await;
        assert!(matches!(result, Err(RefreshError::Status { .. })));
        assert_eq!(backend.polled_at.lock().len(), 2);
        assert!(!refresher.is_running("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_polls() {
        let backend = Arc::new(FakeBackend::default());
        let refresher = RefreshCoordinator::new(
            backend.clone(),
            RefreshOptions::default()
                .poll_interval(Duration::from_secs(1))
                .max_polls(2),
        );
        assert_eq!(
            refresher.refresh("42").await,
            Err(RefreshError::TimedOut {
                task_id: "task-42".into(),
                polls: 2
            })
        );
        assert_eq!(backend.polled_at.lock().len(), 2);
    }

    #[tokio::test]
    async fn start_failure_is_returned_without_polling() {
        let backend = Arc::new(FakeBackend {
            start: Some(RefreshError::Start {
                message: "Channel not found or you do not have permission.".into(),
            }),
            ..FakeBackend::default()
        });
        let refresher = RefreshCoordinator::new(backend.clone(), RefreshOptions::default());
        assert!(matches!(
            refresher.refresh("42").await,
            Err(RefreshError::Start { .. })
        ));
        assert!(backend.polled_at.lock().is_empty());
        assert!(!refresher.is_running("42"));
    }
}
