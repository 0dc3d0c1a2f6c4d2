use std::sync::{Arc, Mutex};

use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, warn};
use url::Url;

use storefront_core::types::TaskEnvelope;
use storefront_util::NotifierConfig;

/// Fire-and-forget hand-off to the external task queue.
///
/// Implementations must not block on delivery; `submit` only reports
/// whether the task could be handed off.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: TaskEnvelope) -> Result<(), QueueError>;
}

/// Errors raised while handing a task to the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("TASK_BROKER_URL is not configured")]
    NotConfigured,
    #[error("no async runtime available to dispatch task")]
    NoRuntime,
    #[error("task queue rejected task: {0}")]
    Rejected(String),
}

/// Errors raised while delivering a task to the broker.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Queue posting task envelopes as JSON to an HTTP broker endpoint.
///
/// Clones share the set of in-flight deliveries, so any clone can
/// [`flush`](Self::flush) them.
#[derive(Clone)]
pub struct BrokerQueue {
    http: Client,
    endpoint: Url,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BrokerQueue {
    pub fn new(endpoint: Url, http: Client) -> Self {
        Self {
            http,
            endpoint,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builds a queue for the broker named in the notifier configuration.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, QueueError> {
        let endpoint = config.broker_url.clone().ok_or(QueueError::NotConfigured)?;
        Ok(Self::new(endpoint, Client::new()))
    }

    /// Posts the task and waits for the broker to acknowledge it.
    pub async fn deliver(&self, task: &TaskEnvelope) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(task)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Waits for every delivery spawned so far.
    ///
    /// Short-lived processes call this before the runtime shuts down.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.lock_pending());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(stage = "queue", error = %err, "task delivery aborted");
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskQueue for BrokerQueue {
    fn submit(&self, task: TaskEnvelope) -> Result<(), QueueError> {
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let queue = self.clone();
        let handle = runtime.spawn(async move {
            match queue.deliver(&task).await {
                Ok(()) => {
                    debug!(stage = "queue", task_id = %task.id, task = %task.task, "task delivered")
                }
                Err(err) => warn!(
                    stage = "queue",
                    task_id = %task.id,
                    task = %task.task,
                    error = %err,
                    "task delivery failed"
                ),
            }
        });

        let mut pending = self.lock_pending();
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(DeliveryError::Status { status, body });
    }
    Ok(())
}
