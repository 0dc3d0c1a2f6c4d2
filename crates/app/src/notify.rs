use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;

use storefront_core::types::LifecycleEvent;
use storefront_marketing::{EnrollmentNotifier, NotifyOutcome, QueueError};
use storefront_storage::Database;
use storefront_util::NotifierConfig;

#[derive(Debug, Error)]
pub enum NotifyCommandError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid lifecycle event {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("marketing queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Reads a tagged lifecycle event from a JSON file.
pub fn load_event(path: &Path) -> Result<LifecycleEvent, NotifyCommandError> {
    let raw = fs::read_to_string(path).map_err(|source| NotifyCommandError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| NotifyCommandError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Replays one lifecycle event through the broker-backed notifier and waits
/// for its deliveries to finish.
pub async fn run(
    config: NotifierConfig,
    database: Database,
    path: &Path,
) -> Result<NotifyOutcome, NotifyCommandError> {
    let event = load_event(path)?;
    let (notifier, queue) = EnrollmentNotifier::with_broker(config, database)?;

    let outcome = notifier.handle(&event).await;
    queue.flush().await;

    info!(
        stage = "notifier",
        event = event.kind_str(),
        action = outcome.action.as_str(),
        submitted = outcome.submitted,
        reason = outcome.reason.as_deref().unwrap_or(""),
        "lifecycle event replayed"
    );
    Ok(outcome)
}
