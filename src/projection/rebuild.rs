//! Background projection rebuild with progress reporting and cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{ProjectionEngine, ProjectionError, RebuildReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Pending,
    Clearing,
    Loading,
    Replaying,
    Complete,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildProgress {
    pub total_events: u64,
    pub processed_events: u64,
    pub phase: RebuildPhase,
    pub error: Option<String>,
}

impl RebuildProgress {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            RebuildPhase::Complete | RebuildPhase::Cancelled | RebuildPhase::Failed
        )
    }
}

impl Default for RebuildProgress {
    fn default() -> Self {
        Self {
            total_events: 0,
            processed_events: 0,
            phase: RebuildPhase::Pending,
            error: None,
        }
    }
}

/// Progress and cancellation state shared between a rebuild and its handle
#[derive(Debug, Clone, Default)]
pub(crate) struct RebuildControl {
    progress: Arc<RwLock<RebuildProgress>>,
    cancelled: Arc<AtomicBool>,
}

impl RebuildControl {
    pub(crate) async fn set_phase(&self, phase: RebuildPhase) {
        self.progress.write().await.phase = phase;
    }

    pub(crate) async fn set_total(&self, total_events: u64) {
        self.progress.write().await.total_events = total_events;
    }

    pub(crate) async fn advance(&self) {
        self.progress.write().await.processed_events += 1;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    async fn finish(&self, result: &Result<RebuildReport, ProjectionError>) {
        let mut progress = self.progress.write().await;
        match result {
            Ok(_) => progress.phase = RebuildPhase::Complete,
            Err(ProjectionError::Cancelled) => progress.phase = RebuildPhase::Cancelled,
            Err(e) => {
                progress.phase = RebuildPhase::Failed;
                progress.error = Some(e.to_string());
            }
        }
    }
}

/// Handle to a rebuild running on the tokio runtime
pub struct RebuildHandle {
    control: RebuildControl,
    task: JoinHandle<Result<RebuildReport, ProjectionError>>,
}

impl RebuildHandle {
    pub fn spawn(engine: ProjectionEngine) -> Self {
        let control = RebuildControl::default();
        let task_control = control.clone();

        let task = tokio::spawn(async move {
            let result = engine.rebuild_with(&task_control).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Background projection rebuild did not complete");
            }
            task_control.finish(&result).await;
            result
        });

        Self { control, task }
    }

    pub async fn progress(&self) -> RebuildProgress {
        self.control.progress.read().await.clone()
    }

    /// Stop before the next event. Events already applied stay applied.
    pub fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Relaxed);
    }

    pub async fn wait(self) -> Result<RebuildReport, ProjectionError> {
        self.task
            .await
            .map_err(|e| ProjectionError::TaskFailed(e.to_string()))?
    }
}
