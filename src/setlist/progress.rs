use std::{
    num::NonZeroU64,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use serde::Serialize;
use specta::Type;

const PROGRESS_THROTTLE_MS: u64 = 100;

// ============================================================================
// Progress Sink Abstraction
// ============================================================================

/// Receives progress events. Implemented by the host; tests use a recording sink.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: InstallProgress);
}

/// Reporter that holds task_id and sink. Clone-friendly for spawn_blocking.
#[derive(Clone)]
pub struct InstallReporter {
    task_id: String,
    sink: Arc<dyn ProgressSink>,
}

impl InstallReporter {
    pub fn new(task_id: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            task_id: task_id.into(),
            sink,
        }
    }

    /// A reporter that drops every event.
    pub fn silent(task_id: impl Into<String>) -> Self {
        Self::new(task_id, Arc::new(NoopProgressSink))
    }

    pub fn report(&self, phase: InstallPhase, status: InstallStatus) {
        self.sink
            .emit(InstallProgress::new(&self.task_id, phase, status));
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _progress: InstallProgress) {}
}

/// Writes progress to the tracing subscriber.
/// InProgress events are throttled; every other status always goes through.
pub struct TracingProgressSink {
    last_emit: Mutex<Instant>,
    throttle_duration: Duration,
}

impl TracingProgressSink {
    pub fn new(throttle_duration: Duration) -> Self {
        Self {
            // Start in the past so the first InProgress event is not swallowed
            last_emit: Mutex::new(
                Instant::now()
                    .checked_sub(throttle_duration * 2)
                    .unwrap_or_else(Instant::now),
            ),
            throttle_duration,
        }
    }
}

impl Default for TracingProgressSink {
    fn default() -> Self {
        Self::new(Duration::from_millis(PROGRESS_THROTTLE_MS))
    }
}

impl ProgressSink for TracingProgressSink {
    fn emit(&self, progress: InstallProgress) {
        if matches!(progress.status, InstallStatus::InProgress { .. }) {
            let mut last = match self.last_emit.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if last.elapsed() < self.throttle_duration {
                return;
            }
            *last = Instant::now();
        }

        match &progress.status {
            InstallStatus::Failed { reason } => tracing::warn!(
                task_id = %progress.task_id,
                phase = ?progress.phase,
                reason = %reason,
                "Install step failed"
            ),
            status => tracing::info!(
                task_id = %progress.task_id,
                phase = ?progress.phase,
                status = ?status,
                "Install progress"
            ),
        }
    }
}

// ============================================================================
// InstallProgress (Event Payload)
// ============================================================================

#[derive(Debug, Clone, Serialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
    pub task_id: String,
    pub phase: InstallPhase,
    #[serde(flatten)]
    pub status: InstallStatus,
}

impl InstallProgress {
    pub fn new(task_id: impl Into<String>, phase: InstallPhase, status: InstallStatus) -> Self {
        Self {
            task_id: task_id.into(),
            phase,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Type)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum InstallStatus {
    Started {
        #[serde(skip_serializing_if = "Option::is_none")]
        total_size: Option<NonZeroU64>,
    },
    InProgress {
        percent: f64,
    },
    Completed,
    Failed {
        reason: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Type)]
#[serde(rename_all = "camelCase")]
pub enum InstallPhase {
    Preparing,
    Downloading,
    Verifying,
    Extracting,
    Finalizing,
    Launching,
}
