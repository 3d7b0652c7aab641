// src/events.rs
//
// =============================================================================
// SAXSFLOW: WORKFLOW EVENTS (v 0.1 )
// =============================================================================
//
// Typed replacement for per-object signals. Every workflow owns a broadcast
// bus; any number of listeners may subscribe. Sending never blocks and is
// a no-op when nobody listens.

use crate::error::ErrorKind;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        workflow: String,
        run_id: Uuid,
    },
    OpStarted {
        workflow: String,
        tag: String,
    },
    OpFinished {
        workflow: String,
        tag: String,
    },
    OpFailed {
        workflow: String,
        tag: String,
        error: String,
    },
    Message {
        workflow: String,
        tag: String,
        text: String,
    },
    Data {
        workflow: String,
        address: String,
        value: Value,
    },
    BatchIteration {
        workflow: String,
        tag: String,
        index: usize,
    },
    /// Exactly one per `run_wf` invocation.
    ExecFinished(RunReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed {
        /// None when the failure is not attributable to one operation
        /// (e.g. a dependency error in the whole graph).
        tag: Option<String>,
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            RunStatus::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn failed_tag(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed { tag, .. } => tag.as_deref(),
            _ => None,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Broadcast sender shared by a workflow and the invocations it spawns.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: WorkflowEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(WorkflowEvent::OpStarted {
            workflow: "wf".into(),
            tag: "a".into(),
        });
        bus.emit(WorkflowEvent::OpFinished {
            workflow: "wf".into(),
            tag: "a".into(),
        });
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::OpStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::OpFinished { .. }));
    }

    #[test]
    fn emitting_without_listeners_is_fine() {
        EventBus::new().emit(WorkflowEvent::RunStarted {
            workflow: "wf".into(),
            run_id: Uuid::new_v4(),
        });
    }
}
