//! Lifecycle notifications emitted by the emulation engine

use serde::{Deserialize, Serialize};

use crate::domain::run::RunState;

/// Lifecycle notification for a run
///
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StateChanged {
        run_id: String,
        old_state: Option<RunState>,
        new_state: Option<RunState>,
    },
    Started {
        run_id: String,
    },
    Finished {
        run_id: String,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> &str {
        match self {
            LifecycleEvent::StateChanged { run_id, .. }
            | LifecycleEvent::Started { run_id }
            | LifecycleEvent::Finished { run_id } => run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::StateChanged { .. } => "state_changed",
            LifecycleEvent::Started { .. } => "started",
            LifecycleEvent::Finished { .. } => "finished",
        }
    }
}
