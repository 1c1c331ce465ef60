use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::EventKind;
use super::state::ExecutionState;
use super::step::Step;

/// Creation-ordered identifier of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub u64);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
}

impl SenderIdentity {
    /// `Name <email>` as used in the From header.
    pub fn mailbox(&self) -> String {
        if self.name.trim().is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// A file sent with every email of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingOn {
    pub recipient: String,
    pub kind: EventKind,
}

/// Execution record of one submitted workflow.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub sender: SenderIdentity,
    pub attachments: Vec<Attachment>,
    /// Grows when conditional branches are spliced in.
    pub steps: Vec<Step>,
    /// Index of the next step to execute, `0..=steps.len()`.
    pub cursor: usize,
    pub stopped: bool,
    pub waiting_on: Option<WaitingOn>,
    /// Bumped on every suspension; a wakeup only applies to the one it was
    /// armed for.
    pub suspensions: u64,
    pub state: ExecutionState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        id: WorkflowId,
        sender: SenderIdentity,
        steps: Vec<Step>,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            id,
            sender,
            attachments,
            steps,
            cursor: 0,
            stopped: false,
            waiting_on: None,
            suspensions: 0,
            state: ExecutionState::Idle,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// A child instance running one split sub-path under the same identity.
    pub fn fork(&self, steps: Vec<Step>) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
            attachments: self.attachments.clone(),
            steps,
            cursor: 0,
            stopped: false,
            waiting_on: None,
            suspensions: 0,
            state: ExecutionState::Running,
            last_error: None,
            created_at: self.created_at,
        }
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Insert `path` right after the cursor. Steps at or before the cursor
    /// keep their indices; everything after shifts by `path.len()`.
    pub fn splice_after_cursor(&mut self, path: Vec<Step>) {
        let at = (self.cursor + 1).min(self.steps.len());
        self.steps.splice(at..at, path);
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            workflow_id: self.id,
            state: self.state,
            cursor: self.cursor,
            total_steps: self.steps.len(),
            stopped: self.stopped,
            waiting_on: self.waiting_on.clone(),
            error: self.last_error.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only view returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub workflow_id: WorkflowId,
    pub state: ExecutionState,
    pub cursor: usize,
    pub total_steps: usize,
    pub stopped: bool,
    pub waiting_on: Option<WaitingOn>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
