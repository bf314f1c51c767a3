//! Statements submitted to the query engine and their executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Statement text with positional `?` placeholders and the values bound to
/// them, in order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<String>,
}

impl Statement {
    pub fn new(text: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }
}

/// Opaque identifier of a submitted statement.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct JobHandle(pub Uuid);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Succeeded | QueryState::Failed { .. } | QueryState::Cancelled
        )
    }
}

/// Engine-side view of one submitted statement.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueryExecution {
    pub handle: JobHandle,
    #[serde(flatten)]
    pub state: QueryState,
    pub rows_affected: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueryExecution {
    pub fn queued(handle: JobHandle) -> Self {
        Self {
            handle,
            state: QueryState::Queued,
            rows_affected: None,
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }
}
