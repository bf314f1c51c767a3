//! Query execution surface used by the promoter, and the submit-and-wait
//! helper shared by every transformation.

use crate::models::query::{JobHandle, QueryExecution, QueryState, Statement};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query engine rejected the statement: {0}")]
    Submit(String),
    #[error("unknown query execution {0}")]
    UnknownExecution(JobHandle),
    #[error("query execution {handle} failed: {reason}")]
    Failed { handle: JobHandle, reason: String },
    #[error("query execution {0} was cancelled")]
    Cancelled(JobHandle),
}

/// An asynchronous statement executor: `submit` returns before the statement
/// has run, `execution` reports where it got to.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn submit(&self, statement: &Statement) -> Result<JobHandle, QueryError>;

    /// Engines may forget an execution after reporting its terminal state.
    async fn execution(&self, handle: &JobHandle) -> Result<QueryExecution, QueryError>;
}

/// Submit `statement` and poll every `poll_interval` until the engine reports
/// a terminal state.
///
/// There is no deadline; a statement runs for as long as the engine lets it.
pub async fn run_query(
    engine: &dyn QueryEngine,
    statement: &Statement,
    poll_interval: Duration,
) -> Result<QueryExecution, QueryError> {
    let handle = engine.submit(statement).await?;
    debug!(execution_id = %handle, "submitted statement");

    loop {
        let execution = engine.execution(&handle).await?;
        match &execution.state {
            QueryState::Succeeded => {
                info!(
                    execution_id = %handle,
                    rows_affected = ?execution.rows_affected,
                    "statement succeeded"
                );
                return Ok(execution);
            }
            QueryState::Failed { reason } => {
                return Err(QueryError::Failed {
                    handle,
                    reason: reason.clone(),
                });
            }
            QueryState::Cancelled => return Err(QueryError::Cancelled(handle)),
            QueryState::Queued | QueryState::Running => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Records submitted statements. Every execution reports `Running` for
    /// `polls_before_done` polls before reaching its scripted final state.
    #[derive(Default)]
    pub(crate) struct ScriptedEngine {
        pub submitted: Mutex<Vec<Statement>>,
        pub fail_on: Option<usize>,
        pub reject_on: Option<usize>,
        pub polls_before_done: usize,
        pub polls: Mutex<HashMap<JobHandle, (usize, usize)>>,
        pub status_calls: AtomicUsize,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl QueryEngine for ScriptedEngine {
        async fn submit(&self, statement: &Statement) -> Result<JobHandle, QueryError> {
            let mut submitted = self.submitted.lock().await;
            let index = submitted.len();
            submitted.push(statement.clone());
            if self.reject_on == Some(index) {
                return Err(QueryError::Submit("syntax error".into()));
            }
            let handle = JobHandle(Uuid::new_v4());
            self.polls.lock().await.insert(handle, (index, 0));
            Ok(handle)
        }

        async fn execution(&self, handle: &JobHandle) -> Result<QueryExecution, QueryError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock().await;
            let (index, seen) = polls
                .get_mut(handle)
                .ok_or(QueryError::UnknownExecution(*handle))?;
            *seen += 1;

            let mut execution = QueryExecution::queued(*handle);
            execution.state = if *seen <= self.polls_before_done {
                QueryState::Running
            } else if self.fail_on == Some(*index) {
                QueryState::Failed {
                    reason: "TABLE_NOT_FOUND".into(),
                }
            } else {
                execution.rows_affected = Some(10 * (*index as u64 + 1));
                QueryState::Succeeded
            };
            Ok(execution)
        }
    }

    fn statement() -> Statement {
        Statement::new("SELECT 1", vec![])
    }

    #[tokio::test]
    async fn polls_until_terminal() {
        let engine = ScriptedEngine {
            polls_before_done: 3,
            ..ScriptedEngine::new()
        };
        let execution = run_query(&engine, &statement(), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(execution.state, QueryState::Succeeded);
        assert_eq!(execution.rows_affected, Some(10));
        assert_eq!(engine.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failed_state_is_an_error() {
        let engine = ScriptedEngine {
            fail_on: Some(0),
            ..ScriptedEngine::new()
        };
        let err = run_query(&engine, &statement(), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Failed { ref reason, .. } if reason == "TABLE_NOT_FOUND"));
    }

    #[tokio::test]
    async fn rejected_submission_is_an_error() {
        let engine = ScriptedEngine {
            reject_on: Some(0),
            ..ScriptedEngine::new()
        };
        let err = run_query(&engine, &statement(), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Submit(_)));
        assert_eq!(engine.status_calls.load(Ordering::SeqCst), 0);
    }
}
