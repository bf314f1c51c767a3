//! Local query engine running statements against the SQLite warehouse.
//!
//! Statements run on a spawned task so `submit` returns immediately, the way a
//! hosted engine hands back an execution id. Execution state is kept in memory
//! until a terminal state has been read once.

use crate::{
    models::query::{JobHandle, QueryExecution, QueryState, Statement},
    services::query_engine::{QueryEngine, QueryError},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteQueryEngine {
    pub db: Arc<SqlitePool>,
    executions: Arc<RwLock<HashMap<JobHandle, QueryExecution>>>,
}

impl SqliteQueryEngine {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn set_state(&self, handle: JobHandle, state: QueryState, rows_affected: Option<u64>) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&handle) {
            if state.is_terminal() {
                execution.completed_at = Some(Utc::now());
            }
            execution.state = state;
            execution.rows_affected = rows_affected;
        }
    }

    async fn execute(&self, handle: JobHandle, statement: Statement) {
        self.set_state(handle, QueryState::Running, None).await;

        let mut query = sqlx::query(&statement.text);
        for param in &statement.params {
            query = query.bind(param);
        }

        match query.execute(&*self.db).await {
            Ok(result) => {
                debug!(execution_id = %handle, rows = result.rows_affected(), "execution finished");
                self.set_state(handle, QueryState::Succeeded, Some(result.rows_affected()))
                    .await;
            }
            Err(err) => {
                warn!(execution_id = %handle, "execution failed: {}", err);
                self.set_state(
                    handle,
                    QueryState::Failed {
                        reason: err.to_string(),
                    },
                    None,
                )
                .await;
            }
        }
    }
}

#[async_trait]
impl QueryEngine for SqliteQueryEngine {
    async fn submit(&self, statement: &Statement) -> Result<JobHandle, QueryError> {
        if statement.text.trim().is_empty() {
            return Err(QueryError::Submit("empty statement".into()));
        }

        let handle = JobHandle(Uuid::new_v4());
        self.executions
            .write()
            .await
            .insert(handle, QueryExecution::queued(handle));

        let engine = self.clone();
        let statement = statement.clone();
        tokio::spawn(async move { engine.execute(handle, statement).await });

        Ok(handle)
    }

    /// A terminal execution is handed out once and then forgotten.
    async fn execution(&self, handle: &JobHandle) -> Result<QueryExecution, QueryError> {
        let mut executions = self.executions.write().await;
        let terminal = executions
            .get(handle)
            .ok_or(QueryError::UnknownExecution(*handle))?
            .state
            .is_terminal();
        if terminal {
            executions
                .remove(handle)
                .ok_or(QueryError::UnknownExecution(*handle))
        } else {
            executions
                .get(handle)
                .cloned()
                .ok_or(QueryError::UnknownExecution(*handle))
        }
    }
}
