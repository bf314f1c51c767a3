//! Promotes the raw partition of a trailing hour into the refined tables.
//!
//! Each run computes `now - lag` in UTC and, for every producer class in
//! [`ProducerType::PROMOTION_ORDER`], inserts that hour's rows from the raw
//! table into the refined table. Statements run one at a time; the next is
//! only submitted once the previous one reached a terminal state.
//!
//! Running twice for the same hour inserts the rows twice.

use crate::{
    config::PromoterConfig,
    models::{
        partition::PartitionKey,
        producer::ProducerType,
        query::{JobHandle, Statement},
    },
    services::query_engine::{QueryEngine, QueryError, run_query},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Array columns of the raw web ACL table, flattened into strings joined by
/// this separator.
const ARRAY_SEPARATOR: &str = " eee ";

const WEB_ACL_COLUMNS: [(&str, bool); 16] = [
    ("timestamp", false),
    ("formatversion", false),
    ("webaclid", false),
    ("terminatingruleid", false),
    ("terminatingruletype", false),
    ("action", false),
    ("terminatingrulematchdetails", true),
    ("httpsourcename", false),
    ("httpsourceid", false),
    ("ratebasedrulelist", true),
    ("nonterminatingmatchingrules", true),
    ("httprequest", false),
    ("year", false),
    ("month", false),
    ("day", false),
    ("hour", false),
];

#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("transforming {producer} partition {partition} failed: {cause}")]
    Transformation {
        producer: ProducerType,
        partition: PartitionKey,
        /// Classes already inserted during this run; they are not rolled back.
        completed: Vec<ProducerType>,
        cause: QueryError,
    },
}

#[derive(Serialize, Debug)]
pub struct ClassPromotion {
    pub producer: ProducerType,
    pub source_table: String,
    pub target_table: String,
    pub execution_id: JobHandle,
    pub rows_affected: Option<u64>,
}

#[derive(Serialize, Debug)]
pub struct PromotionReport {
    pub partition: PartitionKey,
    pub executions: Vec<ClassPromotion>,
}

/// Select list for a class's insert. Web ACL rows carry array columns that
/// the refined table stores as delimited strings; the rest pass through.
fn projection(producer: ProducerType) -> String {
    match producer {
        ProducerType::WebAclLog => WEB_ACL_COLUMNS
            .iter()
            .map(|(column, is_array)| {
                if *is_array {
                    format!("array_join({column}, '{ARRAY_SEPARATOR}') AS {column}")
                } else {
                    column.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        ProducerType::EdgeLog | ProducerType::ApiGatewayLog => "*".to_string(),
    }
}

/// `INSERT INTO {db}.{refined} SELECT ... FROM {db}.{raw} WHERE year = ? ...`
/// with the partition values bound in `year, month, day, hour` order.
///
/// Table and namespace names come from validated configuration.
pub fn transformation_for(
    config: &PromoterConfig,
    producer: ProducerType,
    partition: &PartitionKey,
) -> Statement {
    let tables = config.tables(producer);
    let text = format!(
        "INSERT INTO {db}.{refined}\n\
         SELECT {projection}\n\
         FROM {db}.{raw}\n\
         WHERE year = ? AND month = ? AND day = ? AND hour = ?",
        db = config.database,
        refined = tables.refined,
        raw = tables.raw,
        projection = projection(producer),
    );
    let params = partition.values().iter().map(|v| v.to_string()).collect();
    Statement::new(text, params)
}

#[derive(Clone)]
pub struct PromoterService {
    engine: Arc<dyn QueryEngine>,
    config: Arc<PromoterConfig>,
}

impl PromoterService {
    pub fn new(engine: Arc<dyn QueryEngine>, config: PromoterConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }

    /// Promote the trailing window relative to the current wall clock.
    pub async fn promote(&self) -> Result<PromotionReport, PromoteError> {
        self.promote_at(Utc::now()).await
    }

    /// Promote the window ending `lag` before `now`.
    pub async fn promote_at(&self, now: DateTime<Utc>) -> Result<PromotionReport, PromoteError> {
        let partition = PartitionKey::trailing(now, self.config.lag);
        info!(partition = %partition, "transforming partition");

        let mut executions = Vec::with_capacity(ProducerType::PROMOTION_ORDER.len());
        for producer in ProducerType::PROMOTION_ORDER {
            let statement = transformation_for(&self.config, producer, &partition);
            let tables = self.config.tables(producer);

            match run_query(&*self.engine, &statement, self.config.poll_interval).await {
                Ok(execution) => {
                    info!(
                        class = %producer,
                        partition = %partition,
                        execution_id = %execution.handle,
                        "transformed: {}",
                        statement.text
                    );
                    executions.push(ClassPromotion {
                        producer,
                        source_table: format!("{}.{}", self.config.database, tables.raw),
                        target_table: format!("{}.{}", self.config.database, tables.refined),
                        execution_id: execution.handle,
                        rows_affected: execution.rows_affected,
                    });
                }
                Err(cause) => {
                    error!(class = %producer, partition = %partition, "transformation failed: {}", cause);
                    return Err(PromoteError::Transformation {
                        producer,
                        partition,
                        completed: executions.iter().map(|e| e.producer).collect(),
                        cause,
                    });
                }
            }
        }

        Ok(PromotionReport {
            partition,
            executions,
        })
    }
}
