use crate::models::producer::ProducerType;
use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::Parser;
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub warehouse_url: String,
    pub promoter: PromoterConfig,
    /// Seconds between scheduled promotions; `None` disables the scheduler.
    pub promote_interval: Option<Duration>,
    pub route_on_upload: bool,
    pub notify_batch_size: usize,
}

/// Raw and refined table names of one producer class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePair {
    pub raw: String,
    pub refined: String,
}

impl TablePair {
    pub fn defaults_for(producer: ProducerType) -> Self {
        Self {
            raw: format!("{}_partitioned_gz", producer.code()),
            refined: format!("{}_partitioned_parquet", producer.code()),
        }
    }
}

/// Everything the promoter needs, fixed at startup.
#[derive(Debug, Clone)]
pub struct PromoterConfig {
    /// Catalog namespace qualifying every table name.
    pub database: String,
    pub edge: TablePair,
    pub web_acl: TablePair,
    pub api_gateway: TablePair,
    /// How far behind the wall clock the promoted hour lies.
    pub lag: TimeDelta,
    /// Delay between execution status polls.
    pub poll_interval: Duration,
}

impl Default for PromoterConfig {
    fn default() -> Self {
        Self {
            database: "main".into(),
            edge: TablePair::defaults_for(ProducerType::EdgeLog),
            web_acl: TablePair::defaults_for(ProducerType::WebAclLog),
            api_gateway: TablePair::defaults_for(ProducerType::ApiGatewayLog),
            lag: TimeDelta::hours(2),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl PromoterConfig {
    pub fn tables(&self, producer: ProducerType) -> &TablePair {
        match producer {
            ProducerType::EdgeLog => &self.edge,
            ProducerType::WebAclLog => &self.web_acl,
            ProducerType::ApiGatewayLog => &self.api_gateway,
        }
    }

    /// Every name interpolated into statements must be a plain identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("database", &self.database)?;
        for producer in ProducerType::PROMOTION_ORDER {
            let tables = self.tables(producer);
            validate_identifier(&format!("{producer} raw table"), &tables.raw)?;
            validate_identifier(&format!("{producer} refined table"), &tables.refined)?;
        }
        self.validate_distinct_tables()?;
        if self.lag < TimeDelta::zero() {
            return Err(ConfigError::NegativeLag);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    /// Each class reads and writes its own tables, and never inserts into
    /// the table it selects from.
    fn validate_distinct_tables(&self) -> Result<(), ConfigError> {
        let classes = ProducerType::PROMOTION_ORDER;
        for (i, producer) in classes.iter().enumerate() {
            let tables = self.tables(*producer);
            if tables.raw == tables.refined {
                return Err(ConfigError::SharedTable {
                    table: tables.raw.clone(),
                    first: *producer,
                    second: *producer,
                });
            }
            for other in &classes[i + 1..] {
                let other_tables = self.tables(*other);
                let shared = [&tables.raw, &tables.refined]
                    .into_iter()
                    .find(|t| **t == other_tables.raw || **t == other_tables.refined);
                if let Some(table) = shared {
                    return Err(ConfigError::SharedTable {
                        table: table.clone(),
                        first: *producer,
                        second: *other,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} `{value}` is not a valid identifier")]
    InvalidIdentifier { field: String, value: String },
    #[error("lag must not be negative")]
    NegativeLag,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("table `{table}` is used by both {first} and {second}")]
    SharedTable {
        table: String,
        first: ProducerType,
        second: ProducerType,
    },
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Access-log partitioner and partition promoter")]
pub struct Args {
    /// Host to bind to (overrides LOG_PARTITIONER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LOG_PARTITIONER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides LOG_PARTITIONER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Object metadata database URL (overrides LOG_PARTITIONER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Warehouse database URL holding the raw and refined tables
    /// (overrides LOG_PARTITIONER_WAREHOUSE_URL)
    #[arg(long)]
    pub warehouse_url: Option<String>,

    /// Namespace qualifying table names (overrides LOG_PARTITIONER_DATABASE)
    #[arg(long)]
    pub database: Option<String>,

    #[arg(long)]
    pub cf_raw_table: Option<String>,
    #[arg(long)]
    pub cf_refined_table: Option<String>,
    #[arg(long)]
    pub waf_raw_table: Option<String>,
    #[arg(long)]
    pub waf_refined_table: Option<String>,
    #[arg(long)]
    pub apig_raw_table: Option<String>,
    #[arg(long)]
    pub apig_refined_table: Option<String>,

    /// Minutes between the wall clock and the promoted hour (overrides LOG_PARTITIONER_LAG_MINUTES)
    #[arg(long)]
    pub lag_minutes: Option<i64>,

    /// Milliseconds between query status polls (overrides LOG_PARTITIONER_POLL_INTERVAL_MS)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Seconds between scheduled promotions, 0 disables (overrides LOG_PARTITIONER_PROMOTE_INTERVAL_SECS)
    #[arg(long)]
    pub promote_interval_secs: Option<u64>,

    /// Do not route objects uploaded through the HTTP API
    #[arg(long)]
    pub no_route_on_upload: bool,

    /// Maximum objects per routed notification batch (overrides LOG_PARTITIONER_NOTIFY_BATCH_SIZE)
    #[arg(long)]
    pub notify_batch_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Parse `name` from the environment, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_string(name: &str, default: impl Into<String>) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over environment variables over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let table = |flag: Option<String>, var: &str, default: String| {
            flag.unwrap_or_else(|| env_string(var, default))
        };
        let pair = |producer: ProducerType,
                    raw: Option<String>,
                    refined: Option<String>| {
            let code = producer.code().to_ascii_uppercase();
            let defaults = TablePair::defaults_for(producer);
            TablePair {
                raw: table(raw, &format!("LOG_PARTITIONER_{code}_RAW_TABLE"), defaults.raw),
                refined: table(
                    refined,
                    &format!("LOG_PARTITIONER_{code}_REFINED_TABLE"),
                    defaults.refined,
                ),
            }
        };

        let lag_minutes = match args.lag_minutes {
            Some(minutes) => minutes,
            None => env_or("LOG_PARTITIONER_LAG_MINUTES", 120)?,
        };
        let poll_interval_ms = match args.poll_interval_ms {
            Some(ms) => ms,
            None => env_or("LOG_PARTITIONER_POLL_INTERVAL_MS", 1000)?,
        };

        let promoter = PromoterConfig {
            database: args
                .database
                .unwrap_or_else(|| env_string("LOG_PARTITIONER_DATABASE", "main")),
            edge: pair(ProducerType::EdgeLog, args.cf_raw_table, args.cf_refined_table),
            web_acl: pair(
                ProducerType::WebAclLog,
                args.waf_raw_table,
                args.waf_refined_table,
            ),
            api_gateway: pair(
                ProducerType::ApiGatewayLog,
                args.apig_raw_table,
                args.apig_refined_table,
            ),
            lag: TimeDelta::minutes(lag_minutes),
            poll_interval: Duration::from_millis(poll_interval_ms),
        };
        promoter.validate()?;

        let promote_interval_secs = match args.promote_interval_secs {
            Some(secs) => secs,
            None => env_or("LOG_PARTITIONER_PROMOTE_INTERVAL_SECS", 3600)?,
        };
        let route_on_upload =
            !args.no_route_on_upload && env_or("LOG_PARTITIONER_ROUTE_ON_UPLOAD", true)?;
        let notify_batch_size = match args.notify_batch_size {
            Some(size) => size,
            None => env_or("LOG_PARTITIONER_NOTIFY_BATCH_SIZE", 100)?,
        }
        .max(1);

        Ok(Self {
            host: args
                .host
                .unwrap_or_else(|| env_string("LOG_PARTITIONER_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_or("LOG_PARTITIONER_PORT", 3000)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_string("LOG_PARTITIONER_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_string(
                    "LOG_PARTITIONER_DATABASE_URL",
                    "sqlite://./data/meta/log_partitioner.db",
                )
            }),
            warehouse_url: args.warehouse_url.unwrap_or_else(|| {
                env_string(
                    "LOG_PARTITIONER_WAREHOUSE_URL",
                    "sqlite://./data/warehouse/warehouse.db",
                )
            }),
            promoter,
            promote_interval: (promote_interval_secs > 0)
                .then(|| Duration::from_secs(promote_interval_secs)),
            route_on_upload,
            notify_batch_size,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
