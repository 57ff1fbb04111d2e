//! doitrack - persistent identifier and citation pipeline

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use doitrack_common::logging::{init_logging, LogConfig, LogLevel};
use doitrack_common::{CitationRecord, StatusCounts};
use doitrack_pipeline::config::PipelineConfig;
use doitrack_pipeline::registry::ElinkClient;
use doitrack_pipeline::store::{
    postgres, CitationStore, PgCitationStore, PgTargetStore, TargetStore,
};
use doitrack_pipeline::{MergeStage, Pipeline, PipelineStage};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "doitrack")]
#[command(author, version, about = "Persistent identifier and citation tracking pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up identifiers for pending records
    Validate {
        /// Requested batch size (effective limit is twice this)
        #[arg(long, allow_negative_numbers = true)]
        batch_size: Option<i64>,
    },

    /// Fetch citation text for records that have an identifier
    FetchCitations {
        /// Requested batch size (effective limit is twice this)
        #[arg(long, allow_negative_numbers = true)]
        batch_size: Option<i64>,
    },

    /// Copy ready citations into the target dataset
    Merge,

    /// Run validation, citation and merge once, in that order
    RunAll {
        /// Requested batch size for validation and citation
        #[arg(long, allow_negative_numbers = true)]
        batch_size: Option<i64>,
    },

    /// Run each stage on its own schedule until Ctrl-C
    Watch,

    /// Add pending citation requests for catalog keys
    Enqueue {
        /// Catalog keys, e.g. mp-149
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show record counts per status
    Status,

    /// Apply database migrations
    Migrate,
}

#[derive(Serialize)]
struct StatusOutput {
    #[serde(flatten)]
    counts: StatusCounts,
    total: u64,
    merged: u64,
}

#[derive(Serialize)]
struct EnqueueOutput {
    inserted: usize,
    existing: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // LOG_* environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("doitrack")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::load().context("Failed to load configuration")?;
    let pool = postgres::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Command::Migrate => {
            postgres::run_migrations(&pool).await?;
        },
        Command::Enqueue { keys } => {
            let output = enqueue(&pool, &keys).await?;
            print_json(&output)?;
        },
        Command::Status => {
            let counts = PgCitationStore::new(pool.clone()).status_counts().await?;
            let merged = PgTargetStore::new(pool).merged_count().await?;
            print_json(&StatusOutput {
                counts,
                total: counts.total(),
                merged,
            })?;
        },
        Command::Validate { batch_size } => {
            apply_batch_size(&mut config, batch_size);
            let pipeline = build_pipeline(&pool, &config)?;
            print_json(&pipeline.validation().run().await?)?;
        },
        Command::FetchCitations { batch_size } => {
            apply_batch_size(&mut config, batch_size);
            let pipeline = build_pipeline(&pool, &config)?;
            print_json(&pipeline.citation().run().await?)?;
        },
        Command::Merge => {
            print_json(&merge_stage(&pool).run().await?)?;
        },
        Command::RunAll { batch_size } => {
            apply_batch_size(&mut config, batch_size);
            let pipeline = build_pipeline(&pool, &config)?;
            print_json(&pipeline.run_all().await?)?;
        },
        Command::Watch => {
            let pipeline = build_pipeline(&pool, &config)?;
            info!("Starting scheduler, press Ctrl-C to stop");
            pipeline
                .into_scheduler(&config.schedule)
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                })
                .await;
        },
    }

    Ok(())
}

fn apply_batch_size(config: &mut PipelineConfig, batch_size: Option<i64>) {
    if let Some(requested) = batch_size {
        config.stage.batch_size = requested;
    }
}

fn build_pipeline(pool: &PgPool, config: &PipelineConfig) -> Result<Pipeline> {
    let registry =
        ElinkClient::new(config.registry.clone()).context("Failed to create registry client")?;

    Ok(Pipeline::new(
        Arc::new(PgCitationStore::new(pool.clone())),
        Arc::new(PgTargetStore::new(pool.clone())),
        Arc::new(registry),
        &config.stage,
    ))
}

/// The merge stage never talks to the registry, so it needs no credentials
fn merge_stage(pool: &PgPool) -> MergeStage {
    MergeStage::new(
        Arc::new(PgCitationStore::new(pool.clone())),
        Arc::new(PgTargetStore::new(pool.clone())),
    )
}

async fn enqueue(pool: &PgPool, keys: &[String]) -> Result<EnqueueOutput> {
    let store = PgCitationStore::new(pool.clone());
    let mut output = EnqueueOutput {
        inserted: 0,
        existing: 0,
    };

    for key in keys.iter().map(|k| k.trim()) {
        if key.is_empty() {
            warn!("Ignoring empty key");
            continue;
        }

        if store.insert(&CitationRecord::pending(key, Utc::now())).await? {
            info!(key = %key, "Enqueued");
            output.inserted += 1;
        } else {
            info!(key = %key, "Already tracked, left untouched");
            output.existing += 1;
        }
    }

    Ok(output)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use doitrack_pipeline::config::{
        DatabaseConfig, RegistryConfig, ScheduleConfig, StageConfig, DEFAULT_REGISTRY_CITATION_URL,
        DEFAULT_REGISTRY_LOOKUP_URL, DEFAULT_REGISTRY_TIMEOUT_SECS,
    };

    fn config_without_credentials() -> PipelineConfig {
        PipelineConfig {
            database: DatabaseConfig::default(),
            registry: RegistryConfig {
                lookup_url: DEFAULT_REGISTRY_LOOKUP_URL.to_string(),
                citation_url: DEFAULT_REGISTRY_CITATION_URL.to_string(),
                username: String::new(),
                password: String::new(),
                timeout_secs: DEFAULT_REGISTRY_TIMEOUT_SECS,
            },
            stage: StageConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn merge_runs_without_registry_credentials(pool: PgPool) {
        let config = config_without_credentials();
        assert!(build_pipeline(&pool, &config).is_err());

        let now = Utc::now();
        PgCitationStore::new(pool.clone())
            .insert(
                &CitationRecord::pending("mp-149", now)
                    .with_identifier("10.17188/1190959")
                    .with_citation_text("@misc{osti_1190959,\n title = {Si}\n}\n"),
            )
            .await
            .unwrap();
        sqlx::query("INSERT INTO target_records (key) VALUES ('mp-149')")
            .execute(&pool)
            .await
            .unwrap();

        let report = merge_stage(&pool).run().await.unwrap();
        assert_eq!(report.advanced, 1);

        let target = PgTargetStore::new(pool).get("mp-149").await.unwrap().unwrap();
        assert_eq!(target.merged_identifier.as_deref(), Some("10.17188/1190959"));
    }
}
