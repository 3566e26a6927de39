use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use churn_service::api::{self, AppState};
use churn_service::classifier::{predict_one, ModelArtifact};
use churn_service::config::{parse_bind_addr, Config};
use churn_service::dataset::{Dataset, DatasetSource};
use churn_service::models::{ChurnLabel, FeatureColumn};
use churn_service::{aggregate, report};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "churn-service")]
#[command(about = "Churn prediction API over a static customer dataset", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Customer CSV (overrides CHURN_DATA_PATH)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Serialized classifier (overrides CHURN_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on (overrides CHURN_BIND_ADDR)
        #[arg(long)]
        bind: Option<String>,
        /// Re-read the CSV on every request
        #[arg(long)]
        reload_data: bool,
    },
    /// Print churn probability grouped by one column
    Summary {
        /// age, gender, subscription (or subscription_type), or region
        #[arg(long, value_parser = parse_dimension)]
        by: FeatureColumn,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Predict churn for one customer in the dataset
    Predict {
        #[arg(long)]
        id: String,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(data) = cli.data {
        config.data_path = data;
    }
    if let Some(model) = cli.model {
        config.model_path = model;
    }

    let classifier = ModelArtifact::from_path(&config.model_path).with_context(|| {
        format!("failed to load model from {}", config.model_path.display())
    })?;

    match cli.command {
        Commands::Serve { bind, reload_data } => {
            if let Some(bind) = bind {
                config.bind_addr = parse_bind_addr(&bind)?;
            }
            let reload = reload_data || config.reload_data;
            let source = DatasetSource::open(config.data_path.clone(), reload).with_context(|| {
                format!("failed to load dataset from {}", config.data_path.display())
            })?;
            let state = AppState::new(Arc::new(classifier), source);
            api::serve(state, config.bind_addr, &config.allowed_origins).await?;
        }
        Commands::Summary { by: dimension, limit } => {
            let table = load_dataset(&config)?.feature_table()?;
            let summary = aggregate::summarize(&classifier, &table, dimension)?;

            if summary.groups.is_empty() {
                println!("No customers found in {}.", config.data_path.display());
                return Ok(());
            }

            println!(
                "Churn probability by {} across {} customers:",
                dimension, summary.total_users
            );
            for group in report::rank_by_churn(&summary).into_iter().take(limit) {
                println!(
                    "- {}: {:.2}% churn / {:.2}% retain ({} customers)",
                    group.key,
                    group.churn_probability,
                    group.not_churn_probability,
                    group.users_count
                );
            }
        }
        Commands::Predict { id } => {
            let dataset = load_dataset(&config)?;
            let (_, features) = dataset
                .find_with_features(&id)?
                .with_context(|| format!("no customer with public_id '{id}'"))?;
            let prediction = predict_one(&classifier, &features)?;

            println!(
                "{} ({}, {}, {}): {} with {:.2}% churn probability",
                id,
                features.gender,
                features.subscription_type,
                features.region,
                if prediction.prediction == ChurnLabel::Churn {
                    "likely to churn"
                } else {
                    "likely to stay"
                },
                aggregate::to_percent(prediction.probabilities.churn)
            );
        }
        Commands::Report { out } => {
            let table = load_dataset(&config)?.feature_table()?;
            let summaries = FeatureColumn::DIMENSIONS
                .into_iter()
                .map(|dimension| aggregate::summarize(&classifier, &table, dimension))
                .collect::<Result<Vec<_>, _>>()?;
            let markdown = report::build_report(
                &config.data_path.display().to_string(),
                Utc::now(),
                &summaries,
            );
            std::fs::write(&out, markdown)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Grouping dimensions the summary and `/probability` routes accept.
fn parse_dimension(raw: &str) -> Result<FeatureColumn, String> {
    FeatureColumn::from_dimension(raw)
        .ok()
        .filter(|column| FeatureColumn::DIMENSIONS.contains(column))
        .ok_or_else(|| format!("'{raw}' is not one of age, gender, subscription, region"))
}

fn load_dataset(config: &Config) -> anyhow::Result<Dataset> {
    Dataset::from_path(&config.data_path)
        .with_context(|| format!("failed to load dataset from {}", config.data_path.display()))
}
