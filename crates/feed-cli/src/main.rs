use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use feed_cli::{build_pipeline, build_registry, destination_for, logging, run_pipelines, select_providers};
use feed_config::{AppConfig, ProviderCatalog};
use feed_core::RunOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const DEFAULT_PROVIDERS_FILE: &str = "providers.yaml";

#[derive(Parser)]
#[command(name = "feedsink", version)]
#[command(about = "Fetch provider feeds and write canonical records", long_about = None)]
struct Cli {
    /// Application config file (defaults to ./feedsink.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more providers
    Run {
        /// Providers file
        #[arg(long)]
        providers: Option<PathBuf>,

        /// Provider id, repeatable
        #[arg(short, long = "provider", conflicts_with = "all")]
        provider: Vec<String>,

        /// Run every configured provider
        #[arg(long)]
        all: bool,

        /// Only fetch changes since this instant (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_since)]
        since: Option<DateTime<Utc>>,

        #[arg(long)]
        max_pages: Option<u64>,

        #[arg(long)]
        max_records: Option<u64>,

        /// Destination file, or a directory when several providers run
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Extra template variable as key=value, repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Also write the run summaries to this file
        #[arg(long)]
        summary_file: Option<PathBuf>,
    },

    /// Validate a providers file
    Validate {
        #[arg(long)]
        providers: Option<PathBuf>,
    },

    /// List configured providers
    List {
        #[arg(long)]
        providers: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let app_config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&app_config.logging)?;

    match cli.command {
        Commands::Run {
            providers,
            provider,
            all,
            since,
            max_pages,
            max_records,
            output,
            vars,
            summary_file,
        } => {
            let catalog = load_catalog(providers.as_deref(), &app_config)?;
            let registry = build_registry();
            catalog.validate(&registry)?;

            let selected = select_providers(&catalog, &provider, all)?;
            let many = selected.len() > 1;
            let variables: BTreeMap<String, String> = vars.into_iter().collect();

            let mut pipelines = Vec::with_capacity(selected.len());
            for provider in selected {
                let options = RunOptions {
                    since: since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    max_pages,
                    max_records,
                    destination: destination_for(&provider, output.as_deref(), many),
                    variables: variables.clone(),
                };
                let id = provider.id.clone();
                let pipeline = build_pipeline(provider, &registry, &app_config.http, options)
                    .with_context(|| format!("Failed to build pipeline for '{}'", id))?;
                pipelines.push(pipeline);
            }

            info!("Starting {} run(s)", pipelines.len());
            let summaries = run_pipelines(pipelines, async {
                if tokio::signal::ctrl_c().await.is_err() {
                    // no signal handler available; never cancel
                    std::future::pending::<()>().await;
                }
            })
            .await?;

            let json = serde_json::to_string_pretty(&summaries)?;
            println!("{}", json);
            if let Some(path) = summary_file {
                std::fs::write(&path, &json)
                    .with_context(|| format!("Failed to write summary file {}", path.display()))?;
            }

            let failed = summaries.iter().filter(|s| !s.is_success()).count();
            for summary in &summaries {
                if summary.is_success() {
                    info!("{}", summary);
                } else {
                    error!("{}", summary);
                }
            }
            if failed > 0 {
                bail!("{} of {} run(s) failed", failed, summaries.len());
            }
        }

        Commands::Validate { providers } => {
            let catalog = load_catalog(providers.as_deref(), &app_config)?;
            let registry = build_registry();
            catalog.validate(&registry)?;

            println!("✓ {} provider(s) valid", catalog.list().len());
            for provider in catalog.list() {
                println!("  • {}", provider.id);
            }
        }

        Commands::List { providers } => {
            let catalog = load_catalog(providers.as_deref(), &app_config)?;

            println!("Providers: {}", catalog.list().len());
            for provider in catalog.list() {
                println!(
                    "  • {} ({}, {} pagination) -> {} {}",
                    provider.display_name(),
                    provider.input_format,
                    provider.pagination.kind(),
                    provider.sink.kind,
                    provider.sink.path
                );
            }
        }
    }

    Ok(())
}

fn load_catalog(path: Option<&Path>, app_config: &AppConfig) -> anyhow::Result<ProviderCatalog> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| app_config.providers_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROVIDERS_FILE));
    info!("Loading providers from {}", path.display());
    ProviderCatalog::load(&path)
}

fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("'{}' is neither RFC 3339 nor YYYY-MM-DD", value))
}

fn parse_var(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim().to_string(), val.to_string())),
        _ => Err(format!("expected key=value, got '{}'", value)),
    }
}
