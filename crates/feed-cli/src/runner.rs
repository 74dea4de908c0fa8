use anyhow::{bail, Context};
use feed_config::{HttpSettings, ProviderCatalog};
use feed_core::{Pipeline, PipelineRunSummary, ProviderConfig, Registry, RunOptions, RunOrchestrator};
use feed_csv_destination::CsvSinkFactory;
use feed_http_connector::HttpFetcher;
use feed_json_extractor::JsonExtractor;
use feed_ndjson_destination::NdjsonSinkFactory;
use feed_xml_extractor::XmlExtractor;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry with every extractor and sink shipped in this workspace
pub fn build_registry() -> Registry {
    let mut registry = Registry::new();

    registry.register_extractor(Arc::new(JsonExtractor::new()));
    registry.register_extractor(Arc::new(XmlExtractor::new()));

    registry.register_sink(Arc::new(NdjsonSinkFactory));
    registry.register_sink(Arc::new(CsvSinkFactory));

    debug!("Available input formats: {:?}", registry.list_formats());
    debug!("Available sinks: {:?}", registry.list_sinks());
    registry
}

/// Wire a provider to an HTTP fetcher using its own retry policy
pub fn build_pipeline(
    provider: ProviderConfig,
    registry: &Registry,
    http: &HttpSettings,
    options: RunOptions,
) -> feed_core::Result<Pipeline> {
    let fetcher = HttpFetcher::with_settings(http, provider.retry.clone())?;
    Pipeline::from_config(provider, registry, Box::new(fetcher), options)
}

/// Providers to run, in request order and without repeats
pub fn select_providers(
    catalog: &ProviderCatalog,
    ids: &[String],
    all: bool,
) -> anyhow::Result<Vec<ProviderConfig>> {
    if all {
        return Ok(catalog.list().to_vec());
    }
    if ids.is_empty() {
        bail!("No provider selected, pass --provider <id> or --all");
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        let provider = catalog.resolve(id).with_context(|| {
            format!(
                "Provider '{}' not found and no 'default' provider is configured (known: {})",
                id,
                catalog.ids().join(", ")
            )
        })?;
        selected.push(provider);
    }
    Ok(selected)
}

/// Destination override for one provider.
///
/// With a single provider `output` is the file itself; with several it is a
/// directory holding `<id>.<sink type>` per provider.
pub fn destination_for(provider: &ProviderConfig, output: Option<&Path>, many: bool) -> Option<PathBuf> {
    let output = output?;
    if many {
        Some(output.join(format!("{}.{}", provider.id, provider.sink.kind)))
    } else {
        Some(output.to_path_buf())
    }
}

/// Run pipelines concurrently until all finish; `shutdown` resolving cancels them.
///
/// Fails before starting when two pipelines share a destination.
/// Summaries are ordered by provider id.
pub async fn run_pipelines<F>(pipelines: Vec<Pipeline>, shutdown: F) -> anyhow::Result<Vec<PipelineRunSummary>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let mut writers: HashMap<&str, &str> = HashMap::new();
    for pipeline in &pipelines {
        if let Some(other) = writers.insert(pipeline.destination(), pipeline.provider_id()) {
            bail!(
                "Providers '{}' and '{}' would both write to {}",
                other,
                pipeline.provider_id(),
                pipeline.destination()
            );
        }
    }

    let orchestrator = Arc::new(RunOrchestrator::new());
    for pipeline in pipelines {
        orchestrator.add_run(pipeline).await?;
    }

    let watcher = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            shutdown.await;
            warn!("Shutdown requested, cancelling {} run(s)", orchestrator.list_runs().await.len());
            orchestrator.cancel_all();
        })
    };

    let summaries = orchestrator.wait_all().await;
    watcher.abort();
    Ok(summaries)
}
