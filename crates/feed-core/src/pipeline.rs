use crate::{
    capture_response_fields, extract_page, first_token, render_str, resolve_link,
    validate_response_field, CanonicalRecord, Error, Extractor, Fetcher, FieldMapper, PageToken,
    PipelineRunSummary, ProviderConfig, Registry, RequestTemplate, Result, RunError, RunState,
    Sink, SinkTarget, Variables,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// States of one pipeline run
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Extracting,
    Mapping,
    Emitting,
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Extracting => "extracting",
            PipelineState::Mapping => "mapping",
            PipelineState::Emitting => "emitting",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-invocation parameters of a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub since: DateTime<Utc>,
    /// Overrides the provider's page limit
    pub max_pages: Option<u64>,
    /// Overrides the provider's record limit
    pub max_records: Option<u64>,
    /// Overrides the sink path of the provider
    pub destination: Option<PathBuf>,
    /// Extra template variables; `since`, `since_date` and `provider_id` cannot be shadowed
    pub variables: BTreeMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            since: DateTime::<Utc>::UNIX_EPOCH,
            max_pages: None,
            max_records: None,
            destination: None,
            variables: BTreeMap::new(),
        }
    }
}

/// Mutable bookkeeping of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub provider_id: String,
    pub since: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub token: Option<PageToken>,
    pub pages_fetched: u64,
    pub records_extracted: u64,
    pub records_emitted: u64,
    pub records_rejected: u64,
    pub retries: u64,
    pub error: Option<RunError>,
    pub response_fields: Map<String, Value>,
    /// First record handed to the sink
    pub sample: Option<CanonicalRecord>,
}

impl RunContext {
    pub fn new(provider_id: impl Into<String>, since: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            since,
            started_at: Utc::now(),
            token: None,
            pages_fetched: 0,
            records_extracted: 0,
            records_emitted: 0,
            records_rejected: 0,
            retries: 0,
            error: None,
            response_fields: Map::new(),
            sample: None,
        }
    }

    fn into_summary(self, state: RunState, duration_ms: u64, destination: String) -> PipelineRunSummary {
        PipelineRunSummary {
            run_id: self.run_id,
            provider_id: self.provider_id,
            state,
            pages_fetched: self.pages_fetched,
            records_extracted: self.records_extracted,
            records_emitted: self.records_emitted,
            records_rejected: self.records_rejected,
            retries: self.retries,
            error: self.error,
            started_at: self.started_at,
            duration_ms,
            destination: Some(destination),
            response_fields: self.response_fields,
            sample: self.sample,
        }
    }
}

/// One provider run: fetch, extract, map and emit page by page
pub struct Pipeline {
    provider: ProviderConfig,
    template: RequestTemplate,
    fetcher: Box<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    mapper: FieldMapper,
    sink: Box<dyn Sink>,
    destination: String,
    options: RunOptions,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(
        provider: ProviderConfig,
        fetcher: Box<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        sink: Box<dyn Sink>,
        options: RunOptions,
    ) -> Self {
        let destination = sink_path(&provider, &options)
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| provider.sink.path.clone());
        let (state, _) = watch::channel(PipelineState::Idle);

        Self {
            template: RequestTemplate::from_provider(&provider),
            mapper: FieldMapper::new(provider.mapping.clone()),
            provider,
            fetcher,
            extractor,
            sink,
            destination,
            options,
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// Create a pipeline from a provider configuration using the registry
    pub fn from_config(
        provider: ProviderConfig,
        registry: &Registry,
        fetcher: Box<dyn Fetcher>,
        options: RunOptions,
    ) -> Result<Self> {
        info!("Creating pipeline for provider '{}'", provider.id);

        let extractor = registry.get_extractor(provider.input_format)?;
        extractor.validate_expression(&provider.extract)?;
        if let Some(path) = provider.pagination.token_path() {
            extractor.validate_expression(path)?;
        }
        for field in &provider.response.fields {
            validate_response_field(field, extractor.as_ref())?;
        }

        let path = sink_path(&provider, &options)?;
        let target = SinkTarget::new(path, provider.sink.mode).with_columns(provider.target_fields());
        let sink = registry.get_sink_factory(&provider.sink.kind)?.create(target)?;

        Ok(Self::new(provider, fetcher, extractor, sink, options))
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn provider_id(&self) -> &str {
        &self.provider.id
    }

    /// Path the sink writes to
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Observe state transitions while the run is in flight
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Run the pipeline to a terminal state.
    ///
    /// The sink is closed on every path, a failure is reported in the summary.
    pub async fn run(mut self) -> PipelineRunSummary {
        let started = Instant::now();
        let mut ctx = RunContext::new(self.provider.id.clone(), self.options.since);
        info!(
            "[{}] Starting run {} (since {}, sink {} at {})",
            ctx.provider_id, ctx.run_id, ctx.since, self.provider.sink.kind, self.destination
        );

        let outcome = match self.sink.open().await {
            Ok(()) => self.drive(&mut ctx).await,
            Err(e) => Err(e),
        };

        self.transition(PipelineState::Draining);
        let outcome = match (outcome, self.sink.close().await) {
            (Err(e), Err(close_err)) => {
                error!("[{}] Failed to close sink: {}", ctx.provider_id, close_err);
                Err(e)
            }
            (Ok(()), Err(close_err)) => Err(close_err),
            (outcome, Ok(())) => outcome,
        };

        let state = match outcome {
            Ok(()) => {
                self.transition(PipelineState::Done);
                RunState::Done
            }
            Err(e) => {
                error!(
                    "[{}] Run failed after {} records: {}",
                    ctx.provider_id, ctx.records_emitted, e
                );
                ctx.error = Some(RunError::from(&e));
                self.transition(PipelineState::Failed);
                RunState::Failed
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = ctx.into_summary(state, duration_ms, self.destination);
        info!("{}", summary);
        summary
    }

    async fn drive(&mut self, ctx: &mut RunContext) -> Result<()> {
        let vars = run_variables(&self.provider.id, &self.options);
        let max_pages = self.options.max_pages.or(self.provider.limits.max_pages);
        let max_records = self.options.max_records.or(self.provider.limits.max_records);
        ctx.token = first_token(&self.provider.pagination);

        loop {
            if self.cancel.is_cancelled() {
                info!("[{}] Cancelled after {} pages", ctx.provider_id, ctx.pages_fetched);
                return Err(Error::Cancelled);
            }

            self.transition(PipelineState::Fetching);
            let request = self.template.render(&vars, ctx.token.as_ref())?;
            debug!(
                "[{}] Fetching page {}: {} {}",
                ctx.provider_id,
                ctx.pages_fetched + 1,
                request.method,
                request.url
            );
            let result = tokio::select! {
                biased;
                result = self.fetcher.fetch(&request) => result,
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            };
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    ctx.retries += u64::from(e.attempts.saturating_sub(1));
                    return Err(e.into());
                }
            };
            ctx.pages_fetched += 1;
            ctx.retries += u64::from(response.retries());

            self.transition(PipelineState::Extracting);
            let (records, next) = extract_page(
                self.extractor.as_ref(),
                &response,
                &self.provider.extract,
                &self.provider.pagination,
                ctx.token.as_ref(),
            )?;
            if ctx.pages_fetched == 1 && !self.provider.response.fields.is_empty() {
                ctx.response_fields = capture_response_fields(
                    &self.provider.response.fields,
                    &response,
                    self.extractor.as_ref(),
                )?;
            }
            debug!(
                "[{}] Page {} yielded {} records",
                ctx.provider_id,
                ctx.pages_fetched,
                records.len()
            );

            self.transition(PipelineState::Mapping);
            let room = max_records.map(|max| max.saturating_sub(ctx.records_emitted));
            let mut batch = Vec::with_capacity(records.len());
            let mut record_limit_hit = false;
            for raw in &records {
                if room.is_some_and(|room| batch.len() as u64 >= room) {
                    record_limit_hit = true;
                    break;
                }
                ctx.records_extracted += 1;
                match self.mapper.map(raw) {
                    Ok(record) => batch.push(record),
                    Err(e) => {
                        ctx.records_rejected += 1;
                        warn!("[{}] Rejected record: {}", ctx.provider_id, e);
                    }
                }
            }

            self.transition(PipelineState::Emitting);
            for record in &batch {
                self.sink.write(record).await?;
                ctx.records_emitted += 1;
                if ctx.sample.is_none() {
                    ctx.sample = Some(record.clone());
                }
            }

            if record_limit_hit || room.is_some_and(|room| batch.len() as u64 >= room) {
                info!("[{}] Record limit reached", ctx.provider_id);
                return Ok(());
            }
            if max_pages.is_some_and(|max| ctx.pages_fetched >= max) {
                info!("[{}] Page limit of {} reached", ctx.provider_id, ctx.pages_fetched);
                return Ok(());
            }

            // relative links resolve against the page that returned them
            let next = match next {
                Some(PageToken::Link(link)) => Some(PageToken::Link(resolve_link(&request.url, &link)?)),
                other => other,
            };
            match next {
                Some(next) if ctx.token.as_ref() == Some(&next) => {
                    warn!(
                        "[{}] Provider returned the same page token '{}' twice, stopping",
                        ctx.provider_id, next
                    );
                    return Ok(());
                }
                Some(next) => ctx.token = Some(next),
                None => return Ok(()),
            }
        }
    }

    fn transition(&self, next: PipelineState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("[{}] {} -> {}", self.provider.id, previous, next);
        }
    }
}

/// Base variables of a run plus the caller's extras, which never shadow them
fn run_variables(provider_id: &str, options: &RunOptions) -> Variables {
    let mut vars = Variables::for_run(provider_id, options.since);
    for (name, value) in &options.variables {
        if vars.get(name).is_none() {
            vars.insert(name.clone(), value.clone());
        }
    }
    vars
}

/// Destination override, or the provider's sink path rendered with the run variables
fn sink_path(provider: &ProviderConfig, options: &RunOptions) -> Result<PathBuf> {
    match &options.destination {
        Some(path) => Ok(path.clone()),
        None => {
            let vars = run_variables(&provider.id, options);
            Ok(PathBuf::from(render_str(&provider.sink.path, &vars)?))
        }
    }
}
