use crate::{Error, Pipeline, PipelineRunSummary, PipelineState, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Handle of a spawned pipeline run
pub struct RunHandle {
    pub provider_id: String,
    pub cancel: CancellationToken,
    pub task: JoinHandle<PipelineRunSummary>,
    pub state: watch::Receiver<PipelineState>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunStatus {
    pub provider_id: String,
    pub state: PipelineState,
}

/// Runs several provider pipelines concurrently in one process
pub struct RunOrchestrator {
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    shutdown: CancellationToken,
}

impl RunOrchestrator {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn a pipeline; at most one run per provider id at a time
    pub async fn add_run(&self, pipeline: Pipeline) -> Result<()> {
        let provider_id = pipeline.provider_id().to_string();

        let mut runs = self.runs.lock().await;
        if runs.contains_key(&provider_id) {
            return Err(Error::Configuration(format!(
                "A run for provider '{}' is already registered",
                provider_id
            )));
        }

        let cancel = self.shutdown.child_token();
        let pipeline = pipeline.with_cancellation(cancel.clone());
        let state = pipeline.subscribe();
        let task = tokio::spawn(pipeline.run());

        runs.insert(
            provider_id.clone(),
            RunHandle {
                provider_id: provider_id.clone(),
                cancel,
                task,
                state,
            },
        );
        info!("Run for provider '{}' started", provider_id);
        Ok(())
    }

    /// Request cancellation of every run, including ones added later
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    pub async fn list_runs(&self) -> Vec<RunStatus> {
        let runs = self.runs.lock().await;
        let mut statuses: Vec<RunStatus> = runs
            .values()
            .map(|handle| RunStatus {
                provider_id: handle.provider_id.clone(),
                state: *handle.state.borrow(),
            })
            .collect();
        statuses.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        statuses
    }

    /// Wait for every registered run and collect the summaries, ordered by provider id
    pub async fn wait_all(&self) -> Vec<PipelineRunSummary> {
        let handles: Vec<RunHandle> = {
            let mut runs = self.runs.lock().await;
            runs.drain().map(|(_, handle)| handle).collect()
        };

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.task.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!("Run for provider '{}' aborted: {}", handle.provider_id, e);
                    summaries.push(PipelineRunSummary::aborted(
                        handle.provider_id,
                        format!("run task aborted: {}", e),
                    ));
                }
            }
        }
        summaries.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        summaries
    }
}

impl Default for RunOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CanonicalRecord, ErrorKind, ExtractedPage, Extractor, FetchError, FetchResult, Fetcher,
        InputFormat, ProviderConfig, ResolvedRequest, RunOptions, RunState, Sink, SinkStatus,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct SlowFetcher {
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _request: &ResolvedRequest) -> std::result::Result<FetchResult, FetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(FetchResult {
                status: 200,
                headers: BTreeMap::new(),
                body: b"[]".to_vec(),
                elapsed: self.delay,
                attempts: 1,
            })
        }
    }

    struct OneRecordPerPage;

    impl Extractor for OneRecordPerPage {
        fn format(&self) -> InputFormat {
            InputFormat::Json
        }

        fn validate_expression(&self, _expression: &str) -> Result<()> {
            Ok(())
        }

        fn extract(&self, _body: &[u8], _expression: &str, _token_path: Option<&str>) -> Result<ExtractedPage> {
            Ok(ExtractedPage {
                records: vec![json!({"id": 1})],
                body_token: None,
            })
        }
    }

    struct NullSink;

    #[async_trait]
    impl Sink for NullSink {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn write(&mut self, _record: &CanonicalRecord) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn status(&self) -> SinkStatus {
            SinkStatus::default()
        }
    }

    fn pipeline(id: &str, pagination: serde_json::Value, delay: Duration) -> Pipeline {
        let provider: ProviderConfig = serde_json::from_value(json!({
            "id": id,
            "input_format": "json",
            "request": {"url": "https://example.com/feed"},
            "pagination": pagination,
            "extract": "@",
            "mapping": [{"source": "id", "target": "id"}],
            "sink": {"type": "null", "path": "/dev/null"}
        }))
        .unwrap();
        Pipeline::new(
            provider,
            Box::new(SlowFetcher { delay }),
            Arc::new(OneRecordPerPage),
            Box::new(NullSink),
            RunOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_runs_complete_concurrently() {
        let orchestrator = RunOrchestrator::new();
        orchestrator
            .add_run(pipeline("b", json!({"type": "none"}), Duration::from_millis(5)))
            .await
            .unwrap();
        orchestrator
            .add_run(pipeline("a", json!({"type": "none"}), Duration::from_millis(5)))
            .await
            .unwrap();

        let summaries = orchestrator.wait_all().await;
        let ids: Vec<&str> = summaries.iter().map(|s| s.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(summaries.iter().all(|s| s.state == RunState::Done && s.records_emitted == 1));
        assert!(orchestrator.list_runs().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_provider_is_rejected() {
        let orchestrator = RunOrchestrator::new();
        orchestrator
            .add_run(pipeline("a", json!({"type": "none"}), Duration::from_millis(5)))
            .await
            .unwrap();
        let err = orchestrator
            .add_run(pipeline("a", json!({"type": "none"}), Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        orchestrator.wait_all().await;
    }

    #[tokio::test]
    async fn test_cancel_all_stops_endless_pagination() {
        let orchestrator = RunOrchestrator::new();
        // page pagination without a page size never runs out on its own
        let endless = json!({"type": "page", "param": "page"});
        orchestrator
            .add_run(pipeline("endless", endless, Duration::from_millis(10)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(orchestrator.list_runs().await.len(), 1);
        orchestrator.cancel_all();

        let summaries = orchestrator.wait_all().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].state, RunState::Failed);
        assert_eq!(summaries[0].error.as_ref().map(|e| e.kind), Some(ErrorKind::Cancelled));
        assert_eq!(summaries[0].records_emitted, summaries[0].pages_fetched);
    }
}
