use crate::{CanonicalRecord, Error, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Terminal state of a pipeline run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Done,
    Failed,
}

/// First fatal error of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for RunError {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub provider_id: String,
    pub state: RunState,
    pub pages_fetched: u64,
    pub records_extracted: u64,
    pub records_emitted: u64,
    pub records_rejected: u64,
    pub retries: u64,
    pub error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Values captured from the first response page
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub response_fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<CanonicalRecord>,
}

impl PipelineRunSummary {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    /// Summary for a run whose task ended without reporting, e.g. after a panic
    pub fn aborted(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            state: RunState::Failed,
            pages_fetched: 0,
            records_extracted: 0,
            records_emitted: 0,
            records_rejected: 0,
            retries: 0,
            error: Some(RunError {
                kind: ErrorKind::Cancelled,
                message: message.into(),
            }),
            started_at: Utc::now(),
            duration_ms: 0,
            destination: None,
            response_fields: Map::new(),
            sample: None,
        }
    }
}

impl fmt::Display for PipelineRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.state, &self.error) {
            (RunState::Failed, Some(error)) => write!(
                f,
                "[{}] terminated early due to {}, {} records emitted before failure: {}",
                self.provider_id, error.kind, self.records_emitted, error.message
            ),
            (RunState::Failed, None) => write!(
                f,
                "[{}] terminated early, {} records emitted before failure",
                self.provider_id, self.records_emitted
            ),
            (RunState::Done, _) => write!(
                f,
                "[{}] completed with {} rejected, {} records emitted from {} pages",
                self.provider_id, self.records_rejected, self.records_emitted, self.pages_fetched
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(state: RunState, error: Option<RunError>) -> PipelineRunSummary {
        PipelineRunSummary {
            run_id: Uuid::new_v4(),
            provider_id: "listings".to_string(),
            state,
            pages_fetched: 3,
            records_extracted: 10,
            records_emitted: 8,
            records_rejected: 2,
            retries: 1,
            error,
            started_at: Utc::now(),
            duration_ms: 12,
            destination: None,
            response_fields: Map::new(),
            sample: None,
        }
    }

    #[test]
    fn test_display_distinguishes_outcomes() {
        let done = summary(RunState::Done, None);
        assert!(done.is_success());
        assert_eq!(
            done.to_string(),
            "[listings] completed with 2 rejected, 8 records emitted from 3 pages"
        );

        let error = RunError::from(&Error::Extraction("bad body".to_string()));
        let failed = summary(RunState::Failed, Some(error));
        assert!(!failed.is_success());
        assert!(failed
            .to_string()
            .starts_with("[listings] terminated early due to extraction error, 8 records emitted"));
    }

    #[test]
    fn test_serializes_snake_case_state_and_kind() {
        let failed = summary(
            RunState::Failed,
            Some(RunError {
                kind: ErrorKind::Fetch,
                message: "boom".to_string(),
            }),
        );
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["state"], "failed");
        assert_eq!(value["error"]["kind"], "fetch");
        assert!(value.get("destination").is_none());
        assert!(value.get("response_fields").is_none());
        assert!(value.get("sample").is_none());
    }
}
