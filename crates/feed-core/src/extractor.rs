use crate::{InputFormat, RawRecord, Result};
use serde_json::Value;

/// Output of one extraction pass over a response body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub records: Vec<RawRecord>,
    /// Value found at the pagination token path, if one was requested
    pub body_token: Option<String>,
}

/// Trait for format-specific record extractors
pub trait Extractor: Send + Sync {
    /// Input format handled by this extractor
    fn format(&self) -> InputFormat;

    /// Fails fast on an expression that can never be evaluated
    fn validate_expression(&self, expression: &str) -> Result<()>;

    /// Evaluate `expression` against `body` and read `token_path` when given.
    ///
    /// A malformed body or an expression that does not fit the document
    /// yields `Error::Extraction`.
    fn extract(&self, body: &[u8], expression: &str, token_path: Option<&str>)
        -> Result<ExtractedPage>;

    /// Evaluate `expression` to a single value: nothing is null, one match
    /// is the value itself, several become an array
    fn query(&self, body: &[u8], expression: &str) -> Result<Value> {
        let mut records = self.extract(body, expression, None)?.records;
        Ok(match records.len() {
            0 => Value::Null,
            1 => records.remove(0),
            _ => Value::Array(records),
        })
    }
}
