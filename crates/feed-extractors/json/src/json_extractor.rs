use feed_core::{Error, ExtractedPage, Extractor, InputFormat, RawRecord, Result};
use jmespath::Expression;
use serde_json::Value;
use tracing::debug;

/// Extracts records from JSON bodies with JMESPath expressions
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl JsonExtractor {
    pub fn new() -> Self {
        Self
    }

    fn compile(expression: &str) -> Result<Expression<'static>> {
        jmespath::compile(expression).map_err(|e| {
            Error::Extraction(format!("invalid JMESPath expression '{}': {}", expression, e))
        })
    }

    fn parse(body: &[u8]) -> Result<Value> {
        serde_json::from_slice(body)
            .map_err(|e| Error::Extraction(format!("malformed JSON body: {}", e)))
    }

    fn search(document: &Value, expression: &str) -> Result<Value> {
        let compiled = Self::compile(expression)?;
        let found = compiled.search(document).map_err(|e| {
            Error::Extraction(format!("failed to evaluate '{}': {}", expression, e))
        })?;
        serde_json::to_value(&*found)
            .map_err(|e| Error::Extraction(format!("failed to convert result of '{}': {}", expression, e)))
    }
}

impl Extractor for JsonExtractor {
    fn format(&self) -> InputFormat {
        InputFormat::Json
    }

    fn validate_expression(&self, expression: &str) -> Result<()> {
        Self::compile(expression).map(|_| ())
    }

    fn extract(
        &self,
        body: &[u8],
        expression: &str,
        token_path: Option<&str>,
    ) -> Result<ExtractedPage> {
        let document = Self::parse(body)?;

        let records: Vec<RawRecord> = match Self::search(&document, expression)? {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        };

        let body_token = match token_path {
            Some(path) => token_text(Self::search(&document, path)?),
            None => None,
        };

        debug!(
            "Extracted {} JSON records with '{}' (token: {:?})",
            records.len(),
            expression,
            body_token
        );
        Ok(ExtractedPage {
            records,
            body_token,
        })
    }

    fn query(&self, body: &[u8], expression: &str) -> Result<Value> {
        Self::search(&Self::parse(body)?, expression)
    }
}

fn token_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(false) => None,
        other => Some(other.to_string()),
    }
}
