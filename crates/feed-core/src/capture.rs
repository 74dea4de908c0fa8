use crate::{Error, Extractor, FetchResult, ResponseField, ResponseSource, Result};
use serde_json::{Map, Value};

/// Checks that a response field can be evaluated by a provider reading `extractor`'s format
pub fn validate_response_field(field: &ResponseField, extractor: &dyn Extractor) -> Result<()> {
    let invalid = |reason: String| {
        Error::Configuration(format!("response field '{}': {}", field.name, reason))
    };

    if let Some(format) = field.source.body_format() {
        if format != extractor.format() {
            return Err(invalid(format!(
                "{} source on a {} provider",
                format,
                extractor.format()
            )));
        }
    }

    match (field.source, field.expr.as_deref()) {
        (ResponseSource::Status, _) => Ok(()),
        (_, None) => Err(invalid("expr is required".to_string())),
        (ResponseSource::Header, Some(_)) => Ok(()),
        (_, Some(expression)) => extractor
            .validate_expression(expression)
            .map_err(|e| invalid(e.to_string())),
    }
}

/// Evaluates every response field against one response, in configuration order
pub fn capture_response_fields(
    fields: &[ResponseField],
    response: &FetchResult,
    extractor: &dyn Extractor,
) -> Result<Map<String, Value>> {
    let mut captured = Map::new();
    for field in fields {
        let value = match (field.source, field.expr.as_deref()) {
            (ResponseSource::Status, _) => Value::from(response.status),
            (ResponseSource::Header, Some(name)) => response
                .header(name)
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
            (_, Some(expression)) => extractor.query(&response.body, expression)?,
            (_, None) => {
                return Err(Error::Configuration(format!(
                    "response field '{}': expr is required",
                    field.name
                )))
            }
        };
        captured.insert(field.name.clone(), value);
    }
    Ok(captured)
}
