use crate::{CanonicalRecord, FieldMapping, MappingError, RawRecord, Transform};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d", "%d.%m.%Y"];

/// Maps raw records onto the canonical schema.
///
/// Every field is resolved from the raw record alone, so the order in which
/// entries are evaluated never changes the result.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    fields: Vec<FieldMapping>,
}

impl FieldMapper {
    pub fn new(fields: Vec<FieldMapping>) -> Self {
        Self { fields }
    }

    pub fn map(&self, raw: &RawRecord) -> Result<CanonicalRecord, MappingError> {
        let mut record = CanonicalRecord::new();

        for field in &self.fields {
            match lookup_path(raw, &field.source).filter(|v| !v.is_null()) {
                Some(value) => {
                    let value = match field.transform {
                        Some(transform) => apply_transform(transform, field.format.as_deref(), value)
                            .map_err(|reason| MappingError::InvalidValue {
                                target: field.target.clone(),
                                reason,
                            })?,
                        None => value.clone(),
                    };
                    record.insert(field.target.clone(), value);
                }
                None if field.required => {
                    return Err(MappingError::MissingRequiredField {
                        target: field.target.clone(),
                        source_path: field.source.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(record)
    }
}

/// Resolves a dotted path such as `listing.photos[0].url` or `items.2.id`
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return Some(value);
    }

    let mut current = value;
    for segment in path.split('.') {
        let (key, indexes) = match segment.find('[') {
            Some(bracket) => (&segment[..bracket], &segment[bracket..]),
            None => (segment, ""),
        };

        if !key.is_empty() {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        let mut rest = indexes;
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].trim().parse().ok()?;
            current = current.as_array()?.get(index)?;
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }

    Some(current)
}

fn apply_transform(transform: Transform, format: Option<&str>, value: &Value) -> Result<Value, String> {
    match transform {
        Transform::Trim => Ok(map_str(value, |s| s.trim().to_string())),
        Transform::Lowercase => Ok(map_str(value, |s| s.to_lowercase())),
        Transform::Uppercase => Ok(map_str(value, |s| s.to_uppercase())),
        Transform::String => Ok(Value::String(text_of(value))),
        Transform::Integer => to_integer(value).map(Value::from),
        Transform::Float => {
            let number = to_float(value)?;
            Number::from_f64(number)
                .map(Value::Number)
                .ok_or_else(|| format!("{} is not a finite number", number))
        }
        Transform::Boolean => to_boolean(value).map(Value::Bool),
        Transform::Date => datetime_of(value, format)
            .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string())),
        Transform::Timestamp => datetime_of(value, format)
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))),
    }
}

fn map_str(value: &Value, f: fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|item| map_str(item, f)).collect()),
        other => other.clone(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("{} is not an integer", n)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| format!("'{}' is not an integer", s))
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("cannot convert {} to an integer", other)),
    }
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a float", n)),
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("cannot convert {} to a float", other)),
    }
}

fn to_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{} is not a boolean", n)),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "t" => Ok(true),
            "false" | "no" | "n" | "0" | "f" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("cannot convert {} to a boolean", other)),
    }
}

fn datetime_of(value: &Value, format: Option<&str>) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => {
            parse_datetime(s, format).ok_or_else(|| format!("'{}' is not a recognized date", s))
        }
        Value::Number(n) => {
            let seconds = n.as_i64().ok_or_else(|| format!("{} is not an epoch value", n))?;
            // values this large are epoch milliseconds
            let dt = if seconds.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(seconds).single()
            } else {
                Utc.timestamp_opt(seconds, 0).single()
            };
            dt.ok_or_else(|| format!("{} is out of range", n))
        }
        other => Err(format!("cannot convert {} to a date", other)),
    }
}

/// Parses common date and timestamp spellings, naive values are taken as UTC
pub fn parse_datetime(input: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Some(format) = format {
        if let Ok(dt) = DateTime::parse_from_str(input, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
        return NaiveDate::parse_from_str(input, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            source: source.to_string(),
            target: target.to_string(),
            required: false,
            transform: None,
            format: None,
        }
    }

    fn required(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            required: true,
            ..field(source, target)
        }
    }

    fn with_transform(mut mapping: FieldMapping, transform: Transform) -> FieldMapping {
        mapping.transform = Some(transform);
        mapping
    }

    #[test]
    fn test_lookup_nested_paths() {
        let raw = json!({
            "listing": {"address": {"city": "Austin"}, "photos": [{"url": "a.jpg"}, {"url": "b.jpg"}]},
            "tags": ["x", "y"]
        });
        assert_eq!(lookup_path(&raw, "listing.address.city"), Some(&json!("Austin")));
        assert_eq!(lookup_path(&raw, "listing.photos[1].url"), Some(&json!("b.jpg")));
        assert_eq!(lookup_path(&raw, "tags.0"), Some(&json!("x")));
        assert_eq!(lookup_path(&raw, "listing.missing"), None);
        assert_eq!(lookup_path(&raw, "tags[5]"), None);
        assert_eq!(lookup_path(&raw, "tags[x]"), None);
    }

    #[test]
    fn test_map_round_trip_with_transforms() {
        let mapper = FieldMapper::new(vec![
            required("id", "listing_id"),
            with_transform(field("name", "name"), Transform::Trim),
            with_transform(field("price", "price"), Transform::Float),
            with_transform(field("beds", "bedrooms"), Transform::Integer),
            with_transform(field("active", "is_active"), Transform::Boolean),
            with_transform(field("listed", "listed_on"), Transform::Date),
            with_transform(field("code", "status"), Transform::Lowercase),
        ]);
        let raw = json!({
            "id": 17,
            "name": "  Lake House ",
            "price": "450,000.50",
            "beds": "3",
            "active": "Y",
            "listed": "2024-03-05T10:15:00Z",
            "code": "ACTIVE",
            "ignored": true
        });

        let record = mapper.map(&raw).unwrap();
        assert_eq!(
            record.into_value(),
            json!({
                "listing_id": 17,
                "name": "Lake House",
                "price": 450000.5,
                "bedrooms": 3,
                "is_active": true,
                "listed_on": "2024-03-05",
                "status": "active"
            })
        );
    }

    #[test]
    fn test_field_order_follows_mapping() {
        let mapper = FieldMapper::new(vec![field("b", "second"), field("a", "first")]);
        let record = mapper.map(&json!({"a": 1, "b": 2})).unwrap();
        let names: Vec<&str> = record.field_names().collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_missing_required_field_rejects_record() {
        let mapper = FieldMapper::new(vec![required("id", "listing_id"), field("name", "name")]);
        let err = mapper.map(&json!({"name": "x"})).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingRequiredField {
                target: "listing_id".to_string(),
                source_path: "id".to_string(),
            }
        );

        // null counts as absent
        assert!(mapper.map(&json!({"id": null})).is_err());
    }

    #[test]
    fn test_missing_optional_field_is_omitted() {
        let mapper = FieldMapper::new(vec![required("id", "id"), field("name", "name")]);
        let record = mapper.map(&json!({"id": "a1"})).unwrap();
        assert_eq!(record.len(), 1);
        assert!(!record.contains("name"));
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let mapper = FieldMapper::new(vec![with_transform(field("beds", "beds"), Transform::Integer)]);
        let err = mapper.map(&json!({"beds": "three"})).unwrap_err();
        assert!(matches!(err, MappingError::InvalidValue { ref target, .. } if target == "beds"));
    }

    #[test]
    fn test_timestamp_with_custom_format() {
        let mut mapping = with_transform(field("modified", "modified_at"), Transform::Timestamp);
        mapping.format = Some("%d/%m/%Y %H:%M".to_string());
        let mapper = FieldMapper::new(vec![mapping]);
        let record = mapper.map(&json!({"modified": "05/03/2024 10:15"})).unwrap();
        assert_eq!(record.get("modified_at"), Some(&json!("2024-03-05T10:15:00Z")));
    }

    #[test]
    fn test_epoch_values() {
        let mapper = FieldMapper::new(vec![
            with_transform(field("s", "s"), Transform::Timestamp),
            with_transform(field("ms", "ms"), Transform::Date),
        ]);
        let record = mapper
            .map(&json!({"s": 1_700_000_000, "ms": 1_700_000_000_000_i64}))
            .unwrap();
        assert_eq!(record.get("s"), Some(&json!("2023-11-14T22:13:20Z")));
        assert_eq!(record.get("ms"), Some(&json!("2023-11-14")));
    }

    #[test]
    fn test_string_transform_serializes_structures() {
        let mapper = FieldMapper::new(vec![with_transform(field("v", "v"), Transform::String)]);
        let record = mapper.map(&json!({"v": [1, 2]})).unwrap();
        assert_eq!(record.get("v"), Some(&json!("[1,2]")));
    }

    #[test]
    fn test_parse_datetime_variants() {
        assert!(parse_datetime("2020-10-01", None).is_some());
        assert!(parse_datetime("10/01/2020", None).is_some());
        assert!(parse_datetime("2020-10-01 12:30:00", None).is_some());
        assert!(parse_datetime("not a date", None).is_none());
    }
}
