use crate::interpolation::interpolate;
use anyhow::Context;
use feed_core::{
    check_syntax, render_str, validate_response_field, AuthConfig, Pagination, ProviderConfig,
    Registry, Variables,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Provider used when a requested id has no entry of its own
pub const DEFAULT_PROVIDER_ID: &str = "default";

/// Every problem found in a providers file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration problem(s):", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  - {}", problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Providers file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderConfig>,
}

impl ProviderCatalog {
    /// Load a providers file, expanding `${VAR}` references from the environment
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read providers file {}", path.display()))?;
        let catalog = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse providers file {}", path.display()))?;
        debug!(
            "Loaded {} provider(s) from {}",
            catalog.providers.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Self::from_yaml_str_with(content, |name| std::env::var(name).ok())
    }

    pub fn from_yaml_str_with<F>(content: &str, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)?;
        interpolate(&mut value, &lookup)?;
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Look up a provider, falling back to the `default` entry.
    ///
    /// The fallback is returned under the requested id so summaries and
    /// `{{ provider_id }}` refer to what was asked for.
    pub fn resolve(&self, id: &str) -> Option<ProviderConfig> {
        if let Some(provider) = self.get(id) {
            return Some(provider.clone());
        }
        let mut fallback = self.get(DEFAULT_PROVIDER_ID)?.clone();
        debug!("Provider '{}' not configured, using '{}'", id, DEFAULT_PROVIDER_ID);
        fallback.id = id.to_string();
        Some(fallback)
    }

    pub fn list(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    /// Check every provider before any pipeline is built
    pub fn validate(&self, registry: &Registry) -> Result<(), ValidationError> {
        let mut problems = Vec::new();

        let mut seen = HashSet::new();
        let mut destinations: HashMap<String, &str> = HashMap::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                problems.push("provider with an empty id".to_string());
            } else if !seen.insert(provider.id.as_str()) {
                problems.push(format!("duplicate provider id '{}'", provider.id));
            }
            validate_provider(provider, registry, &mut problems);

            let destination = sink_destination(provider);
            if let Some(other) = destinations.get(&destination) {
                if *other != provider.id {
                    problems.push(format!(
                        "[{}] sink path '{}' is also written by '{}'",
                        provider.id, destination, other
                    ));
                }
            } else {
                destinations.insert(destination, provider.id.as_str());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { problems })
        }
    }
}

fn validate_provider(provider: &ProviderConfig, registry: &Registry, problems: &mut Vec<String>) {
    let mut report = |message: String| problems.push(format!("[{}] {}", provider.id, message));

    if provider.mapping.is_empty() {
        report("mapping is empty".to_string());
    }
    let mut targets = HashSet::new();
    for mapping in &provider.mapping {
        if mapping.source.trim().is_empty() || mapping.target.trim().is_empty() {
            report("mapping entries need a source and a target".to_string());
        } else if !targets.insert(mapping.target.as_str()) {
            report(format!("duplicate mapping target '{}'", mapping.target));
        }
    }

    if provider.request.url.trim().is_empty() {
        report("request url is empty".to_string());
    }
    let timeout = provider.request.timeout_seconds;
    if !timeout.is_finite() || timeout <= 0.0 {
        report("request timeout must be a positive number of seconds".to_string());
    }
    for (field, template) in templates(provider) {
        if let Err(e) = check_syntax(template) {
            report(format!("{}: {}", field, e));
        }
    }

    match &provider.pagination {
        Pagination::Offset { page_size: 0, .. } | Pagination::Page { page_size: Some(0), .. } => {
            report("page_size must be positive".to_string());
        }
        _ => {}
    }

    if provider.retry.max_attempts == 0 {
        report("retry.max_attempts must be at least 1".to_string());
    }

    match registry.get_extractor(provider.input_format) {
        Ok(extractor) => {
            if let Err(e) = extractor.validate_expression(&provider.extract) {
                report(format!("extract: {}", e));
            }
            if let Some(path) = provider.pagination.token_path() {
                if let Err(e) = extractor.validate_expression(path) {
                    report(format!("pagination path: {}", e));
                }
            }
            for field in &provider.response.fields {
                if let Err(e) = validate_response_field(field, extractor.as_ref()) {
                    report(e.to_string());
                }
            }
        }
        Err(e) => report(e.to_string()),
    }

    if let Err(e) = registry.get_sink_factory(&provider.sink.kind) {
        report(e.to_string());
    }
    if provider.sink.path.trim().is_empty() {
        report("sink path is empty".to_string());
    } else if let Err(e) = check_syntax(&provider.sink.path) {
        report(format!("sink path: {}", e));
    }
}

/// Sink path with `{{ provider_id }}` filled in
fn sink_destination(provider: &ProviderConfig) -> String {
    let mut vars = Variables::new();
    vars.insert("provider_id", provider.id.as_str());
    render_str(&provider.sink.path, &vars).unwrap_or_else(|_| provider.sink.path.clone())
}

/// Every string rendered per request, labelled by where it appears
fn templates(provider: &ProviderConfig) -> Vec<(String, &str)> {
    let request = &provider.request;
    let mut out = vec![("url".to_string(), request.url.as_str())];

    for (name, value) in &request.headers {
        out.push((format!("header '{}'", name), value.as_str()));
    }
    for (name, value) in &request.params {
        collect_strings(&format!("param '{}'", name), value, &mut out);
    }
    if let Some(body) = &request.body {
        collect_strings("body", body, &mut out);
    }

    match &provider.auth {
        AuthConfig::None => {}
        AuthConfig::Bearer { token } => out.push(("auth token".to_string(), token.as_str())),
        AuthConfig::Basic { username, password } => {
            out.push(("auth username".to_string(), username.as_str()));
            if let Some(password) = password {
                out.push(("auth password".to_string(), password.as_str()));
            }
        }
        AuthConfig::ApiKey { value, .. } => out.push(("auth api key".to_string(), value.as_str())),
    }
    out
}

fn collect_strings<'a>(field: &str, value: &'a Value, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::String(s) => out.push((field.to_string(), s.as_str())),
        Value::Array(items) => {
            for item in items {
                collect_strings(field, item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_strings(&format!("{}.{}", field, key), item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_json_extractor::JsonExtractor;
    use feed_ndjson_destination::NdjsonSinkFactory;
    use feed_xml_extractor::XmlExtractor;
    use std::sync::Arc;

    const PROVIDERS: &str = r#"
providers:
  - id: default
    input_format: json
    auth:
      type: bearer
      token: ${FEED_TOKEN}
    request:
      url: https://api.example.com/{{ provider_id }}/listings
      params:
        modified_since: "{{ since_date }}"
    pagination:
      type: offset
      param: offset
      limit_param: limit
      page_size: 50
    extract: data.items
    mapping:
      - { source: id, target: listing_id, required: true }
      - { source: list_price, target: price, transform: float }
    sink:
      type: ndjson
      path: out/listings.ndjson
  - id: mls-238
    input_format: xml
    request:
      url: ${FEED_HOST:-https://feeds.example.org}/export
    pagination:
      type: cursor
      param: cursor
      path: /Listings/@next
    extract: /Listings/Listing
    mapping:
      - { source: ListingKey, target: listing_id }
    sink:
      type: ndjson
      path: out/mls-238.ndjson
      mode: append
"#;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_extractor(Arc::new(JsonExtractor::new()));
        registry.register_extractor(Arc::new(XmlExtractor::new()));
        registry.register_sink(Arc::new(NdjsonSinkFactory));
        registry
    }

    fn catalog(yaml: &str) -> ProviderCatalog {
        ProviderCatalog::from_yaml_str_with(yaml, |name| match name {
            "FEED_TOKEN" => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_parses_and_interpolates() {
        let catalog = catalog(PROVIDERS);
        assert_eq!(catalog.ids(), vec!["default", "mls-238"]);

        let default = catalog.get("default").unwrap();
        assert_eq!(
            default.auth,
            AuthConfig::Bearer {
                token: "s3cret".to_string()
            }
        );
        let xml = catalog.get("mls-238").unwrap();
        assert_eq!(xml.request.url, "https://feeds.example.org/export");
        assert!(catalog.validate(&registry()).is_ok());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let catalog = catalog(PROVIDERS);
        assert_eq!(catalog.resolve("mls-238").unwrap().request.url, "https://feeds.example.org/export");

        let fallback = catalog.resolve("mls-999").unwrap();
        assert_eq!(fallback.id, "mls-999");
        assert_eq!(fallback.extract, "data.items");

        let without_default = ProviderCatalog {
            providers: vec![catalog.get("mls-238").unwrap().clone()],
        };
        assert!(without_default.resolve("mls-999").is_none());
    }

    #[test]
    fn test_missing_secret_fails_to_load() {
        let err = ProviderCatalog::from_yaml_str_with(PROVIDERS, |_| None).unwrap_err();
        assert!(err.to_string().contains("FEED_TOKEN"));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut catalog = catalog(PROVIDERS);
        let mut duplicate = catalog.providers[1].clone();
        duplicate.extract = "/Listings/Listing[".to_string();
        duplicate.sink.kind = "parquet".to_string();
        duplicate.mapping.push(duplicate.mapping[0].clone());
        catalog.providers.push(duplicate);

        catalog.providers[0].request.url = "https://api.example.com/{{ broken".to_string();
        catalog.providers[0].pagination = Pagination::Offset {
            param: "offset".to_string(),
            limit_param: None,
            page_size: 0,
            start: 0,
        };
        catalog.providers[0].mapping.clear();
        catalog.providers[1].request.timeout_seconds = f64::INFINITY;

        let err = catalog.validate(&registry()).unwrap_err();
        let all = err.problems.join("\n");
        assert!(all.contains("duplicate provider id 'mls-238'"), "{}", all);
        assert!(all.contains("duplicate mapping target 'listing_id'"), "{}", all);
        assert!(all.contains("[mls-238] extract:"), "{}", all);
        assert!(all.contains("parquet"), "{}", all);
        assert!(all.contains("[default] mapping is empty"), "{}", all);
        assert!(all.contains("[default] url:"), "{}", all);
        assert!(all.contains("[default] page_size must be positive"), "{}", all);
        assert!(all.contains("[mls-238] request timeout must be a positive number"), "{}", all);
    }

    #[test]
    fn test_providers_may_not_share_a_sink_path() {
        let mut catalog = catalog(PROVIDERS);
        let mut copy = catalog.providers[0].clone();
        copy.id = "mls-500".to_string();
        catalog.providers.push(copy);

        let err = catalog.validate(&registry()).unwrap_err();
        assert_eq!(
            err.problems,
            vec!["[mls-500] sink path 'out/listings.ndjson' is also written by 'default'".to_string()]
        );

        for provider in &mut catalog.providers {
            provider.sink.path = "out/{{ provider_id }}.ndjson".to_string();
        }
        assert!(catalog.validate(&registry()).is_ok());
    }

    #[test]
    fn test_response_fields_must_match_the_input_format() {
        let mut catalog = catalog(PROVIDERS);
        catalog.providers[1].response = serde_json::from_value(serde_json::json!({"fields": [
            {"name": "total", "source": "json", "expr": "meta.total"},
            {"name": "count", "source": "xml"}
        ]}))
        .unwrap();

        let err = catalog.validate(&registry()).unwrap_err();
        let all = err.problems.join("\n");
        assert!(all.contains("'total': json source on a xml provider"), "{}", all);
        assert!(all.contains("'count': expr is required"), "{}", all);
    }

    #[test]
    fn test_load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.yaml");
        std::fs::write(&path, "providers: [").unwrap();

        let err = ProviderCatalog::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("providers.yaml"));
    }
}
