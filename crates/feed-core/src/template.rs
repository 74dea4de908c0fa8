//! Request rendering.
//!
//! Templates use `{{ name }}` placeholders, optionally with a fallback:
//! `{{ since | default('2020-01-01') }}`. Rendering is pure: the same
//! templates, variables and page token always yield the same request.

use crate::{
    ApiKeyLocation, AuthConfig, HttpMethod, PageToken, Pagination, ProviderConfig, RequestSpec,
    TemplateError,
};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*default\(\s*(?:'([^']*)'|"([^"]*)")\s*\)\s*)?\}\}"#,
    )
    .expect("Invalid placeholder pattern")
});

/// Values available to templates during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base variables of a run: `provider_id`, `since` and `since_date`
    pub fn for_run(provider_id: &str, since: DateTime<Utc>) -> Self {
        let mut vars = Self::new();
        vars.insert("provider_id", provider_id);
        vars.insert("since", since.to_rfc3339_opts(SecondsFormat::Secs, true));
        vars.insert("since_date", since.format("%Y-%m-%d").to_string());
        vars
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Renders one template string
pub fn render_str(template: &str, vars: &Variables) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        check_literal(&template[last..whole.start()])?;
        output.push_str(&template[last..whole.start()]);

        let name = &caps[1];
        let default = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
        match (vars.get(name), default) {
            (Some(value), _) => output.push_str(value),
            (None, Some(fallback)) => output.push_str(fallback),
            (None, None) => return Err(TemplateError::UndefinedVariable(name.to_string())),
        }
        last = whole.end();
    }

    check_literal(&template[last..])?;
    output.push_str(&template[last..]);
    Ok(output)
}

fn check_literal(segment: &str) -> Result<(), TemplateError> {
    if segment.contains("{{") || segment.contains("}}") {
        return Err(TemplateError::InvalidSyntax(segment.trim().to_string()));
    }
    Ok(())
}

/// Verifies placeholder syntax without resolving any variable
pub fn check_syntax(template: &str) -> Result<(), TemplateError> {
    let mut last = 0;
    for whole in PLACEHOLDER.find_iter(template) {
        check_literal(&template[last..whole.start()])?;
        last = whole.end();
    }
    check_literal(&template[last..])
}

fn render_value(value: &Value, vars: &Variables) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => Value::String(render_str(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, vars))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, vars)?);
            }
            Value::Object(rendered)
        }
        other => other.clone(),
    })
}

fn param_text(value: &Value, vars: &Variables) -> Result<String, TemplateError> {
    match value {
        Value::String(s) => render_str(s, vars),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Option<String>,
}

/// Fully rendered HTTP request for one page
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub basic_auth: Option<BasicCredentials>,
    /// Applies to each attempt separately
    pub timeout: Duration,
}

impl ResolvedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Request-side view of a provider: templates, auth and pagination
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    request: RequestSpec,
    auth: AuthConfig,
    pagination: Pagination,
}

impl RequestTemplate {
    pub fn new(request: RequestSpec, auth: AuthConfig, pagination: Pagination) -> Self {
        Self {
            request,
            auth,
            pagination,
        }
    }

    pub fn from_provider(provider: &ProviderConfig) -> Self {
        Self::new(
            provider.request.clone(),
            provider.auth.clone(),
            provider.pagination.clone(),
        )
    }

    /// Renders the request for the page identified by `token`
    pub fn render(
        &self,
        vars: &Variables,
        token: Option<&PageToken>,
    ) -> Result<ResolvedRequest, TemplateError> {
        let mut vars = vars.clone();
        if let Some(token) = token {
            vars.insert(token.variable_name(), token.to_string());
        }

        let link = match token {
            Some(PageToken::Link(link)) => Some(link.as_str()),
            _ => None,
        };

        let base_url = render_str(&self.request.url, &vars)?;
        let url = match link {
            Some(link) => resolve_link(&base_url, link)?,
            None => base_url,
        };

        let mut headers = Vec::with_capacity(self.request.headers.len() + 1);
        for (name, template) in &self.request.headers {
            headers.push((name.clone(), render_str(template, &vars)?));
        }

        // a next link already carries the query of the following page
        let mut query = Vec::new();
        if link.is_none() {
            for (name, value) in &self.request.params {
                query.push((name.clone(), param_text(value, &vars)?));
            }
            self.apply_token(&mut query, token);
        }

        let mut basic_auth = None;
        match &self.auth {
            AuthConfig::None => {}
            AuthConfig::Bearer { token } => {
                let token = render_str(token, &vars)?;
                set_pair(&mut headers, "Authorization", format!("Bearer {}", token));
            }
            AuthConfig::Basic { username, password } => {
                basic_auth = Some(BasicCredentials {
                    username: render_str(username, &vars)?,
                    password: password
                        .as_deref()
                        .map(|p| render_str(p, &vars))
                        .transpose()?,
                });
            }
            AuthConfig::ApiKey {
                name,
                value,
                location,
            } => {
                let value = render_str(value, &vars)?;
                match location {
                    ApiKeyLocation::Header => set_pair(&mut headers, name, value),
                    ApiKeyLocation::Query => set_pair(&mut query, name, value),
                }
            }
        }

        let body = self
            .request
            .body
            .as_ref()
            .map(|body| render_value(body, &vars))
            .transpose()?;

        Ok(ResolvedRequest {
            method: self.request.method,
            url,
            headers,
            query,
            body,
            basic_auth,
            timeout: self.request.timeout(),
        })
    }

    fn apply_token(&self, query: &mut Vec<(String, String)>, token: Option<&PageToken>) {
        match (&self.pagination, token) {
            (
                Pagination::Offset {
                    param,
                    limit_param,
                    page_size,
                    ..
                },
                Some(PageToken::Offset(offset)),
            ) => {
                set_pair(query, param, offset.to_string());
                if let Some(limit_param) = limit_param {
                    set_pair(query, limit_param, page_size.to_string());
                }
            }
            (
                Pagination::Page {
                    param,
                    size_param,
                    page_size,
                    ..
                },
                Some(PageToken::Page(page)),
            ) => {
                set_pair(query, param, page.to_string());
                if let (Some(size_param), Some(page_size)) = (size_param, page_size) {
                    set_pair(query, size_param, page_size.to_string());
                }
            }
            (Pagination::Cursor { param, .. }, Some(PageToken::Cursor(cursor))) => {
                set_pair(query, param, cursor.clone());
            }
            _ => {}
        }
    }
}

fn set_pair(pairs: &mut Vec<(String, String)>, name: &str, value: String) {
    match pairs.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
        Some(pair) => pair.1 = value,
        None => pairs.push((name.to_string(), value)),
    }
}

/// Resolves a next link, absolute or relative (RFC 3986), against the URL it came from
pub fn resolve_link(base_url: &str, link: &str) -> Result<String, TemplateError> {
    let invalid = |url: &str, reason: url::ParseError| TemplateError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let base = Url::parse(base_url).map_err(|e| invalid(base_url, e))?;
    let resolved = base.join(link.trim()).map_err(|e| invalid(link, e))?;
    Ok(resolved.into())
}
