use crate::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Declarative description of one upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique identifier used on the command line and in summaries
    pub id: String,

    /// Optional human readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Format of the response bodies
    pub input_format: InputFormat,

    /// Authentication applied to every request
    #[serde(default)]
    pub auth: AuthConfig,

    /// Request templates
    pub request: RequestSpec,

    /// How the next page is requested
    #[serde(default)]
    pub pagination: Pagination,

    /// Query selecting the records of a page (JMESPath for JSON, XPath for XML)
    pub extract: String,

    /// Ordered source-path to canonical-field mapping
    pub mapping: Vec<FieldMapping>,

    /// Response-level values reported in the run summary
    #[serde(default)]
    pub response: ResponseSpec,

    /// Output destination
    pub sink: SinkSpec,

    /// Retry policy for transient HTTP failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-run page and record limits
    #[serde(default)]
    pub limits: RunLimits,
}

impl ProviderConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Canonical field names in mapping order
    pub fn target_fields(&self) -> Vec<String> {
        self.mapping.iter().map(|m| m.target.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Json,
    Xml,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Json => f.write_str("json"),
            InputFormat::Xml => f.write_str("xml"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    ApiKey {
        /// Header or query parameter name
        name: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default)]
    pub method: HttpMethod,

    /// URL template
    pub url: String,

    /// Header templates
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Query parameter templates; non-string values are sent verbatim
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// JSON body template, every string leaf is rendered
    #[serde(default)]
    pub body: Option<Value>,

    /// Timeout applied to each HTTP attempt
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

fn default_timeout_seconds() -> f64 {
    30.0
}

impl RequestSpec {
    /// Per-attempt timeout; values that are not a finite positive duration fall back to the default
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_timeout_seconds()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    /// Single request
    #[default]
    None,

    /// `param` carries a record offset advanced by `page_size`
    Offset {
        param: String,
        #[serde(default)]
        limit_param: Option<String>,
        page_size: u64,
        #[serde(default)]
        start: u64,
    },

    /// `param` carries a page number advanced by one
    Page {
        param: String,
        #[serde(default)]
        size_param: Option<String>,
        #[serde(default)]
        page_size: Option<u64>,
        #[serde(default = "default_first_page")]
        start: u64,
    },

    /// Opaque cursor read from `path` in the body and sent back in `param`
    Cursor { param: String, path: String },

    /// Next-page URL taken from a header or the body, resolved against the page it came from
    Link {
        #[serde(default)]
        source: LinkSource,
    },
}

fn default_first_page() -> u64 {
    1
}

impl Pagination {
    pub fn kind(&self) -> &'static str {
        match self {
            Pagination::None => "none",
            Pagination::Offset { .. } => "offset",
            Pagination::Page { .. } => "page",
            Pagination::Cursor { .. } => "cursor",
            Pagination::Link { .. } => "link",
        }
    }

    /// Body path holding the next-page token, if this kind reads one
    pub fn token_path(&self) -> Option<&str> {
        match self {
            Pagination::Cursor { path, .. } => Some(path),
            Pagination::Link {
                source: LinkSource::Body { path },
            } => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum LinkSource {
    Header {
        #[serde(default = "default_link_header")]
        name: String,
        #[serde(default = "default_link_rel")]
        rel: String,
    },
    Body {
        path: String,
    },
}

fn default_link_header() -> String {
    "link".to_string()
}

fn default_link_rel() -> String {
    "next".to_string()
}

impl Default for LinkSource {
    fn default() -> Self {
        LinkSource::Header {
            name: default_link_header(),
            rel: default_link_rel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMapping {
    /// Dotted path into the raw record, e.g. `address.city` or `photos[0].url`
    pub source: String,

    /// Canonical field name
    pub target: String,

    /// Reject the record when the source is absent
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transform: Option<Transform>,

    /// chrono format string used by `date` and `timestamp` to parse the input
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

/// Values captured once per run from the first page's response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSpec {
    #[serde(default)]
    pub fields: Vec<ResponseField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseField {
    /// Key in the summary's `response_fields`
    pub name: String,

    #[serde(default)]
    pub source: ResponseSource,

    /// Header name, or a query in the provider's input format; unused for `status`
    #[serde(default)]
    pub expr: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Status,
    Header,
    #[default]
    Json,
    Xml,
}

impl ResponseSource {
    /// Body format a query source is evaluated in
    pub fn body_format(&self) -> Option<InputFormat> {
        match self {
            ResponseSource::Json => Some(InputFormat::Json),
            ResponseSource::Xml => Some(InputFormat::Xml),
            ResponseSource::Status | ResponseSource::Header => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Registered sink name, e.g. "ndjson" or "csv"
    #[serde(rename = "type")]
    pub kind: String,

    /// Destination path
    pub path: String,

    #[serde(default)]
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunLimits {
    #[serde(default)]
    pub max_pages: Option<u64>,

    #[serde(default)]
    pub max_records: Option<u64>,
}
