mod capture;
mod error;
mod extractor;
mod factory;
mod fetcher;
mod mapper;
mod orchestrator;
mod pagination;
mod pipeline;
mod provider;
mod record;
mod registry;
mod retry;
mod sink;
mod summary;
mod template;

pub use capture::{capture_response_fields, validate_response_field};
pub use error::{Error, ErrorKind, FetchError, FetchErrorKind, MappingError, Result, TemplateError};
pub use extractor::{ExtractedPage, Extractor};
pub use factory::SinkFactory;
pub use fetcher::{FetchResult, Fetcher};
pub use mapper::{lookup_path, parse_datetime, FieldMapper};
pub use orchestrator::{RunHandle, RunOrchestrator, RunStatus};
pub use pagination::{extract_page, first_token, next_token, PageToken};
pub use pipeline::{Pipeline, PipelineState, RunContext, RunOptions};
pub use provider::{
    ApiKeyLocation, AuthConfig, FieldMapping, HttpMethod, InputFormat, LinkSource, Pagination,
    ProviderConfig, RequestSpec, ResponseField, ResponseSource, ResponseSpec, RunLimits, SinkSpec,
    Transform, WriteMode,
};
pub use record::{CanonicalRecord, RawRecord};
pub use registry::Registry;
pub use retry::{is_retriable_status, parse_retry_after, Backoff, RetryPolicy};
pub use sink::{prepare_destination, Sink, SinkStatus, SinkTarget};
pub use summary::{PipelineRunSummary, RunError, RunState};
pub use template::{
    check_syntax, render_str, resolve_link, BasicCredentials, RequestTemplate, ResolvedRequest,
    Variables,
};
