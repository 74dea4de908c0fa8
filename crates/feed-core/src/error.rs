use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Template(_) => ErrorKind::Template,
            Error::Fetch(_) => ErrorKind::Fetch,
            Error::Extraction(_) => ErrorKind::Extraction,
            Error::Mapping(_) => ErrorKind::Mapping,
            Error::Sink(_) => ErrorKind::Sink,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// Coarse classification reported in run summaries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Template,
    Fetch,
    Extraction,
    Mapping,
    Sink,
    Cancelled,
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Template => "template error",
            ErrorKind::Fetch => "fetch error",
            ErrorKind::Extraction => "extraction error",
            ErrorKind::Mapping => "mapping error",
            ErrorKind::Sink => "sink error",
            ErrorKind::Cancelled => "cancellation",
            ErrorKind::Configuration => "configuration error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable '{0}' has no default")]
    UndefinedVariable(String),

    #[error("invalid template syntax: {0}")]
    InvalidSyntax(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Transient failure that survived every allowed attempt
    Retriable,
    NonRetriable,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Retriable => f.write_str("retriable"),
            FetchErrorKind::NonRetriable => f.write_str("non-retriable"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub status: Option<u16>,
    pub attempts: u32,
    pub message: String,
}

impl FetchError {
    pub fn retriable(status: Option<u16>, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Retriable,
            status,
            attempts,
            message: message.into(),
        }
    }

    pub fn non_retriable(status: Option<u16>, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::NonRetriable,
            status,
            attempts,
            message: message.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == FetchErrorKind::Retriable
    }
}

/// Record-level failures; the record is rejected and the run continues
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("required field '{target}' missing at source path '{source_path}'")]
    MissingRequiredField { target: String, source_path: String },

    #[error("field '{target}' could not be transformed: {reason}")]
    InvalidValue { target: String, reason: String },
}
