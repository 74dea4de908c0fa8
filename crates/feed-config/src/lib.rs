mod app_config;
mod catalog;
mod interpolation;

pub use app_config::{AppConfig, LoggingConfig};
pub use catalog::{ProviderCatalog, ValidationError, DEFAULT_PROVIDER_ID};
pub use interpolation::{interpolate, interpolate_str};

pub use feed_http_connector::HttpSettings;
