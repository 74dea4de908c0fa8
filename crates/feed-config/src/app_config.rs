use anyhow::Context;
use feed_http_connector::HttpSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide settings; provider definitions live in a separate file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub http: HttpSettings,

    /// Providers file used when none is given on the command line
    #[serde(default)]
    pub providers_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Layers defaults, the config file and `FEEDSINK__*` environment variables.
    ///
    /// Without an explicit path `feedsink.yaml` in the working directory is
    /// used when present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("feedsink").required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file)
            // FEEDSINK__LOGGING__LEVEL=debug
            .add_source(
                config::Environment::with_prefix("FEEDSINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load application config")?;

        settings
            .try_deserialize()
            .context("Invalid application config")
    }
}
