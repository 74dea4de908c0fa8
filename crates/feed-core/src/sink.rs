use crate::{CanonicalRecord, Error, Result, WriteMode};
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Trait for record sinks
#[async_trait]
pub trait Sink: Send + Sync {
    /// Open the destination; must be called before the first write
    async fn open(&mut self) -> Result<()>;

    /// Write a single record
    async fn write(&mut self, record: &CanonicalRecord) -> Result<()>;

    /// Flush buffered output and release the destination.
    ///
    /// Calling it on a sink that is not open is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Get sink status information
    fn status(&self) -> SinkStatus;
}

#[derive(Debug, Clone, Default)]
pub struct SinkStatus {
    pub open: bool,
    pub records_written: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub destination: Option<String>,
}

/// Where and how a sink writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTarget {
    pub path: PathBuf,
    pub mode: WriteMode,
    /// Canonical field names in mapping order, used by columnar sinks
    pub columns: Vec<String>,
}

impl SinkTarget {
    pub fn new(path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

/// Opens a destination file, creating missing parent directories
pub fn prepare_destination(path: &Path, mode: WriteMode) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            Error::Sink(format!("failed to create directory {}: {}", parent.display(), e))
        })?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Overwrite => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };

    options
        .open(path)
        .map_err(|e| Error::Sink(format!("failed to open {}: {}", path.display(), e)))
}
