use async_trait::async_trait;
use feed_core::{prepare_destination, CanonicalRecord, Error, Result, Sink, SinkStatus, SinkTarget};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Writes one JSON object per line
pub struct NdjsonSink {
    target: SinkTarget,
    writer: Option<BufWriter<File>>,
    status: SinkStatus,
}

impl NdjsonSink {
    pub fn new(target: SinkTarget) -> Self {
        let status = SinkStatus {
            destination: Some(target.path.display().to_string()),
            ..SinkStatus::default()
        };
        Self {
            target,
            writer: None,
            status,
        }
    }

    fn record_error(&mut self, message: String) -> Error {
        self.status.errors += 1;
        self.status.last_error = Some(message.clone());
        Error::Sink(message)
    }
}

#[async_trait]
impl Sink for NdjsonSink {
    async fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let file = prepare_destination(&self.target.path, self.target.mode)?;
        self.writer = Some(BufWriter::new(File::from_std(file)));
        self.status.open = true;
        info!("Opened ndjson sink at {}", self.target.path.display());
        Ok(())
    }

    async fn write(&mut self, record: &CanonicalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| Error::Sink(format!("failed to serialize record: {}", e)))?;
        line.push(b'\n');

        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_all(&line).await,
            None => return Err(self.record_error("ndjson sink is not open".to_string())),
        };
        if let Err(e) = result {
            return Err(self.record_error(format!(
                "failed to write {}: {}",
                self.target.path.display(),
                e
            )));
        }

        self.status.records_written += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        self.status.open = false;

        if let Err(e) = writer.flush().await {
            return Err(self.record_error(format!(
                "failed to flush {}: {}",
                self.target.path.display(),
                e
            )));
        }
        debug!(
            "Closed ndjson sink at {} after {} records",
            self.target.path.display(),
            self.status.records_written
        );
        Ok(())
    }

    fn status(&self) -> SinkStatus {
        self.status.clone()
    }
}
