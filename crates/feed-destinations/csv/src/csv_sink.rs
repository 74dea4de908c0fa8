use async_trait::async_trait;
use feed_core::{
    prepare_destination, CanonicalRecord, Error, Result, Sink, SinkStatus, SinkTarget, WriteMode,
};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Writes records as CSV rows.
///
/// Columns start with the mapping's target fields; a field first seen later is
/// appended to the column list. The header is written once, before the first
/// row, and skipped when appending to a file that already has content.
pub struct CsvSink {
    target: SinkTarget,
    columns: Vec<String>,
    writer: Option<BufWriter<File>>,
    header_pending: bool,
    status: SinkStatus,
}

impl CsvSink {
    pub fn new(target: SinkTarget) -> Self {
        let status = SinkStatus {
            destination: Some(target.path.display().to_string()),
            ..SinkStatus::default()
        };
        Self {
            columns: target.columns.clone(),
            target,
            writer: None,
            header_pending: false,
            status,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn record_error(&mut self, message: String) -> Error {
        self.status.errors += 1;
        self.status.last_error = Some(message.clone());
        Error::Sink(message)
    }

    fn track_new_columns(&mut self, record: &CanonicalRecord) {
        for name in record.field_names() {
            if !self.columns.iter().any(|column| column == name) {
                if !self.header_pending {
                    warn!(
                        "Field '{}' first appeared after the CSV header of {} was written",
                        name,
                        self.target.path.display()
                    );
                }
                self.columns.push(name.to_string());
            }
        }
    }

    /// CSV bytes for one record, preceded by the header line while it is still pending
    fn encode(&self, record: &CanonicalRecord) -> std::result::Result<Vec<u8>, csv::Error> {
        let mut encoder = csv::Writer::from_writer(Vec::new());
        if self.header_pending {
            encoder.write_record(&self.columns)?;
        }
        let row: Vec<String> = self
            .columns
            .iter()
            .map(|column| cell(record.get(column)))
            .collect();
        encoder.write_record(&row)?;
        encoder.into_inner().map_err(|e| e.into_error().into())
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let file = File::from_std(prepare_destination(&self.target.path, self.target.mode)?);
        let has_content = match self.target.mode {
            WriteMode::Append => file.metadata().await.map(|m| m.len() > 0).unwrap_or(false),
            WriteMode::Overwrite => false,
        };

        self.header_pending = !has_content;
        self.writer = Some(BufWriter::new(file));
        self.status.open = true;
        info!("Opened csv sink at {}", self.target.path.display());
        Ok(())
    }

    async fn write(&mut self, record: &CanonicalRecord) -> Result<()> {
        if self.writer.is_none() {
            return Err(self.record_error("csv sink is not open".to_string()));
        }
        self.track_new_columns(record);
        let bytes = match self.encode(record) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.record_error(format!("failed to encode row: {}", e))),
        };

        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_all(&bytes).await,
            None => return Err(self.record_error("csv sink is not open".to_string())),
        };
        if let Err(e) = result {
            return Err(self.record_error(format!(
                "failed to write {}: {}",
                self.target.path.display(),
                e
            )));
        }
        self.header_pending = false;
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
            "Closed csv sink at {} after {} rows",
            self.target.path.display(),
            self.status.records_written
        );
        Ok(())
    }

    fn status(&self) -> SinkStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn record(value: Value) -> CanonicalRecord {
        match value {
            Value::Object(fields) => CanonicalRecord::from(fields),
            other => panic!("not an object: {other}"),
        }
    }

    fn target(path: &Path, mode: WriteMode) -> SinkTarget {
        SinkTarget::new(path, mode).with_columns(vec!["id".to_string(), "price".to_string()])
    }

    #[tokio::test]
    async fn test_header_follows_mapping_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        let mut sink = CsvSink::new(target(&path, WriteMode::Overwrite));

        sink.open().await.unwrap();
        sink.write(&record(json!({"price": 10.5, "id": "a"}))).await.unwrap();
        sink.write(&record(json!({"id": "b, c"}))).await.unwrap();
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,price\na,10.5\n\"b, c\",\n");
    }

    #[tokio::test]
    async fn test_late_fields_extend_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        let mut sink = CsvSink::new(target(&path, WriteMode::Overwrite));

        sink.open().await.unwrap();
        sink.write(&record(json!({"id": "a", "price": 1}))).await.unwrap();
        sink.write(&record(json!({"id": "b", "tags": ["x", "y"]}))).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(sink.columns(), ["id", "price", "tags"]);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,price\na,1\nb,,\"[\"\"x\"\",\"\"y\"\"]\"\n");
    }

    #[tokio::test]
    async fn test_append_does_not_repeat_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.csv");

        for id in ["a", "b"] {
            let mut sink = CsvSink::new(target(&path, WriteMode::Append));
            sink.open().await.unwrap();
            sink.write(&record(json!({"id": id, "price": 2}))).await.unwrap();
            sink.close().await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,price\na,2\nb,2\n");
    }

    #[tokio::test]
    async fn test_rows_are_buffered_until_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.csv");
        let mut sink = CsvSink::new(target(&path, WriteMode::Overwrite));

        sink.open().await.unwrap();
        sink.write(&record(json!({"id": "a", "price": 3}))).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");

        sink.close().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "id,price\na,3\n");
        assert_eq!(sink.status().records_written, 1);
    }

    #[tokio::test]
    async fn test_no_rows_means_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let mut sink = CsvSink::new(target(&path, WriteMode::Overwrite));
        sink.open().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
