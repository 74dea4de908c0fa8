use crate::CsvSink;
use feed_core::{Result, Sink, SinkFactory, SinkTarget};

pub struct CsvSinkFactory;

impl SinkFactory for CsvSinkFactory {
    fn name(&self) -> &str {
        "csv"
    }

    fn create(&self, target: SinkTarget) -> Result<Box<dyn Sink>> {
        Ok(Box::new(CsvSink::new(target)))
    }
}
