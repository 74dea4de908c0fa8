use crate::NdjsonSink;
use feed_core::{Result, Sink, SinkFactory, SinkTarget};

pub struct NdjsonSinkFactory;

impl SinkFactory for NdjsonSinkFactory {
    fn name(&self) -> &str {
        "ndjson"
    }

    fn create(&self, target: SinkTarget) -> Result<Box<dyn Sink>> {
        Ok(Box::new(NdjsonSink::new(target)))
    }
}
