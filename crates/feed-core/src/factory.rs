use crate::{Result, Sink, SinkTarget};

/// Factory trait for creating sinks
pub trait SinkFactory: Send + Sync {
    /// Get the name/type identifier for this sink
    fn name(&self) -> &str;

    /// Create a new sink writing to `target`
    fn create(&self, target: SinkTarget) -> Result<Box<dyn Sink>>;
}
