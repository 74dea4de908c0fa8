use crate::{Error, Extractor, InputFormat, Result, SinkFactory};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry for sink factories and format extractors
pub struct Registry {
    sink_factories: HashMap<String, Arc<dyn SinkFactory>>,
    extractors: HashMap<InputFormat, Arc<dyn Extractor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sink_factories: HashMap::new(),
            extractors: HashMap::new(),
        }
    }

    /// Register a sink factory
    pub fn register_sink(&mut self, factory: Arc<dyn SinkFactory>) {
        let name = factory.name().to_string();
        self.sink_factories.insert(name, factory);
    }

    /// Register the extractor of its input format, replacing any previous one
    pub fn register_extractor(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.format(), extractor);
    }

    /// Get a sink factory by name
    pub fn get_sink_factory(&self, name: &str) -> Result<Arc<dyn SinkFactory>> {
        self.sink_factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Sink factory '{}' not found", name)))
    }

    /// Get the extractor for an input format
    pub fn get_extractor(&self, format: InputFormat) -> Result<Arc<dyn Extractor>> {
        self.extractors
            .get(&format)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("No extractor registered for '{}'", format)))
    }

    /// List all registered sink types
    pub fn list_sinks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sink_factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all input formats with an extractor
    pub fn list_formats(&self) -> Vec<InputFormat> {
        let mut formats: Vec<InputFormat> = self.extractors.keys().copied().collect();
        formats.sort_by_key(|f| f.to_string());
        formats
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
