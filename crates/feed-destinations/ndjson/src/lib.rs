mod factory;
mod ndjson_sink;

pub use factory::NdjsonSinkFactory;
pub use ndjson_sink::NdjsonSink;
