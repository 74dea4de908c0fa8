mod csv_sink;
mod factory;

pub use csv_sink::CsvSink;
pub use factory::CsvSinkFactory;
