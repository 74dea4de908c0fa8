mod json_extractor;

pub use json_extractor::JsonExtractor;
