pub mod logging;
mod runner;

pub use runner::{
    build_pipeline, build_registry, destination_for, run_pipelines, select_providers,
};
