pub mod config;
pub mod error;
pub mod db;
pub mod records;
pub mod ingest;
pub mod staging;
pub mod normalize;
pub mod tables;
pub mod graph;
pub mod http;
pub mod watch;

pub use config::Config;
pub use error::{CitegraphError, Result};
pub use graph::{CitationGraph, EdgeResolution, Metric};
pub use normalize::{import_batch, ImportReport, NormalizeOptions};
