//! Reference implementations of the data and model ports.

/// Delimited-text dataset loader.
pub mod csv_loader;
/// In-process experiment registry.
pub mod registry;

pub use csv_loader::CsvDataRepository;
pub use registry::{InMemoryModelRegistry, RegisteredRun};
