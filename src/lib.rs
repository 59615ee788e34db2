// Probe Console
// Parallel probe collection, measurement history with trend analysis, and live push to viewers

// Pipeline
pub mod broadcast;
pub mod cache;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod probes;

// Application shell
pub mod cli;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod observability;
pub mod signals;

pub use context::AppContext;
pub use model::{Category, MeasurementRecord, Snapshot, Status};
