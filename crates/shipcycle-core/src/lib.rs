//! shipcycle-core: pure domain model for the build-and-ship cycle.
//! Scoring, trend pool maintenance, queue ordering and monitor rules.
//! No IO, no async: every function takes `now` explicitly.

pub mod config;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod scoring;
pub mod trend_pool;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
