//! CI observation: watch a pull request's checks to a terminal verdict.

pub mod config;
pub mod executor;
pub mod gh;
pub mod monitor;
pub mod types;

pub use config::CiWatchConfig;
pub use executor::CiExecutor;
pub use gh::GhCheckProvider;
pub use monitor::{CheckProvider, CiMonitor, CiWatcher, WatchSpec, evaluate_checks, filter_checks};
pub use types::{BucketClass, CheckBucket, CheckResult, CheckSummary, CiProgress, CiStatus, CiWatchResult, WatchPhase};
