//! Application layer: config file, logging, run orchestration and the cron daemon.

pub mod admin;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod runner;

pub use admin::{build_subscription, find_subscriptions, subscribe, SubscribeRequest};
pub use config::{default_path, AppConfig};
pub use daemon::{cron_expression, run_daemon, scheduled_run, validate_schedule};
pub use logging::init_logging;
pub use runner::{RunReport, Runner};

pub const CRATE_NAME: &str = "datalib-sync";
