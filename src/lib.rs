pub mod browser;
pub mod commands;
pub mod config;
pub mod element;
pub mod error;
pub mod interaction;
pub mod platforms;
pub mod workflow;

pub use browser::{ChromeLauncher, Connection, Launcher, PageDriver, PageSource};
pub use config::AutomationConfig;
pub use error::{PublishError, Result};
pub use workflow::{Orchestrator, PublishRequest, Stage, WorkflowResult};

/// Install the `env_logger` backend. Defaults to `info`; `RUST_LOG`
/// overrides. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
