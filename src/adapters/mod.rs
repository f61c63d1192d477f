use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::fetcher::ConfigFetcher;

mod command;
mod simulated;

pub use command::{CommandFetcher, PASSWORD_ENV, SSHPASS_ENV};
pub use simulated::{SimulatedFetcher, Simulator};

/// Pick the fetcher for this process based on configuration.
pub fn get_fetcher(config: &AppConfig) -> Arc<dyn ConfigFetcher> {
    if config.simulation {
        let (fetcher, _simulator) = SimulatedFetcher::new();
        return Arc::new(fetcher);
    }

    Arc::new(CommandFetcher::new(
        config.platforms.clone(),
        Duration::from_secs(config.fetch_timeout_secs),
    ))
}
