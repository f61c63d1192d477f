mod logger;
mod slack;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::models::{JobResult, RunTally, RunTimestamp};

pub use logger::TracingObserver;
pub use slack::SlackNotifier;

/// Events emitted by the orchestrator over the life of a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started {
        run_id: Uuid,
        timestamp: RunTimestamp,
        devices: usize,
    },
    JobFinished {
        run_id: Uuid,
        device_id: String,
        result: JobResult,
        attempts: u32,
    },
    Finished {
        run_id: Uuid,
        timestamp: RunTimestamp,
        tally: RunTally,
        failed_devices: Vec<String>,
        summary_path: Option<PathBuf>,
    },
}

/// Receives run events (logging, chat notifications, ...).
///
/// Observer failures are logged by the caller and never affect the run.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn notify(&self, event: &RunEvent) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn RunObserver>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(SlackNotifier::new(webhook.clone())))
        }
    }
}
