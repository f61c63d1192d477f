use std::time::Duration;

use super::{RunEvent, RunObserver};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

/// Failed device names listed in one message before truncating.
const MAX_LISTED_FAILURES: usize = 20;

/// Upper bound on one webhook post, connect included.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts the outcome of each run to a Slack incoming webhook.
///
/// Per-device events are not forwarded; one message per run is enough.
pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self::with_timeout(webhook_url, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(webhook_url: String, timeout: Duration) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn format_message(&self, event: &RunEvent) -> Option<serde_json::Value> {
        match event {
            RunEvent::Finished {
                run_id,
                timestamp,
                tally,
                failed_devices,
                summary_path,
            } => {
                let run_id = run_id.to_string();
                let short_id = &run_id[..8.min(run_id.len())];
                let title = if tally.all_succeeded() {
                    "Config Backup Complete"
                } else {
                    "Config Backup Completed With Failures"
                };

                let mut blocks = vec![
                    json!({
                        "type": "header",
                        "text": {
                            "type": "plain_text",
                            "text": title,
                            "emoji": true
                        }
                    }),
                    json!({
                        "type": "section",
                        "fields": [
                            {
                                "type": "mrkdwn",
                                "text": format!("*Run:*\n`{}`", short_id)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!("*Started:*\n{}", timestamp)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!("*Succeeded:*\n{}/{}", tally.succeeded, tally.total)
                            },
                            {
                                "type": "mrkdwn",
                                "text": format!(
                                    "*Summary:*\n`{}`",
                                    summary_path
                                        .as_ref()
                                        .map(|p| p.display().to_string())
                                        .unwrap_or_else(|| "not written".to_string())
                                )
                            }
                        ]
                    }),
                ];

                if !failed_devices.is_empty() {
                    let mut listed = failed_devices
                        .iter()
                        .take(MAX_LISTED_FAILURES)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ");
                    if failed_devices.len() > MAX_LISTED_FAILURES {
                        listed.push_str(&format!(
                            " ... and {} more",
                            failed_devices.len() - MAX_LISTED_FAILURES
                        ));
                    }

                    blocks.push(json!({
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!("*Failed devices:*\n```{}```", listed)
                        }
                    }));
                }

                Some(json!({ "blocks": blocks }))
            }
            RunEvent::Started { .. } | RunEvent::JobFinished { .. } => None,
        }
    }
}

#[async_trait]
impl RunObserver for SlackNotifier {
    async fn notify(&self, event: &RunEvent) -> Result<()> {
        let Some(payload) = self.format_message(event) else {
            return Ok(());
        };

        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
