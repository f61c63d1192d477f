use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::PlatformCommand;
use crate::core::fetcher::ConfigFetcher;
use crate::core::models::Device;
use crate::error::FetchError;

/// Environment variable carrying the device password to the child process.
pub const PASSWORD_ENV: &str = "CFGSNAP_DEVICE_PASSWORD";

/// Read by `sshpass -e`, which the `<platform>-password` templates use.
pub const SSHPASS_ENV: &str = "SSHPASS";

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Substituted for `{port}` when the device has no port.
const DEFAULT_PORT: u16 = 22;

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT_LEN: usize = 512;

/// Fetches configurations by running a per-platform external command
/// (typically `ssh ... show running-config`) and capturing its stdout.
pub struct CommandFetcher {
    platforms: HashMap<String, PlatformCommand>,
    timeout: Duration,
}

impl CommandFetcher {
    pub fn new(platforms: HashMap<String, PlatformCommand>, timeout: Duration) -> Self {
        Self { platforms, timeout }
    }

    fn build_command(&self, device: &Device) -> Result<Command, FetchError> {
        let template = self
            .platforms
            .get(&device.platform)
            .ok_or_else(|| FetchError::UnsupportedPlatform(device.platform.clone()))?;

        let mut cmd = Command::new(&template.program);
        cmd.args(template.args.iter().map(|arg| render_arg(arg, device)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(password) = &device.password {
            cmd.env(PASSWORD_ENV, password).env(SSHPASS_ENV, password);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl ConfigFetcher for CommandFetcher {
    async fn fetch_running_config(&self, device: &Device) -> Result<String, FetchError> {
        let mut cmd = self.build_command(device)?;
        debug!(device = %device.id, "Spawning fetch command");

        let child = cmd.spawn().map_err(|e| FetchError::Spawn(e.to_string()))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| FetchError::Protocol(format!("failed to collect output: {}", e)))?;

        if !output.status.success() {
            let stderr = stderr_excerpt(&output.stderr);
            return Err(classify_exit(output.status.code(), stderr));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            FetchError::MalformedResponse(format!(
                "output is not UTF-8 text (invalid byte at offset {})",
                e.utf8_error().valid_up_to()
            ))
        })
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Substitute device placeholders in a command argument.
fn render_arg(arg: &str, device: &Device) -> String {
    let port = device.port.unwrap_or(DEFAULT_PORT).to_string();
    let username = device.username.as_deref().unwrap_or_default();

    arg.replace("{host}", &device.hostname)
        .replace("{port}", &port)
        .replace("{username}", username)
        .replace("{id}", &device.id)
        .replace("{platform}", &device.platform)
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn classify_exit(code: Option<i32>, stderr: String) -> FetchError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("permission denied") || lowered.contains("authentication") {
        return FetchError::Authentication(stderr);
    }

    match code {
        Some(SSH_CONNECTION_FAILURE) => FetchError::Unreachable(stderr),
        Some(code) => FetchError::Protocol(format!("exit status {}: {}", code, stderr)),
        None => FetchError::Protocol(format!("terminated by signal: {}", stderr)),
    }
}
