use async_trait::async_trait;

use crate::core::models::Device;
use crate::error::FetchError;

/// Retrieves the running configuration of a device.
///
/// Implementations own the protocol exchange (SSH, vendor API, ...). The
/// orchestrator only cares that a call either yields the full configuration
/// text or an identifiable error.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch_running_config(&self, device: &Device) -> Result<String, FetchError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
