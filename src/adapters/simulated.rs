use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::core::fetcher::ConfigFetcher;
use crate::core::models::Device;
use crate::error::FetchError;

#[derive(Debug, Clone)]
enum Response {
    Config(String),
    Error(FetchError),
    Panic(String),
}

#[derive(Debug, Default)]
struct Script {
    delay: Option<Duration>,
    /// Errors returned, in order, before `response` applies.
    leading_failures: VecDeque<FetchError>,
    response: Option<Response>,
}

#[derive(Default)]
struct SharedState {
    scripts: Mutex<HashMap<String, Script>>,
    fetches: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SharedState {
    fn scripts(&self) -> MutexGuard<'_, HashMap<String, Script>> {
        self.scripts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fetches(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.fetches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle for scripting the simulated fetcher from tests or a dry run.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<SharedState>,
}

impl Simulator {
    /// Return `text` for `device_id`.
    pub fn respond(&self, device_id: &str, text: &str) {
        self.state
            .scripts()
            .entry(device_id.to_string())
            .or_default()
            .response = Some(Response::Config(text.to_string()));
    }

    /// Fail every fetch for `device_id` with `error`.
    pub fn fail(&self, device_id: &str, error: FetchError) {
        self.state
            .scripts()
            .entry(device_id.to_string())
            .or_default()
            .response = Some(Response::Error(error));
    }

    /// Fail the next `times` fetches for `device_id`, then fall through to
    /// the scripted (or default) response.
    pub fn fail_times(&self, device_id: &str, times: u32, error: FetchError) {
        let mut scripts = self.state.scripts();
        let script = scripts.entry(device_id.to_string()).or_default();
        for _ in 0..times {
            script.leading_failures.push_back(error.clone());
        }
    }

    /// Panic inside the fetch for `device_id`.
    pub fn panic(&self, device_id: &str, message: &str) {
        self.state
            .scripts()
            .entry(device_id.to_string())
            .or_default()
            .response = Some(Response::Panic(message.to_string()));
    }

    /// Hold every fetch for `device_id` for `delay` before answering.
    pub fn delay(&self, device_id: &str, delay: Duration) {
        self.state
            .scripts()
            .entry(device_id.to_string())
            .or_default()
            .delay = Some(delay);
    }

    pub fn fetch_count(&self, device_id: &str) -> u32 {
        self.state.fetches().get(device_id).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> u32 {
        self.state.fetches().values().sum()
    }

    /// Highest number of fetches observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

/// In-process fetcher with scripted per-device behaviour.
///
/// Devices without a script get a small generated configuration, which makes
/// this usable for dry runs against a real inventory.
pub struct SimulatedFetcher {
    state: Arc<SharedState>,
}

impl SimulatedFetcher {
    pub fn new() -> (Self, Simulator) {
        let state = Arc::new(SharedState::default());
        (
            Self {
                state: state.clone(),
            },
            Simulator { state },
        )
    }

    fn next_response(&self, device: &Device) -> (Option<Duration>, Response) {
        let mut scripts = self.state.scripts();
        match scripts.get_mut(&device.id) {
            Some(script) => {
                let response = match script.leading_failures.pop_front() {
                    Some(err) => Response::Error(err),
                    None => script
                        .response
                        .clone()
                        .unwrap_or_else(|| Response::Config(default_config(device))),
                };
                (script.delay, response)
            }
            None => (None, Response::Config(default_config(device))),
        }
    }
}

/// Decrements the in-flight counter even if the fetch panics.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigFetcher for SimulatedFetcher {
    async fn fetch_running_config(&self, device: &Device) -> Result<String, FetchError> {
        *self.state.fetches().entry(device.id.clone()).or_insert(0) += 1;

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.state.in_flight);

        let (delay, response) = self.next_response(device);
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        match response {
            Response::Config(text) => Ok(text),
            Response::Error(err) => Err(err),
            Response::Panic(message) => panic!("{}", message),
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

fn default_config(device: &Device) -> String {
    format!(
        "! simulated {} configuration\nhostname {}\n!\nend\n",
        device.platform, device.id
    )
}
