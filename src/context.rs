use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::fetcher::ConfigFetcher;
use crate::core::notifications::{RunObserver, TracingObserver, create_notifier};

/// Everything a backup pass needs, assembled once per invocation.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub fetcher: Arc<dyn ConfigFetcher>,
    pub observers: Vec<Arc<dyn RunObserver>>,
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Context with the tracing observer plus whatever notifier the
    /// configuration asks for.
    pub fn new(config: AppConfig, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        let mut observers: Vec<Arc<dyn RunObserver>> = vec![Arc::new(TracingObserver)];
        if let Some(notifier) = create_notifier(&config.notifications) {
            observers.push(notifier);
        }

        Self {
            config: Arc::new(config),
            fetcher,
            observers,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
