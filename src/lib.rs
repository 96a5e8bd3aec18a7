pub mod api;
pub mod app;
pub mod ci;
pub mod config;
pub mod crypto;
pub mod db;
pub mod notifier;
pub mod rbac;
pub mod telemetry;

pub use app::App;
pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::notifier::Notifier;
use crate::rbac::Enforcer;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub enforcer: Arc<dyn Enforcer>,
    pub notifier: Notifier,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, enforcer: Arc<dyn Enforcer>, notifier: Notifier) -> Self {
        Self {
            config,
            db,
            enforcer,
            notifier,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
