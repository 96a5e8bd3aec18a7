//! Process bootstrap: wires the database, policy engine, notification
//! services, router and telemetry, then serves HTTP until shutdown.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{self, metrics::init_metrics};
use crate::config::Config;
use crate::crypto::SecretCipher;
use crate::db;
use crate::notifier::Notifier;
use crate::rbac::{spawn_policy_reload_task, PolicyEnforcer};
use crate::telemetry::TelemetryClient;
use crate::AppState;

pub struct App {
    state: Arc<AppState>,
    enforcer: Arc<PolicyEnforcer>,
    telemetry: TelemetryClient,
    reload_task: Option<JoinHandle<()>>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        ensure_database_dir(&config.database.url)?;
        let db = db::init(&config.database).await?;

        api::auth::ensure_admin_user(&db, &config.auth).await?;

        let enforcer = Arc::new(
            PolicyEnforcer::load(db.clone())
                .await
                .context("Failed to load RBAC policies")?,
        );

        let cipher = SecretCipher::new(config.encryption_key());
        if !cipher.is_enabled() {
            warn!("auth.encryption_key is not set, channel secrets are stored unencrypted");
        }
        let notifier = Notifier::new(db.clone(), cipher);

        let telemetry = match TelemetryClient::start(&db, &config.telemetry).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "telemetry installation success event failed");
                TelemetryClient::disabled()
            }
        };

        let mut state = AppState::new(config, db, enforcer.clone(), notifier);
        match init_metrics() {
            Ok(handle) => state = state.with_metrics(handle),
            Err(e) => warn!(error = %e, "Metrics recorder not installed"),
        }

        Ok(Self {
            state: Arc::new(state),
            enforcer,
            telemetry,
            reload_task: None,
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Serve HTTP until `shutdown` resolves.
    pub async fn start<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.state.config;
        self.reload_task =
            spawn_policy_reload_task(self.enforcer.clone(), config.rbac.reload_interval_secs);

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("Invalid server address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!(%addr, "starting server");

        let router = api::create_router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                error!(error = %e, "error in startup");
                anyhow::Error::from(e)
            })?;

        info!("Server stopped");
        Ok(())
    }

    /// Stop background work, flush telemetry and close the pool.
    pub async fn stop(self) {
        info!("orchestrator shutdown initiating");
        if let Some(task) = self.reload_task {
            task.abort();
        }
        self.telemetry.close().await;
        self.state.db.close().await;
    }
}

/// Create the parent directory of a file-backed SQLite url
fn ensure_database_dir(url: &str) -> Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
