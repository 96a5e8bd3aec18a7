//! Install and usage events sent to a PostHog-compatible batch endpoint.
//!
//! Events are queued on a channel and delivered by one background worker,
//! either when the flush interval elapses or when the client is closed.
//! A disabled client accepts events and drops them.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::db::{now_rfc3339, DbPool};

/// Attribute key holding the installation id
pub const INSTALLATION_ID_KEY: &str = "installation_id";

pub const INSTALL_EVENT: &str = "InstallationSuccess";

const QUEUE_CAPACITY: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub event: String,
    pub distinct_id: String,
    pub properties: serde_json::Value,
    pub timestamp: String,
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    api_key: &'a str,
    batch: &'a [TelemetryEvent],
}

struct Worker {
    tx: mpsc::Sender<TelemetryEvent>,
    handle: JoinHandle<()>,
    installation_id: String,
}

pub struct TelemetryClient {
    worker: Option<Worker>,
}

/// Load the installation id, creating it on first use
pub async fn installation_id(db: &DbPool) -> Result<String, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO telemetry_attributes (key, value) VALUES (?, ?)")
        .bind(INSTALLATION_ID_KEY)
        .bind(uuid::Uuid::new_v4().to_string())
        .execute(db)
        .await?;
    sqlx::query_scalar::<_, String>("SELECT value FROM telemetry_attributes WHERE key = ?")
        .bind(INSTALLATION_ID_KEY)
        .fetch_one(db)
        .await
}

impl TelemetryClient {
    pub fn disabled() -> Self {
        Self { worker: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the worker and queue the install event.
    pub async fn start(db: &DbPool, config: &TelemetryConfig) -> Result<Self, sqlx::Error> {
        if !config.enabled {
            debug!("Telemetry disabled");
            return Ok(Self::disabled());
        }

        let installation_id = installation_id(db).await?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run_worker(
            rx,
            reqwest::Client::new(),
            config.endpoint.clone(),
            config.api_key.clone().unwrap_or_default(),
            Duration::from_secs(config.flush_interval_secs.max(1)),
        ));

        info!(installation_id = %installation_id, "Telemetry enabled");
        let client = Self {
            worker: Some(Worker {
                tx,
                handle,
                installation_id,
            }),
        };
        client.capture(
            INSTALL_EVENT,
            serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        );
        Ok(client)
    }

    /// Queue an event. Never blocks; a full queue drops the event.
    pub fn capture(&self, event: &str, properties: serde_json::Value) {
        let Some(worker) = &self.worker else {
            return;
        };
        let event = TelemetryEvent {
            event: event.to_string(),
            distinct_id: worker.installation_id.clone(),
            properties,
            timestamp: now_rfc3339(),
        };
        if let Err(e) = worker.tx.try_send(event) {
            warn!(error = %e, "Telemetry event dropped");
        }
    }

    /// Flush queued events and stop the worker.
    pub async fn close(self) {
        let Some(worker) = self.worker else {
            return;
        };
        info!("Flushing telemetry events");
        drop(worker.tx);
        if tokio::time::timeout(CLOSE_TIMEOUT, worker.handle).await.is_err() {
            warn!("Telemetry flush timed out");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<TelemetryEvent>,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    flush_interval: Duration,
) {
    let mut buffer = Vec::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => buffer.push(event),
                None => break,
            },
            _ = ticker.tick() => flush(&client, &endpoint, &api_key, &mut buffer).await,
        }
    }

    flush(&client, &endpoint, &api_key, &mut buffer).await;
    debug!("Telemetry worker stopped");
}

async fn flush(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    buffer: &mut Vec<TelemetryEvent>,
) {
    if buffer.is_empty() {
        return;
    }
    let payload = BatchPayload {
        api_key,
        batch: buffer.as_slice(),
    };
    match client.post(endpoint).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(count = buffer.len(), "Telemetry events sent");
        }
        Ok(resp) => warn!(status = %resp.status(), "Telemetry endpoint rejected events"),
        Err(e) => warn!(error = %e, "Failed to send telemetry events"),
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[tokio::test]
    async fn test_installation_id_is_stable() {
        let db = init_in_memory().await.unwrap();
        let first = installation_id(&db).await.unwrap();
        let second = installation_id(&db).await.unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_disabled_client_is_noop() {
        let db = init_in_memory().await.unwrap();
        let client = TelemetryClient::start(&db, &TelemetryConfig::default())
            .await
            .unwrap();
        assert!(!client.is_enabled());
        client.capture("anything", serde_json::json!({}));
        client.close().await;

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM telemetry_attributes")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_close_flushes_to_unreachable_endpoint_without_hanging() {
        let db = init_in_memory().await.unwrap();
        let config = TelemetryConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/batch/".to_string(),
            api_key: Some("test".to_string()),
            flush_interval_secs: 3600,
        };
        let client = TelemetryClient::start(&db, &config).await.unwrap();
        assert!(client.is_enabled());
        client.close().await;
    }
}
