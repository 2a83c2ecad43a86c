//! Log sinks for pod events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kiln_core::{LogSink, PodEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

/// Default number of events buffered by [`HttpLogSink`].
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Relays events to the log service.
///
/// `push` only enqueues; a background task posts each event to
/// `{base_url}/v1/logs/{log_key}`. When the queue is full the event is
/// dropped with a warning.
#[derive(Debug)]
pub struct HttpLogSink {
    log_key: String,
    tx: mpsc::Sender<PodEvent>,
    dropped: Arc<AtomicU64>,
}

impl HttpLogSink {
    /// Start a sink and its delivery task. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn spawn(base_url: &str, log_key: impl Into<String>, capacity: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, log_key, capacity))
    }

    /// Start a sink with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        log_key: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let log_key = log_key.into();
        let url = format!("{}/v1/logs/{log_key}", base_url.trim_end_matches('/'));
        let (tx, mut rx) = mpsc::channel::<PodEvent>(capacity.max(1));

        let key = log_key.clone();
        tokio::spawn(async move {
            let mut delivered: u64 = 0;
            while let Some(event) = rx.recv().await {
                match client.post(&url).json(&event).send().await {
                    Ok(response) if response.status().is_success() => delivered += 1,
                    Ok(response) => {
                        warn!(log_key = %key, status = %response.status(), "Log service rejected event");
                    }
                    Err(e) => warn!(log_key = %key, error = %e, "Log service request failed"),
                }
            }
            debug!(log_key = %key, delivered, "Log sink closed");
        });

        Self {
            log_key,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log stream this sink writes to.
    #[must_use]
    pub fn log_key(&self) -> &str {
        &self.log_key
    }

    /// Events dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl LogSink for HttpLogSink {
    fn push(&self, event: PodEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "sink closed",
            };
            warn!(log_key = %self.log_key, reason, "Dropping pod event");
        }
    }
}

/// Writes events to the local `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn push(&self, event: PodEvent) {
        if event.is_warning() {
            warn!(pod_name = %event.pod_name, namespace = %event.namespace, "{}", event.summary());
        } else {
            info!(pod_name = %event.pod_name, namespace = %event.namespace, "{}", event.summary());
        }
    }
}
