//! Relaying pod events to a log sink while a build starts up.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kiln_core::LogSink;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::ClusterGateway;
use crate::Result;

/// A running event watch. Pass it to [`PodEventWatcher::stop`].
#[derive(Debug)]
pub struct WatchHandle {
    pod_name: String,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Pod being watched.
    #[must_use]
    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }
}

/// Starts and stops pod event watches.
#[derive(Debug, Clone, Copy)]
pub struct PodEventWatcher {
    stop_timeout: Duration,
}

impl PodEventWatcher {
    /// Create a watcher whose `stop` waits at most `stop_timeout`.
    #[must_use]
    pub const fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }

    /// Open the event stream and spawn a task pushing each event to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    pub async fn start(
        &self,
        gateway: &dyn ClusterGateway,
        namespace: &str,
        pod_name: &str,
        sink: Arc<dyn LogSink>,
    ) -> Result<WatchHandle> {
        let mut events = gateway.watch_pod_events(pod_name, namespace).await?;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let watched = pod_name.to_string();
        let task = tokio::spawn(async move {
            let mut relayed: u64 = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            relayed += 1;
                            sink.push(event);
                        }
                        Some(Err(e)) => {
                            debug!(pod_name = %watched, error = %e, "Event watch error, will retry");
                        }
                        None => {
                            debug!(pod_name = %watched, "Event stream ended");
                            break;
                        }
                    },
                }
            }
            debug!(pod_name = %watched, relayed, "Event watch finished");
        });

        info!(pod_name, namespace, "Started pod event watch");
        Ok(WatchHandle {
            pod_name: pod_name.to_string(),
            stop_tx,
            task,
        })
    }

    /// Stop a watch. Never fails; problems are logged.
    pub async fn stop(&self, handle: WatchHandle) {
        let WatchHandle {
            pod_name,
            stop_tx,
            mut task,
        } = handle;

        // The task may already have exited, dropping the receiver.
        let _ = stop_tx.send(());

        match tokio::time::timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(())) => debug!(pod_name, "Stopped pod event watch"),
            Ok(Err(e)) => warn!(pod_name, error = %e, "Pod event watch task failed"),
            Err(_) => {
                warn!(pod_name, "Pod event watch did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGateway, RecordingSink};
    use kiln_core::PodEvent;

    fn event(reason: &str) -> PodEvent {
        PodEvent {
            pod_name: "build-1".into(),
            namespace: "ci".into(),
            event_type: "Normal".into(),
            reason: Some(reason.into()),
            message: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn relays_events_until_stopped() {
        let gateway = MockGateway::new();
        gateway.push_event(event("Scheduled"));
        gateway.push_event(event("Pulling"));
        let sink = Arc::new(RecordingSink::new());
        let watcher = PodEventWatcher::new(Duration::from_secs(5));

        let handle = watcher
            .start(&gateway, "ci", "build-1", sink.clone())
            .await
            .unwrap();
        assert_eq!(handle.pod_name(), "build-1");

        sink.wait_for(2).await;
        watcher.stop(handle).await;

        let reasons: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| e.reason)
            .collect();
        assert_eq!(reasons, vec!["Scheduled", "Pulling"]);
    }

    #[tokio::test]
    async fn stop_after_stream_ended_does_not_fail() {
        let gateway = MockGateway::new();
        gateway.set_events_end(true);
        let sink = Arc::new(RecordingSink::new());
        let watcher = PodEventWatcher::new(Duration::from_secs(5));

        let handle = watcher
            .start(&gateway, "ci", "build-1", sink.clone())
            .await
            .unwrap();
        tokio::task::yield_now().await;
        watcher.stop(handle).await;
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn stream_errors_are_skipped() {
        let gateway = MockGateway::new();
        gateway.push_event_error("connection reset");
        gateway.push_event(event("Started"));
        let sink = Arc::new(RecordingSink::new());
        let watcher = PodEventWatcher::new(Duration::from_secs(5));

        let handle = watcher
            .start(&gateway, "ci", "build-1", sink.clone())
            .await
            .unwrap();
        sink.wait_for(1).await;
        watcher.stop(handle).await;
        assert_eq!(sink.events().len(), 1);
    }
}
