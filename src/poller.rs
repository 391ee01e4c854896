//! Background polling of the current playback state.
//!
//! At most one worker runs at a time. The worker sleeps in 100ms ticks so a
//! stop request is honored with bounded latency, and backs off for one full
//! interval when an update cannot be delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::types::PlaybackUpdate;

const CANCEL_TICK: Duration = Duration::from_millis(100);

pub struct PollingLoop {
    client: ApiClient,
    updates: mpsc::UnboundedSender<PlaybackUpdate>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PollingLoop {
    pub fn new(client: ApiClient, updates: mpsc::UnboundedSender<PlaybackUpdate>) -> Self {
        Self {
            client,
            updates,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the polling worker. A no-op if one is already active.
    pub async fn start_polling(&self, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Polling already started");
            return;
        }

        tracing::info!(interval_secs = interval.as_secs_f64(), "Starting track polling");

        let client = self.client.clone();
        let updates = self.updates.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let update = match client.get_current_track().await {
                    Ok(track) => PlaybackUpdate::Track(track),
                    Err(e) => PlaybackUpdate::Error(e.to_string()),
                };

                if updates.send(update).is_err() {
                    // Receiver gone; nothing useful to do but retry later.
                    tracing::warn!("Update channel closed, backing off");
                    if running.load(Ordering::SeqCst) {
                        tokio::time::sleep(interval).await;
                    }
                    continue;
                }

                let mut slept = Duration::ZERO;
                while running.load(Ordering::SeqCst) && slept < interval {
                    tokio::time::sleep(CANCEL_TICK).await;
                    slept += CANCEL_TICK;
                }
            }
            tracing::info!("Polling worker stopped");
        });

        *self.worker.lock().await = Some(handle);
    }

    /// Signal the worker to stop and wait for it to finish. A no-op when
    /// no worker is active.
    pub async fn stop_polling(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping track polling");
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn is_polling(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poller() -> (PollingLoop, mpsc::UnboundedReceiver<PlaybackUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // No token set, so every poll reports "Not authenticated" without
        // touching the network.
        let client = ApiClient::new(tx.clone());
        (PollingLoop::new(client, tx), rx)
    }

    #[tokio::test]
    async fn worker_reports_through_the_update_channel() {
        let (poller, mut rx) = poller();
        poller.start_polling(Duration::from_secs(5)).await;

        match rx.recv().await {
            Some(PlaybackUpdate::Error(message)) => assert_eq!(message, "Not authenticated"),
            other => panic!("expected an error update, got {:?}", other),
        }

        poller.stop_polling().await;
        assert!(!poller.is_polling());
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let (poller, mut rx) = poller();
        poller.start_polling(Duration::from_secs(60)).await;
        poller.start_polling(Duration::from_secs(60)).await;
        assert!(poller.is_polling());

        // One worker means exactly one update before the first sleep.
        let _ = rx.recv().await.expect("first poll result");
        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err(),
            "a second worker would have produced an extra update"
        );

        poller.stop_polling().await;
    }

    #[tokio::test]
    async fn stop_when_idle_returns_immediately() {
        let (poller, _rx) = poller();
        assert!(!poller.is_polling());
        poller.stop_polling().await;
        assert!(!poller.is_polling());
    }

    #[tokio::test]
    async fn stop_is_honored_within_the_cancel_tick() {
        let (poller, _rx) = poller();
        poller.start_polling(Duration::from_secs(3600)).await;
        assert!(poller.is_polling());

        let stopped = tokio::time::timeout(Duration::from_secs(1), poller.stop_polling()).await;
        assert!(stopped.is_ok(), "stop_polling should not wait out the interval");
        assert!(!poller.is_polling());
    }

    #[tokio::test]
    async fn polling_can_restart_after_stop() {
        let (poller, mut rx) = poller();
        poller.start_polling(Duration::from_secs(60)).await;
        let _ = rx.recv().await;
        poller.stop_polling().await;

        poller.start_polling(Duration::from_secs(60)).await;
        assert!(poller.is_polling());
        let _ = rx.recv().await.expect("restarted worker should poll again");
        poller.stop_polling().await;
    }
}
