//! Background expiration sweep.
//!
//! One task per store, woken on a fixed interval. Each tick removes expired
//! sessions one entry at a time, so readers and writers of other sessions
//! never wait on the sweep as a whole.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::SessionStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct SessionSweeper;

impl SessionSweeper {
    /// Spawn the sweep loop. The first sweep runs one `interval` from now.
    pub fn start(store: Arc<SessionStore>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!(interval_secs = period.as_secs_f64(), "Session sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Session sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired();
                        if removed > 0 {
                            info!(removed, remaining = store.len(), "Expired sessions swept");
                        } else {
                            debug!("Sweep tick, nothing expired");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle for a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        // A closed channel means the task is already gone
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Session sweeper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionSettings;
    use chrono::Utc;
    use qalam_core::clock::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_sessions_on_tick() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(
            SessionStore::new(SessionSettings {
                ttl: chrono::Duration::seconds(1),
                ..SessionSettings::default()
            })
            .with_clock(clock.clone()),
        );
        store.create(None).unwrap();
        store.create(None).unwrap();

        let sweeper = SessionSweeper::start(store.clone(), Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(store.len(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 0);

        sweeper.stop().await;
    }

    #[tokio::test]
    async fn stop_ends_the_task() {
        let store = Arc::new(SessionStore::default());
        let sweeper = SessionSweeper::start(store, DEFAULT_SWEEP_INTERVAL);
        assert!(!sweeper.is_finished());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn live_sessions_survive_sweeps() {
        let store = Arc::new(SessionStore::default());
        let id = store.create(None).unwrap();

        let sweeper = SessionSweeper::start(store.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.get(&id).is_ok());
        sweeper.stop().await;
    }
}
