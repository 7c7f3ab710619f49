use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::repository::OutboxDispatchStore;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STALE_AFTER_MINUTES: i64 = 5;

/// Crash-recovery companion to the dispatcher: rows claimed into
/// `processing` by a dispatcher that died stay invisible to `claim_batch`
/// forever; this task periodically reverts old ones to `pending`.
pub struct StaleOutboxSweeper<S: OutboxDispatchStore> {
    store: S,
    sweep_interval: Duration,
    stale_after: chrono::Duration,
}

impl<S: OutboxDispatchStore> StaleOutboxSweeper<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stale_after: chrono::Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "stale outbox sweeper started"
        );
        loop {
            self.sweep().await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stale outbox sweeper stopping");
                    return;
                }
                _ = tokio::time::sleep(self.sweep_interval) => {}
            }
        }
    }

    async fn sweep(&self) {
        match self.store.requeue_stale(self.stale_after).await {
            Ok(0) => {}
            Ok(revived) => warn!(revived, "requeued stale processing outbox rows"),
            Err(err) => error!(error = %err, "stale outbox sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use uuid::Uuid;

    use crate::domain::types::ClaimedOutboxEvent;
    use crate::error::SbomServiceError;

    #[derive(Default)]
    struct MockStore {
        thresholds: Mutex<Vec<chrono::Duration>>,
    }

    impl OutboxDispatchStore for MockStore {
        async fn claim_batch(
            &self,
            _limit: u64,
        ) -> Result<Vec<ClaimedOutboxEvent>, SbomServiceError> {
            Ok(Vec::new())
        }

        async fn mark_sent(&self, _id: Uuid) -> Result<(), SbomServiceError> {
            Ok(())
        }

        async fn mark_failed(
            &self,
            _event: &ClaimedOutboxEvent,
            _error: &str,
        ) -> Result<(), SbomServiceError> {
            Ok(())
        }

        async fn requeue_stale(
            &self,
            older_than: chrono::Duration,
        ) -> Result<u64, SbomServiceError> {
            self.thresholds.lock().unwrap().push(older_than);
            Ok(2)
        }
    }

    #[tokio::test]
    async fn sweep_uses_the_five_minute_threshold() {
        let sweeper = StaleOutboxSweeper::new(MockStore::default());
        sweeper.sweep().await;
        assert_eq!(
            *sweeper.store.thresholds.lock().unwrap(),
            vec![chrono::Duration::minutes(5)]
        );
    }
}
