use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::repository::{EventPublisher, OutboxDispatchStore};
use crate::error::SbomServiceError;

const DEFAULT_BATCH_SIZE: u64 = 20;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Periodic publisher loop: claim a batch of eligible outbox rows, publish
/// each in claim order, finalise each row, sleep. Multiple replicas drain
/// cooperatively since claiming uses `FOR UPDATE SKIP LOCKED` underneath.
pub struct OutboxDispatcher<S, P>
where
    S: OutboxDispatchStore,
    P: EventPublisher,
{
    store: S,
    publisher: P,
    batch_size: u64,
    poll_interval: Duration,
}

impl<S, P> OutboxDispatcher<S, P>
where
    S: OutboxDispatchStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "outbox dispatcher started"
        );
        loop {
            if let Err(err) = self.dispatch_batch().await {
                error!(error = %err, "dispatch batch failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox dispatcher stopping");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn dispatch_batch(&self) -> Result<(), SbomServiceError> {
        let events = self.store.claim_batch(self.batch_size).await?;
        for event in events {
            match self.publisher.publish(&event).await {
                Ok(()) => {
                    if let Err(err) = self.store.mark_sent(event.id).await {
                        error!(event_id = %event.id, error = %err, "mark sent failed");
                    }
                }
                Err(publish_err) => {
                    warn!(
                        event_id = %event.id,
                        topic = %event.topic,
                        error = %publish_err,
                        "publish failed"
                    );
                    if let Err(err) = self
                        .store
                        .mark_failed(&event, &publish_err.to_string())
                        .await
                    {
                        error!(event_id = %event.id, error = %err, "mark failed failed");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use uuid::Uuid;

    use crate::domain::types::ClaimedOutboxEvent;

    fn claimed(topic: &str) -> ClaimedOutboxEvent {
        ClaimedOutboxEvent {
            id: Uuid::new_v4(),
            topic: topic.to_owned(),
            event_key: Some("project-42".to_owned()),
            event_type: Some("sbom.batch_created".to_owned()),
            payload: br#"{"project_id":42}"#.to_vec(),
            headers: HashMap::new(),
            attempts: 0,
        }
    }

    #[derive(Default)]
    struct MockDispatchStore {
        batches: Mutex<VecDeque<Vec<ClaimedOutboxEvent>>>,
        sent: Mutex<Vec<Uuid>>,
        failed: Mutex<Vec<(Uuid, String)>>,
    }

    impl OutboxDispatchStore for MockDispatchStore {
        async fn claim_batch(
            &self,
            _limit: u64,
        ) -> Result<Vec<ClaimedOutboxEvent>, SbomServiceError> {
            Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn mark_sent(&self, id: Uuid) -> Result<(), SbomServiceError> {
            self.sent.lock().unwrap().push(id);
            Ok(())
        }

        async fn mark_failed(
            &self,
            event: &ClaimedOutboxEvent,
            error: &str,
        ) -> Result<(), SbomServiceError> {
            self.failed
                .lock()
                .unwrap()
                .push((event.id, error.to_owned()));
            Ok(())
        }

        async fn requeue_stale(
            &self,
            _older_than: chrono::Duration,
        ) -> Result<u64, SbomServiceError> {
            Ok(0)
        }
    }

    /// Publishes succeed unless the topic is listed as broken.
    #[derive(Default)]
    struct MockPublisher {
        broken_topics: Vec<String>,
        published: Mutex<Vec<Uuid>>,
    }

    impl EventPublisher for MockPublisher {
        async fn publish(&self, event: &ClaimedOutboxEvent) -> Result<(), SbomServiceError> {
            if self.broken_topics.contains(&event.topic) {
                return Err(SbomServiceError::Internal(anyhow::anyhow!(
                    "broker unavailable"
                )));
            }
            self.published.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivered_events_are_marked_sent_in_claim_order() {
        let first = claimed("sbom-events");
        let second = claimed("sbom-events");
        let ids = vec![first.id, second.id];

        let store = MockDispatchStore::default();
        store.batches.lock().unwrap().push_back(vec![first, second]);
        let dispatcher = OutboxDispatcher::new(store, MockPublisher::default());

        dispatcher.dispatch_batch().await.unwrap();

        assert_eq!(*dispatcher.publisher.published.lock().unwrap(), ids);
        assert_eq!(*dispatcher.store.sent.lock().unwrap(), ids);
        assert!(dispatcher.store.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_publish_marks_the_row_failed_and_continues() {
        let broken = claimed("notification-events");
        let healthy = claimed("sbom-events");
        let broken_id = broken.id;
        let healthy_id = healthy.id;

        let store = MockDispatchStore::default();
        store
            .batches
            .lock()
            .unwrap()
            .push_back(vec![broken, healthy]);
        let publisher = MockPublisher {
            broken_topics: vec!["notification-events".to_owned()],
            ..Default::default()
        };
        let dispatcher = OutboxDispatcher::new(store, publisher);

        dispatcher.dispatch_batch().await.unwrap();

        let failed = dispatcher.store.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, broken_id);
        assert!(failed[0].1.contains("broker unavailable"));
        assert_eq!(*dispatcher.store.sent.lock().unwrap(), vec![healthy_id]);
    }

    #[tokio::test]
    async fn empty_claim_publishes_nothing() {
        let dispatcher = OutboxDispatcher::new(MockDispatchStore::default(), MockPublisher::default());
        dispatcher.dispatch_batch().await.unwrap();
        assert!(dispatcher.publisher.published.lock().unwrap().is_empty());
        assert!(dispatcher.store.sent.lock().unwrap().is_empty());
    }
}
