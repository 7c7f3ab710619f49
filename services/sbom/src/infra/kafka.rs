use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use rdkafka::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::warn;

use crate::domain::repository::EventPublisher;
use crate::domain::types::ClaimedOutboxEvent;
use crate::error::SbomServiceError;

/// Queue timeout for synchronous publishes (`acks=all`).
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Drain window per producer on shutdown.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Lazily constructed, memoized producers, one per topic. Construction
/// happens outside the lock; when two tasks race, the loser's producer is
/// dropped (rdkafka closes it) and the winner is shared.
pub struct WriterPool {
    brokers: String,
    writers: Mutex<HashMap<String, FutureProducer>>,
}

impl WriterPool {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, topic: &str) -> Result<FutureProducer, SbomServiceError> {
        if topic.is_empty() {
            return Err(SbomServiceError::InvalidOutboxMessage(
                "topic must not be empty",
            ));
        }

        if let Some(writer) = self
            .writers
            .lock()
            .expect("writer pool lock poisoned")
            .get(topic)
        {
            return Ok(writer.clone());
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("acks", "all")
            .set("message.timeout.ms", "30000")
            .create()
            .with_context(|| format!("create kafka producer for topic {topic}"))?;

        let mut writers = self.writers.lock().expect("writer pool lock poisoned");
        Ok(writers.entry(topic.to_owned()).or_insert(producer).clone())
    }

    /// Drain and drop every producer. Invoke on shutdown.
    pub fn close_all(&self) {
        let writers: Vec<(String, FutureProducer)> = self
            .writers
            .lock()
            .expect("writer pool lock poisoned")
            .drain()
            .collect();
        for (topic, writer) in writers {
            if let Err(err) = writer.flush(Timeout::After(CLOSE_FLUSH_TIMEOUT)) {
                warn!(topic, error = %err, "kafka producer flush failed on close");
            }
        }
    }
}

/// Broker publish port over the writer pool.
#[derive(Clone)]
pub struct KafkaPublisher {
    pool: Arc<WriterPool>,
}

impl KafkaPublisher {
    pub fn new(pool: Arc<WriterPool>) -> Self {
        Self { pool }
    }
}

impl EventPublisher for KafkaPublisher {
    async fn publish(&self, event: &ClaimedOutboxEvent) -> Result<(), SbomServiceError> {
        let writer = self.pool.get(&event.topic)?;

        let mut headers = OwnedHeaders::new_with_capacity(event.headers.len());
        for (key, value) in &event.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value.as_bytes()),
            });
        }

        let mut record = FutureRecord::<str, [u8]>::to(&event.topic)
            .payload(event.payload.as_slice())
            .headers(headers)
            .timestamp(Utc::now().timestamp_millis());
        if let Some(key) = &event.event_key {
            record = record.key(key.as_str());
        }

        writer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(err, _)| {
                anyhow::Error::new(err).context(format!("publish to topic {}", event.topic))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_topic_is_invalid() {
        let pool = WriterPool::new("localhost:9092");
        assert!(matches!(
            pool.get(""),
            Err(SbomServiceError::InvalidOutboxMessage(_))
        ));
    }

    #[test]
    fn producers_are_memoized_per_topic() {
        let pool = WriterPool::new("localhost:9092");
        pool.get("sbom-events").unwrap();
        pool.get("sbom-events").unwrap();
        pool.get("notification-events").unwrap();
        assert_eq!(pool.writers.lock().unwrap().len(), 2);
    }

    #[test]
    fn close_all_drains_the_pool() {
        let pool = WriterPool::new("localhost:9092");
        pool.get("sbom-events").unwrap();
        pool.close_all();
        assert!(pool.writers.lock().unwrap().is_empty());
    }
}
