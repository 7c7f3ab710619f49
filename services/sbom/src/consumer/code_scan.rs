use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{SecondsFormat, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers as _};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::consumer::backoff::Backoff;
use crate::consumer::decode::{decode_code_scan_event, validate_code_scan_event};
use crate::domain::repository::ScanEventHandler;
use crate::domain::types::{
    CODE_SCAN_CONSUMER_GROUP, CODE_SCAN_DLQ_TOPIC, CODE_SCAN_TOPIC, EVENT_TYPE_CODE_SCAN_DONE,
};
use crate::error::{ProcessingError, SbomServiceError};
use crate::infra::kafka::WriterPool;

const DLQ_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch–process–commit loop over `code-scan-results`. Offsets are manual:
/// a message commits only once fully processed or permanently routed to the
/// DLQ, so transient failures replay the same message.
pub struct CodeScanConsumer<H: ScanEventHandler> {
    consumer: StreamConsumer,
    dlq_writer: FutureProducer,
    handler: H,
}

impl<H: ScanEventHandler> CodeScanConsumer<H> {
    pub fn new(brokers: &str, pool: &WriterPool, handler: H) -> Result<Self, SbomServiceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", CODE_SCAN_CONSUMER_GROUP)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .context("create code scan consumer")?;
        consumer
            .subscribe(&[CODE_SCAN_TOPIC])
            .context("subscribe to code scan topic")?;
        let dlq_writer = pool.get(CODE_SCAN_DLQ_TOPIC)?;
        Ok(Self {
            consumer,
            dlq_writer,
            handler,
        })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(topic = CODE_SCAN_TOPIC, "code scan consumer listening");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.consumer.recv() => received,
            };
            let message = match received {
                Ok(message) => message,
                Err(err) => {
                    error!(error = %err, "fetch message failed");
                    if !sleep_with_cancel(&cancel, Duration::from_secs(1)).await {
                        break;
                    }
                    continue;
                }
            };
            if !self.process_with_retry(&message, &cancel).await {
                break;
            }
        }
        info!("code scan consumer stopping");
    }

    /// Retry the same message with backoff until it succeeds or proves
    /// permanent. Returns `false` when cancellation interrupted the work.
    async fn process_with_retry(
        &self,
        message: &BorrowedMessage<'_>,
        cancel: &CancellationToken,
    ) -> bool {
        let mut retry = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        loop {
            match process_scan_payload(&self.handler, message.payload().unwrap_or_default()).await
            {
                Ok(()) => {
                    self.commit(message, cancel).await;
                    return true;
                }
                Err(err) if err.is_permanent() => {
                    warn!(offset = message.offset(), error = %err, "permanent error, routing to dlq");
                    self.publish_dlq(message, &err).await;
                    self.commit(message, cancel).await;
                    return true;
                }
                Err(err) => {
                    let delay = retry.next_delay();
                    warn!(
                        offset = message.offset(),
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying message"
                    );
                    if !sleep_with_cancel(cancel, delay).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Commit with its own bounded retry (base 500ms, max 5s).
    async fn commit(&self, message: &BorrowedMessage<'_>, cancel: &CancellationToken) {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        loop {
            match self.consumer.commit_message(message, CommitMode::Sync) {
                Ok(()) => return,
                Err(err) => {
                    let delay = backoff.next_delay();
                    error!(offset = message.offset(), error = %err, "offset commit failed");
                    if !sleep_with_cancel(cancel, delay).await {
                        return;
                    }
                }
            }
        }
    }

    async fn publish_dlq(&self, message: &BorrowedMessage<'_>, err: &ProcessingError) {
        let record = dlq_record(
            message.topic(),
            message.partition(),
            message.offset(),
            message.key(),
            collect_headers(message),
            message.payload(),
            err,
        );
        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "serialize dlq record failed");
                return;
            }
        };

        let mut dlq_message =
            FutureRecord::<[u8], [u8]>::to(CODE_SCAN_DLQ_TOPIC).payload(payload.as_slice());
        if let Some(key) = message.key() {
            dlq_message = dlq_message.key(key);
        }
        if let Err((err, _)) = self
            .dlq_writer
            .send(dlq_message, Timeout::After(DLQ_PUBLISH_TIMEOUT))
            .await
        {
            error!(error = %err, "dlq write failed");
        }
    }
}

/// Decode, validate and dispatch one inbound payload. Unexpected event types
/// are logged and skipped (success, so the offset commits).
pub(crate) async fn process_scan_payload<H: ScanEventHandler>(
    handler: &H,
    payload: &[u8],
) -> Result<(), ProcessingError> {
    let event = decode_code_scan_event(payload)?;
    validate_code_scan_event(&event)?;

    if event.event_type != EVENT_TYPE_CODE_SCAN_DONE {
        info!(
            event_type = %event.event_type,
            project_id = event.project_id,
            "ignoring unexpected event type"
        );
        return Ok(());
    }

    info!(project = %event.project, "received CODE_SCAN_DONE");
    handler.handle(&event).await
}

pub(crate) fn dlq_record(
    topic: &str,
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    headers: HashMap<String, String>,
    payload: Option<&[u8]>,
    err: &ProcessingError,
) -> Value {
    json!({
        "error": err.to_string(),
        "original_topic": topic,
        "partition": partition,
        "offset": offset,
        "key": String::from_utf8_lossy(key.unwrap_or_default()),
        "headers": headers,
        "payload": String::from_utf8_lossy(payload.unwrap_or_default()),
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true),
    })
}

fn collect_headers(message: &BorrowedMessage<'_>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            let value = header
                .value
                .map(|value| String::from_utf8_lossy(value).into_owned())
                .unwrap_or_default();
            headers.insert(header.key.to_owned(), value);
        }
    }
    headers
}

async fn sleep_with_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
