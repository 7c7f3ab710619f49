#![allow(async_fn_in_trait)]

use uuid::Uuid;

use crate::domain::types::{
    ClaimedOutboxEvent, CodeScanEvent, NewSbomRecord, OutboxMessage, ParsedSbom, QuotaDecision,
    UpsertedSbom,
};
use crate::error::{ProcessingError, SbomServiceError};

/// Producer-side port of the outbox: durably stage an event for delivery.
pub trait OutboxEnqueue: Send + Sync {
    /// Insert one `pending` row. A duplicate `dedup_key` is a silent success.
    /// Empty topic or null payload fail with an invalid-argument error.
    async fn enqueue(&self, msg: OutboxMessage) -> Result<(), SbomServiceError>;
}

/// Dispatcher-side port of the outbox.
pub trait OutboxDispatchStore: Send + Sync {
    /// Claim up to `limit` eligible rows in one transaction using
    /// `FOR UPDATE SKIP LOCKED`; claimed rows move to `processing` and are
    /// owned by this caller until finalised.
    async fn claim_batch(&self, limit: u64) -> Result<Vec<ClaimedOutboxEvent>, SbomServiceError>;

    /// Finalise a delivered row: `sent`, retry schedule and error cleared.
    async fn mark_sent(&self, id: Uuid) -> Result<(), SbomServiceError>;

    /// Record a failed publish: bump attempts, schedule the next retry, or
    /// park the row as `failed` once the attempt cap is reached.
    async fn mark_failed(
        &self,
        event: &ClaimedOutboxEvent,
        error: &str,
    ) -> Result<(), SbomServiceError>;

    /// Re-queue rows stuck in `processing` longer than `older_than`
    /// (dispatcher crash recovery). Returns the number of rows revived.
    async fn requeue_stale(
        &self,
        older_than: chrono::Duration,
    ) -> Result<u64, SbomServiceError>;
}

/// Broker publish port used by the dispatcher.
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ClaimedOutboxEvent) -> Result<(), SbomServiceError>;
}

/// Project registry lookups.
pub trait ProjectStore: Send + Sync {
    /// Resolve the owning organization; `None` when the project is unknown.
    async fn organization_id(&self, project_id: i64) -> Result<Option<i64>, SbomServiceError>;
}

/// Persisted SBOM documents.
pub trait SbomStore: Send + Sync {
    /// Upsert by `(project_name, manifest_name)`: re-running the scan
    /// handler updates the existing row in place.
    async fn upsert(&self, record: NewSbomRecord<'_>) -> Result<UpsertedSbom, SbomServiceError>;
}

/// Usage-accounting gate over the `check_and_consume_usage` /
/// `revert_usage` stored functions.
pub trait QuotaGate: Send + Sync {
    async fn check_and_consume(
        &self,
        org_id: i64,
        resource: &str,
        amount: i64,
    ) -> Result<QuotaDecision, SbomServiceError>;

    /// Return the unused portion of a reservation. Compensation, not a
    /// correctness hinge: failures are logged, never surfaced.
    async fn release_unused(&self, org_id: i64, resource: &str, reserved: i64, succeeded: i64);
}

/// Opaque manifest-to-CycloneDX parser (external subprocess).
pub trait ManifestParser: Send + Sync {
    async fn parse(
        &self,
        project: &str,
        manifest_name: &str,
        content: &[u8],
    ) -> Result<ParsedSbom, SbomServiceError>;
}

/// Opaque blob-storage collaborator. `Ok(None)` means no upload happened
/// (unconfigured or best-effort failure); generation proceeds without a URL.
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<Option<String>, SbomServiceError>;
}

/// Business handler for decoded scan events, classified for the consumer:
/// permanent errors dead-letter the message, transient errors retry it.
pub trait ScanEventHandler: Send + Sync {
    async fn handle(&self, event: &CodeScanEvent) -> Result<(), ProcessingError>;
}
