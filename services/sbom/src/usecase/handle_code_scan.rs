use anyhow::anyhow;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::repository::{
    BlobStore, ManifestParser, OutboxEnqueue, ProjectStore, QuotaGate, SbomStore,
    ScanEventHandler,
};
use crate::domain::sbom_document::{Component, build_sbom_from_findings, extract_components};
use crate::domain::types::{
    CodeScanEvent, NewSbomRecord, OutboxMessage, OutboxPayload, SBOM_EVENTS_TOPIC,
    SBOM_SOURCE_AUTO_CODE_SCAN, SBOM_UPLOAD_RESOURCE,
};
use crate::error::ProcessingError;

/// Per-SBOM entry of the `sbom.batch_created` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SbomBatchRecord {
    pub id: Uuid,
    pub components: Vec<Component>,
}

/// Orchestrates one `CODE_SCAN_DONE` event: resolve the organization,
/// reserve quota, derive SBOMs from manifests (findings as fallback),
/// persist them, and enqueue the batch event into the outbox. Quota
/// reserved but not spent is released on every exit path.
pub struct HandleCodeScanUseCase<P, S, Q, O, M, B>
where
    P: ProjectStore,
    S: SbomStore,
    Q: QuotaGate,
    O: OutboxEnqueue,
    M: ManifestParser,
    B: BlobStore,
{
    pub projects: P,
    pub sboms: S,
    pub quota: Q,
    pub outbox: O,
    pub parser: M,
    pub blobs: B,
}

impl<P, S, Q, O, M, B> HandleCodeScanUseCase<P, S, Q, O, M, B>
where
    P: ProjectStore,
    S: SbomStore,
    Q: QuotaGate,
    O: OutboxEnqueue,
    M: ManifestParser,
    B: BlobStore,
{
    pub async fn execute(&self, event: &CodeScanEvent) -> Result<(), ProcessingError> {
        // 1. Resolve the owning organization. A missing project can never
        //    succeed on retry; everything else is connectivity.
        let org_id = match self.projects.organization_id(event.project_id).await {
            Ok(Some(org_id)) => org_id,
            Ok(None) => {
                let message = format!(
                    "could not determine organization for project {}",
                    event.project_id
                );
                error!(project_id = event.project_id, "organization lookup failed");
                self.enqueue_warning("sbom.org_lookup_failed", event, &message)
                    .await;
                return Err(ProcessingError::permanent(anyhow!(message)));
            }
            Err(err) => {
                return Err(ProcessingError::transient(
                    anyhow::Error::new(err).context("load organization id"),
                ));
            }
        };

        // 2. One reservation per manifest with content; the findings
        //    fallback still consumes a single slot.
        let to_create = event
            .manifests
            .iter()
            .filter(|manifest| !manifest.content.is_empty())
            .count()
            .max(1) as i64;

        // 3. Quota gate. Denial is business policy, not an error: warn
        //    downstream and consume the offset.
        let decision = match self
            .quota
            .check_and_consume(org_id, SBOM_UPLOAD_RESOURCE, to_create)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, org_id, "usage check failed");
                self.enqueue_warning(
                    "sbom.limit_check_failed",
                    event,
                    &format!("usage check failed: {err}"),
                )
                .await;
                return Err(ProcessingError::transient(err));
            }
        };
        if !decision.allowed {
            info!(
                project = %event.project,
                message = %decision.message,
                "sbom generation skipped, quota reached"
            );
            self.enqueue_warning("sbom.limit_reached", event, &decision.message)
                .await;
            return Ok(());
        }

        // 4–7. From here on the reservation is live: release whatever was
        //      not spent, whichever way generation exits.
        let mut successful: i64 = 0;
        let result = self
            .generate_and_queue(event, org_id, &mut successful)
            .await;
        self.quota
            .release_unused(org_id, SBOM_UPLOAD_RESOURCE, to_create, successful)
            .await;
        result
    }

    async fn generate_and_queue(
        &self,
        event: &CodeScanEvent,
        org_id: i64,
        successful: &mut i64,
    ) -> Result<(), ProcessingError> {
        let mut records: Vec<SbomBatchRecord> = Vec::new();
        let mut manifest_name = String::new();

        // 5. Per-manifest generation. A failing parse or upsert skips that
        //    manifest only; its reserved slot is returned by compensation.
        for manifest in &event.manifests {
            if manifest.content.is_empty() {
                continue;
            }
            manifest_name = manifest.name.clone();

            let parsed = match self
                .parser
                .parse(&event.project, &manifest.name, manifest.content.as_bytes())
                .await
            {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(manifest = %manifest.name, error = %err, "manifest parse failed");
                    continue;
                }
            };

            let upserted = match self
                .sboms
                .upsert(NewSbomRecord {
                    project_id: event.project_id,
                    project_name: &event.project,
                    manifest_name: &manifest.name,
                    sbom_json: &parsed.data,
                    source: SBOM_SOURCE_AUTO_CODE_SCAN,
                    object_url: None,
                })
                .await
            {
                Ok(upserted) => upserted,
                Err(err) => {
                    warn!(manifest = %manifest.name, error = %err, "sbom upsert failed");
                    continue;
                }
            };

            *successful += 1;
            records.push(SbomBatchRecord {
                id: upserted.id,
                components: components_of(&parsed.data),
            });
            info!(
                sbom_id = %upserted.id,
                project = %event.project,
                manifest = %manifest.name,
                "sbom created"
            );
        }

        // 6. Fallback: synthesize a minimal document from findings when no
        //    manifest produced an SBOM.
        if records.is_empty() && !event.findings.is_empty() {
            let document = build_sbom_from_findings(&event.findings);
            let bytes = serde_json::to_vec(&document)
                .map_err(|err| ProcessingError::transient(anyhow!(err)))?;

            let key = format!("sbom/{}.json", event.project);
            let object_url = match self.blobs.upload(&key, &bytes).await {
                Ok(url) => url,
                Err(err) => {
                    warn!(error = %err, key, "fallback sbom upload failed");
                    None
                }
            };

            let upserted = self
                .sboms
                .upsert(NewSbomRecord {
                    project_id: event.project_id,
                    project_name: &event.project,
                    manifest_name: &manifest_name,
                    sbom_json: &bytes,
                    source: SBOM_SOURCE_AUTO_CODE_SCAN,
                    object_url: object_url.as_deref(),
                })
                .await
                .map_err(ProcessingError::from)?;

            *successful += 1;
            records.push(SbomBatchRecord {
                id: upserted.id,
                components: extract_components(&document),
            });
            info!(project = %event.project, "fallback sbom created from findings");
        }

        // 7. Queue the batch event. The dedup key ties the outbox row to
        //    the inbound event identity, so replays collapse to one row.
        self.queue_batch_event(event, org_id, &records).await?;
        info!(
            count = records.len(),
            project = %event.project,
            "queued sbom batch event"
        );
        Ok(())
    }

    async fn queue_batch_event(
        &self,
        event: &CodeScanEvent,
        org_id: i64,
        records: &[SbomBatchRecord],
    ) -> Result<(), ProcessingError> {
        let timestamp = event.timestamp.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let dedup_key = format!(
            "sbom-batch:{}:{}",
            event.project_id,
            rfc3339_nanos(timestamp)
        );

        let payload = json!({
            "type": "sbom.batch_created",
            "project": event.project,
            "project_id": event.project_id,
            "organization_id": org_id,
            "source": "project_scan",
            "code_findings_count": event.findings.len(),
            "project_scan_quota_consumed": true,
            "timestamp": rfc3339_nanos(Utc::now()),
            "sbom_records": records,
        });

        self.outbox
            .enqueue(OutboxMessage {
                topic: SBOM_EVENTS_TOPIC.to_owned(),
                event_type: Some("sbom.batch_created".to_owned()),
                key: Some(format!("project-{}", event.project_id)),
                payload: OutboxPayload::Json(payload),
                headers: Default::default(),
                dedup_key: Some(dedup_key),
            })
            .await
            .map_err(ProcessingError::from)
    }

    /// Warning events are best-effort observability; a failed enqueue never
    /// changes the handler outcome.
    async fn enqueue_warning(&self, event_type: &str, event: &CodeScanEvent, message: &str) {
        let payload = json!({
            "type": event_type,
            "project": event.project,
            "project_id": event.project_id,
            "message": message,
            "timestamp": rfc3339_nanos(Utc::now()),
        });

        if let Err(err) = self
            .outbox
            .enqueue(OutboxMessage {
                topic: SBOM_EVENTS_TOPIC.to_owned(),
                event_type: Some(event_type.to_owned()),
                key: Some(format!("project-{}", event.project_id)),
                payload: OutboxPayload::Json(payload),
                headers: Default::default(),
                dedup_key: None,
            })
            .await
        {
            warn!(error = %err, event_type, "failed to enqueue warning event");
        }
    }
}

impl<P, S, Q, O, M, B> ScanEventHandler for HandleCodeScanUseCase<P, S, Q, O, M, B>
where
    P: ProjectStore,
    S: SbomStore,
    Q: QuotaGate,
    O: OutboxEnqueue,
    M: ManifestParser,
    B: BlobStore,
{
    async fn handle(&self, event: &CodeScanEvent) -> Result<(), ProcessingError> {
        self.execute(event).await
    }
}

fn components_of(sbom_json: &[u8]) -> Vec<Component> {
    match serde_json::from_slice(sbom_json) {
        Ok(document) => extract_components(&document),
        Err(err) => {
            warn!(error = %err, "cannot parse sbom document for components");
            Vec::new()
        }
    }
}

fn rfc3339_nanos(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
