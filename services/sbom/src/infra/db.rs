use std::collections::HashMap;

use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbBackend, DbErr, EntityTrait, IntoActiveModel as _, QueryFilter,
    QueryOrder, QuerySelect, Statement, TransactionTrait,
};
use tracing::{error, warn};
use uuid::Uuid;

use sbomhub_sbom_schema::outbox_events::{self, OutboxStatus};
use sbomhub_sbom_schema::{projects, sboms};

use crate::domain::repository::{
    OutboxDispatchStore, OutboxEnqueue, ProjectStore, QuotaGate, SbomStore,
};
use crate::domain::sbom_document::summarize_document;
use crate::domain::types::{
    ClaimedOutboxEvent, MAX_OUTBOX_ATTEMPTS, NewSbomRecord, OutboxMessage, QuotaDecision,
    UpsertOutcome, UpsertedSbom,
};
use crate::error::SbomServiceError;

/// Retry schedule for failed publishes: `2^attempt` seconds, capped at five
/// minutes. No jitter; each row has a single writer once claimed.
pub(crate) fn outbox_retry_delay(attempt: i32) -> Duration {
    let exp = attempt.clamp(0, 30) as u32;
    let secs = 1i64.checked_shl(exp).unwrap_or(i64::MAX).min(300);
    Duration::seconds(secs)
}

/// State transition for a row whose publish attempt just failed: retry on a
/// schedule until the attempt cap, then park it terminally for inspection.
pub(crate) fn failed_transition(
    attempts: i32,
    now: DateTime<Utc>,
) -> (OutboxStatus, Option<DateTime<Utc>>) {
    if attempts >= MAX_OUTBOX_ATTEMPTS {
        (OutboxStatus::Failed, None)
    } else {
        (
            OutboxStatus::Retrying,
            Some(now + outbox_retry_delay(attempts)),
        )
    }
}

fn headers_from_json(id: Uuid, headers: serde_json::Value) -> HashMap<String, String> {
    match serde_json::from_value(headers) {
        Ok(map) => map,
        Err(err) => {
            warn!(event_id = %id, error = %err, "outbox headers are not a string map, using empty");
            HashMap::new()
        }
    }
}

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

impl OutboxEnqueue for DbOutboxRepository {
    async fn enqueue(&self, msg: OutboxMessage) -> Result<(), SbomServiceError> {
        msg.validate()?;
        let now = Utc::now();
        let headers = serde_json::to_value(&msg.headers).context("serialize outbox headers")?;

        let row = outbox_events::ActiveModel {
            id: Set(Uuid::new_v4()),
            topic: Set(msg.topic),
            event_key: Set(msg.key),
            event_type: Set(msg.event_type),
            payload: Set(msg.payload.into_json()?),
            headers: Set(headers),
            status: Set(OutboxStatus::Pending),
            attempts: Set(0),
            next_retry_at: Set(None),
            last_error: Set(None),
            dedup_key: Set(msg.dedup_key),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let insert = outbox_events::Entity::insert(row)
            .on_conflict(
                OnConflict::column(outbox_events::Column::DedupKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;

        match insert {
            Ok(_) => Ok(()),
            // Deduplicated silently: an identical dedup_key already landed.
            Err(DbErr::RecordNotInserted) => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context("enqueue outbox event")
                .into()),
        }
    }
}

impl OutboxDispatchStore for DbOutboxRepository {
    async fn claim_batch(&self, limit: u64) -> Result<Vec<ClaimedOutboxEvent>, SbomServiceError> {
        let txn = self.db.begin().await.context("begin outbox claim")?;
        let now = Utc::now();

        let rows = outbox_events::Entity::find()
            .filter(
                outbox_events::Column::Status
                    .is_in([OutboxStatus::Pending, OutboxStatus::Retrying]),
            )
            .filter(
                Condition::any()
                    .add(outbox_events::Column::NextRetryAt.is_null())
                    .add(outbox_events::Column::NextRetryAt.lte(now)),
            )
            .order_by_asc(outbox_events::Column::CreatedAt)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await
            .context("select claimable outbox rows")?;

        if rows.is_empty() {
            txn.commit().await.context("commit empty outbox claim")?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        outbox_events::Entity::update_many()
            .col_expr(
                outbox_events::Column::Status,
                Expr::value(OutboxStatus::Processing),
            )
            .col_expr(outbox_events::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_events::Column::Id.is_in(ids))
            .exec(&txn)
            .await
            .context("mark claimed outbox rows processing")?;

        txn.commit().await.context("commit outbox claim")?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload =
                serde_json::to_vec(&row.payload).context("serialize claimed outbox payload")?;
            events.push(ClaimedOutboxEvent {
                id: row.id,
                topic: row.topic,
                event_key: row.event_key,
                event_type: row.event_type,
                payload,
                headers: headers_from_json(row.id, row.headers),
                attempts: row.attempts,
            });
        }
        Ok(events)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), SbomServiceError> {
        outbox_events::Entity::update_many()
            .col_expr(
                outbox_events::Column::Status,
                Expr::value(OutboxStatus::Sent),
            )
            .col_expr(
                outbox_events::Column::NextRetryAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                outbox_events::Column::LastError,
                Expr::value(Option::<String>::None),
            )
            .col_expr(outbox_events::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(outbox_events::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .context("mark outbox event sent")?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event: &ClaimedOutboxEvent,
        error: &str,
    ) -> Result<(), SbomServiceError> {
        let attempts = event.attempts + 1;
        let now = Utc::now();
        let (status, next_retry_at) = failed_transition(attempts, now);

        outbox_events::Entity::update_many()
            .col_expr(outbox_events::Column::Status, Expr::value(status))
            .col_expr(outbox_events::Column::Attempts, Expr::value(attempts))
            .col_expr(outbox_events::Column::NextRetryAt, Expr::value(next_retry_at))
            .col_expr(
                outbox_events::Column::LastError,
                Expr::value(Some(error.to_owned())),
            )
            .col_expr(outbox_events::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_events::Column::Id.eq(event.id))
            .exec(&self.db)
            .await
            .context("mark outbox event failed")?;
        Ok(())
    }

    async fn requeue_stale(
        &self,
        older_than: Duration,
    ) -> Result<u64, SbomServiceError> {
        let now = Utc::now();
        let result = outbox_events::Entity::update_many()
            .col_expr(
                outbox_events::Column::Status,
                Expr::value(OutboxStatus::Pending),
            )
            .col_expr(
                outbox_events::Column::NextRetryAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                outbox_events::Column::LastError,
                Expr::value(Some("dispatcher-crash-recovery".to_owned())),
            )
            .col_expr(outbox_events::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_events::Column::Status.eq(OutboxStatus::Processing))
            .filter(outbox_events::Column::UpdatedAt.lt(now - older_than))
            .exec(&self.db)
            .await
            .context("requeue stale outbox rows")?;
        Ok(result.rows_affected)
    }
}

// ── Project store ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbProjectStore {
    pub db: DatabaseConnection,
}

impl ProjectStore for DbProjectStore {
    async fn organization_id(&self, project_id: i64) -> Result<Option<i64>, SbomServiceError> {
        let model = projects::Entity::find_by_id(project_id)
            .one(&self.db)
            .await
            .context("load project organization")?;
        Ok(model.map(|project| project.organization_id))
    }
}

// ── Sbom store ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbSbomStore {
    pub db: DatabaseConnection,
}

impl SbomStore for DbSbomStore {
    async fn upsert(&self, record: NewSbomRecord<'_>) -> Result<UpsertedSbom, SbomServiceError> {
        let document: serde_json::Value = serde_json::from_slice(record.sbom_json)
            .context("sbom document is not valid JSON")?;
        let summary = serde_json::to_value(summarize_document(&document))
            .context("serialize sbom summary")?;
        let now = Utc::now();

        let existing = sboms::Entity::find()
            .filter(sboms::Column::ProjectName.eq(record.project_name))
            .filter(sboms::Column::ManifestName.eq(record.manifest_name))
            .one(&self.db)
            .await
            .context("find existing sbom")?;

        if let Some(model) = existing {
            let id = model.id;
            let mut row = model.into_active_model();
            row.project_id = Set(Some(record.project_id));
            row.sbom = Set(document);
            row.summary = Set(Some(summary));
            row.source = Set(record.source.to_owned());
            row.object_url = Set(record.object_url.map(str::to_owned));
            row.updated_at = Set(now);
            row.update(&self.db).await.context("update sbom")?;
            return Ok(UpsertedSbom {
                id,
                outcome: UpsertOutcome::Updated,
            });
        }

        let id = Uuid::new_v4();
        sboms::ActiveModel {
            id: Set(id),
            project_id: Set(Some(record.project_id)),
            project_name: Set(record.project_name.to_owned()),
            manifest_name: Set(Some(record.manifest_name.to_owned())),
            source: Set(record.source.to_owned()),
            sbom: Set(document),
            summary: Set(Some(summary)),
            object_url: Set(record.object_url.map(str::to_owned)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .context("insert sbom")?;
        Ok(UpsertedSbom {
            id,
            outcome: UpsertOutcome::Created,
        })
    }
}

// ── Quota gate ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbQuotaGate {
    pub db: DatabaseConnection,
}

impl QuotaGate for DbQuotaGate {
    async fn check_and_consume(
        &self,
        org_id: i64,
        resource: &str,
        amount: i64,
    ) -> Result<QuotaDecision, SbomServiceError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT allowed, message, next_reset FROM check_and_consume_usage($1, $2, $3)",
            [org_id.into(), resource.into(), amount.into()],
        );
        let row = self
            .db
            .query_one(stmt)
            .await
            .context("call check_and_consume_usage")?
            .ok_or_else(|| anyhow!("check_and_consume_usage returned no row"))?;

        Ok(QuotaDecision {
            allowed: row.try_get("", "allowed").context("read allowed")?,
            message: row.try_get("", "message").context("read message")?,
            next_reset: row.try_get("", "next_reset").context("read next_reset")?,
        })
    }

    async fn release_unused(&self, org_id: i64, resource: &str, reserved: i64, succeeded: i64) {
        let remaining = reserved - succeeded;
        if remaining <= 0 {
            return;
        }
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT revert_usage($1, $2, $3)",
            [org_id.into(), resource.into(), remaining.into()],
        );
        if let Err(err) = self.db.execute(stmt).await {
            error!(error = %err, org_id, resource, remaining, "revert_usage failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(outbox_retry_delay(1), Duration::seconds(2));
        assert_eq!(outbox_retry_delay(2), Duration::seconds(4));
        assert_eq!(outbox_retry_delay(8), Duration::seconds(256));
    }

    #[test]
    fn retry_delay_caps_at_five_minutes() {
        assert_eq!(outbox_retry_delay(9), Duration::seconds(300));
        assert_eq!(outbox_retry_delay(MAX_OUTBOX_ATTEMPTS), Duration::seconds(300));
        assert_eq!(outbox_retry_delay(30), Duration::seconds(300));
    }

    #[test]
    fn retry_delay_clamps_negative_attempts() {
        assert_eq!(outbox_retry_delay(-3), Duration::seconds(1));
    }

    #[test]
    fn failed_publish_schedules_a_retry_until_the_cap() {
        let now = Utc::now();

        let (status, next_retry_at) = failed_transition(1, now);
        assert_eq!(status, OutboxStatus::Retrying);
        assert_eq!(next_retry_at, Some(now + Duration::seconds(2)));

        let (status, next_retry_at) = failed_transition(MAX_OUTBOX_ATTEMPTS - 1, now);
        assert_eq!(status, OutboxStatus::Retrying);
        assert_eq!(next_retry_at, Some(now + Duration::seconds(300)));
    }

    #[test]
    fn attempt_cap_parks_the_row_terminally() {
        let now = Utc::now();
        let (status, next_retry_at) = failed_transition(MAX_OUTBOX_ATTEMPTS, now);
        assert_eq!(status, OutboxStatus::Failed);
        assert_eq!(next_retry_at, None);
    }

    #[test]
    fn malformed_headers_fall_back_to_empty() {
        let id = Uuid::new_v4();
        assert!(headers_from_json(id, json!(["not", "a", "map"])).is_empty());
        assert_eq!(
            headers_from_json(id, json!({"trace-id": "abc"})).get("trace-id"),
            Some(&"abc".to_owned())
        );
    }
}
