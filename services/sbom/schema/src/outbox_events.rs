use sea_orm::entity::prelude::*;

/// Delivery state of an outbox row. `Sent` and `Failed` are terminal; a row
/// in `Pending` or `Retrying` whose `next_retry_at` has passed is eligible
/// for claiming.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum OutboxStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "retrying")]
    Retrying,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Transactional outbox row: an event persisted alongside business data and
/// published asynchronously by the dispatcher.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "outbox_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub topic: String,
    pub event_key: Option<String>,
    pub event_type: Option<String>,
    pub payload: Json,
    pub headers: Json,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    #[sea_orm(unique)]
    pub dedup_key: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
