use sea_orm::entity::prelude::*;

/// Persisted SBOM document, upserted by `(project_name, manifest_name)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sboms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Option<i64>,
    pub project_name: String,
    pub manifest_name: Option<String>,
    pub source: String,
    pub sbom: Json,
    pub summary: Option<Json>,
    pub object_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
