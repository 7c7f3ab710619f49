use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sboms::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sboms::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Sboms::ProjectId).big_integer())
                    .col(ColumnDef::new(Sboms::ProjectName).string().not_null())
                    .col(ColumnDef::new(Sboms::ManifestName).string())
                    .col(ColumnDef::new(Sboms::Source).string().not_null())
                    .col(ColumnDef::new(Sboms::Sbom).json_binary().not_null())
                    .col(ColumnDef::new(Sboms::Summary).json_binary())
                    .col(ColumnDef::new(Sboms::ObjectUrl).string())
                    .col(
                        ColumnDef::new(Sboms::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sboms::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert key for scan-derived documents.
        manager
            .create_index(
                Index::create()
                    .table(Sboms::Table)
                    .col(Sboms::ProjectName)
                    .col(Sboms::ManifestName)
                    .name("idx_sboms_project_name_manifest_name")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Sboms::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Sboms {
    Table,
    Id,
    ProjectId,
    ProjectName,
    ManifestName,
    Source,
    Sbom,
    Summary,
    ObjectUrl,
    CreatedAt,
    UpdatedAt,
}
