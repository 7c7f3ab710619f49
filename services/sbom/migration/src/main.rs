use sea_orm_migration::prelude::*;

mod m20260801_000001_create_projects;
mod m20260801_000002_create_sboms;
mod m20260801_000003_create_outbox_events;
mod m20260801_000004_create_usage_functions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_projects::Migration),
            Box::new(m20260801_000002_create_sboms::Migration),
            Box::new(m20260801_000003_create_outbox_events::Migration),
            Box::new(m20260801_000004_create_usage_functions::Migration),
        ]
    }
}

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
