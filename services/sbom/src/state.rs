use sea_orm::DatabaseConnection;

/// Shared state for the operational HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
}
