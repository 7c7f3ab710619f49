/// Sbom service configuration loaded from environment variables.
#[derive(Debug)]
pub struct SbomConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Kafka bootstrap servers, comma-separated. Env var: `KAFKA_BROKERS`.
    pub kafka_brokers: String,
    /// TCP port for the health HTTP server (default 8002). Env var: `SBOM_PORT`.
    pub sbom_port: u16,
    /// Manifest parser executable (default "syft", resolved on PATH).
    pub syft_command: String,
    /// Optional blob-store bucket; uploads are skipped when unset.
    pub blob_bucket: Option<String>,
    /// Optional blob-store endpoint URL (e.g. a MinIO gateway).
    pub blob_endpoint: Option<String>,
    /// Optional blob-store credentials.
    pub blob_access_key: Option<String>,
    pub blob_secret_key: Option<String>,
}

impl SbomConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            kafka_brokers: std::env::var("KAFKA_BROKERS").expect("KAFKA_BROKERS"),
            sbom_port: std::env::var("SBOM_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8002),
            syft_command: std::env::var("SYFT_COMMAND").unwrap_or_else(|_| "syft".to_owned()),
            blob_bucket: std::env::var("S3_BUCKET").ok().filter(|v| !v.is_empty()),
            blob_endpoint: std::env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            blob_access_key: std::env::var("S3_ACCESS_KEY").ok().filter(|v| !v.is_empty()),
            blob_secret_key: std::env::var("S3_SECRET_KEY").ok().filter(|v| !v.is_empty()),
        }
    }
}
