use std::sync::Arc;

use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sbomhub_core::tracing::init_tracing;
use sbomhub_sbom::config::SbomConfig;
use sbomhub_sbom::consumer::code_scan::CodeScanConsumer;
use sbomhub_sbom::infra::blob::HttpBlobStore;
use sbomhub_sbom::infra::db::{DbOutboxRepository, DbProjectStore, DbQuotaGate, DbSbomStore};
use sbomhub_sbom::infra::kafka::{KafkaPublisher, WriterPool};
use sbomhub_sbom::infra::parser::SyftManifestParser;
use sbomhub_sbom::outbox::dispatcher::OutboxDispatcher;
use sbomhub_sbom::outbox::sweeper::StaleOutboxSweeper;
use sbomhub_sbom::router::build_router;
use sbomhub_sbom::state::AppState;
use sbomhub_sbom::usecase::handle_code_scan::HandleCodeScanUseCase;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = SbomConfig::from_env();
    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let writer_pool = Arc::new(WriterPool::new(config.kafka_brokers.clone()));
    let cancel = CancellationToken::new();

    let dispatcher = OutboxDispatcher::new(
        DbOutboxRepository { db: db.clone() },
        KafkaPublisher::new(writer_pool.clone()),
    );
    let sweeper = StaleOutboxSweeper::new(DbOutboxRepository { db: db.clone() });
    let handler = HandleCodeScanUseCase {
        projects: DbProjectStore { db: db.clone() },
        sboms: DbSbomStore { db: db.clone() },
        quota: DbQuotaGate { db: db.clone() },
        outbox: DbOutboxRepository { db: db.clone() },
        parser: SyftManifestParser::new(config.syft_command.clone()),
        blobs: HttpBlobStore::from_config(&config),
    };
    let consumer = CodeScanConsumer::new(&config.kafka_brokers, &writer_pool, handler)
        .expect("failed to create code scan consumer");

    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));
    let sweeper_task = tokio::spawn(sweeper.run(cancel.clone()));
    let consumer_task = tokio::spawn(consumer.run(cancel.clone()));

    let addr = format!("0.0.0.0:{}", config.sbom_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    info!("sbom service listening on {addr}");

    let http_task = {
        let cancel = cancel.clone();
        let router = build_router(AppState { db: db.clone() });
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                error!(error = %err, "health server error");
            }
        })
    };

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
    cancel.cancel();

    for (name, task) in [
        ("dispatcher", dispatcher_task),
        ("sweeper", sweeper_task),
        ("consumer", consumer_task),
        ("http", http_task),
    ] {
        if let Err(err) = task.await {
            error!(task = name, error = %err, "task join failed");
        }
    }

    writer_pool.close_all();
    info!("sbom service stopped");
}

async fn shutdown_signal() {
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}
