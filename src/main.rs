use std::sync::Arc;

use kawal_obat::config::AppConfig;
use kawal_obat::gateway::LlmClassifier;
use kawal_obat::idempotency::IdempotencyLedger;
use kawal_obat::outbound::HttpWaSender;
use kawal_obat::pipeline::router::{MessageRouter, RouterConfig};
use kawal_obat::store::{LibSqlStore, Store};
use kawal_obat::webhook::routes::{AppState, webhook_routes};

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — daily-rotated file when KAWAL_LOG_DIR is set,
    // stderr otherwise. The guard must outlive main for the file writer.
    let _log_guard = match std::env::var("KAWAL_LOG_DIR") {
        Ok(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "kawal-obat.log"));
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export KAWAL_WEBHOOK_TOKEN=<static token shared with the WA gateway>");
        std::process::exit(1);
    });

    eprintln!("💊 Kawal Obat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Health:  http://0.0.0.0:{}/health", config.port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!(
        "   Classifier: {} ({})",
        if config.classifier.enabled { "enabled" } else { "disabled" },
        config.classifier.model,
    );

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );

    // ── Outbound sender & classifier ─────────────────────────────────
    let sender = Arc::new(HttpWaSender::new(
        config.wa_gateway_url.clone(),
        config.wa_gateway_token.clone(),
        config.wa_device_id.clone(),
    ));
    let classifier = Arc::new(LlmClassifier::new(config.classifier.clone()));

    // ── Router & ledger ──────────────────────────────────────────────
    let router = Arc::new(MessageRouter::new(
        Arc::clone(&store),
        sender,
        classifier,
        RouterConfig {
            context_ttl: config.context_ttl,
            history_limit: config.classifier.history_limit,
        },
    ));
    let ledger = Arc::new(IdempotencyLedger::new(
        Arc::clone(&store),
        config.dedup_window,
    ));

    // ── HTTP server ──────────────────────────────────────────────────
    let app = webhook_routes(AppState {
        router,
        ledger,
        webhook_token: config.webhook_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}
