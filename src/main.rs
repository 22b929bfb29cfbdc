use std::sync::Arc;

use texet::channels::{OutboundChannel, SmsWebhook};
use texet::chat::{ChatService, chat_routes};
use texet::config::AppConfig;
use texet::delivery::{Orchestrator, spawn_delivery_worker};
use texet::pipeline::ReplyPipeline;
use texet::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("Texet API v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: http://0.0.0.0:{}", config.port);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!(
        "   SMS webhook: {}",
        config.sms.outbound_url.as_deref().unwrap_or("(not set)")
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store = Store::open(&config.db_path).await.unwrap_or_else(|e| {
        eprintln!(
            "Error: Failed to open database at {}: {}",
            config.db_path.display(),
            e
        );
        std::process::exit(1);
    });

    // ── Delivery ─────────────────────────────────────────────────────────
    let pipeline = Arc::new(ReplyPipeline::echo(config.bounds));
    let outbound: Arc<dyn OutboundChannel> = Arc::new(SmsWebhook::new(&config.sms)?);
    let orchestrator =
        Orchestrator::new(store.clone(), pipeline, outbound).with_delivery_timeout(config.sms.timeout);
    let (queue, worker) = spawn_delivery_worker(Arc::new(orchestrator), config.delivery_concurrency);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let chat = ChatService::new(store, queue, config.bounds);
    let app = chat_routes(chat, config.api_token.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Texet API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Let in-flight replies finish before exit.
    worker.shutdown().await;
    Ok(())
}
