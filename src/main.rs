// polygate - Multi-account AI gateway with cross-protocol request translation

use anyhow::Result;
use clap::Parser;
use polygate::auth::{run_login, AuthRegistry, LoginOptions};
use polygate::cli::Args;
use polygate::config::AppConfig;
use polygate::formats::FormatRegistry;
use polygate::gateway::routes::create_router;
use polygate::gateway::Dispatcher;
use polygate::pool::AccountPool;
use polygate::provider::Provider;
use polygate::store::build_store;
use polygate::telemetry::{log_drain, UsageSink};
use polygate::translate::TranslationEngine;
use polygate::upstream::UpstreamClient;
use polygate::utils::logging;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: Parse CLI arguments and load configuration
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting polygate v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Open the credential store and authenticator registry
    let store = build_store(&config.store).await?;
    let registry = Arc::new(AuthRegistry::standard());

    // Phase 3.5: Handle --login flag
    if let Some(provider) = &args.login {
        let provider: Provider = provider
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let account = run_login(
            &registry,
            provider,
            LoginOptions {
                account_id: args.account.clone(),
                api_key: args.api_key.clone(),
                label: None,
            },
        )
        .await?;
        let account = store.save(account).await?;
        println!(
            "\n✓ Stored {} account {}\n\nStarting server...\n",
            provider, account.account_id
        );
    }

    // Phase 4: Build the account pool
    let pool = Arc::new(AccountPool::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        config.pool_config()?,
    ));
    pool.load().await?;

    // Phase 5: Wire the dispatcher
    let formats = Arc::new(FormatRegistry::standard());
    let engine = TranslationEngine::new(formats);
    let upstream = Arc::new(UpstreamClient::new(config.upstream.clone())?);
    let (usage_sink, usage_rx) = UsageSink::channel(config.telemetry.queue_capacity);
    tokio::spawn(log_drain(usage_rx));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        engine,
        upstream,
        config.model_router()?,
        usage_sink,
    ));

    // Phase 5.5: Housekeeping sweep (cooldown promotion, proactive refresh)
    {
        let pool = Arc::clone(&pool);
        let interval = Duration::from_secs(config.pool.sweep_interval_seconds.max(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                pool.sweep().await;
            }
        });
    }

    // Phase 6: Build and start the HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_router(config, dispatcher, pool, store)?;

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
