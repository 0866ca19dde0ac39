use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approval_relay::config::{self, Config, StoreBackend};
use approval_relay::lifecycle::{DecisionCommand, DecisionOutcome, LifecycleConfig, LifecycleManager};
use approval_relay::models::{ResponderIdentity, StatusView};
use approval_relay::notification::telegram::TelegramChannel;
use approval_relay::notification::webhook::WebhookBackend;
use approval_relay::store::memory::MemoryStore;
use approval_relay::store::postgres::PgStore;
use approval_relay::store::RequestStore;
use approval_relay::{api, cli, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --help and --version must work even when the environment is incomplete
    let args = cli::Cli::parse();

    init_tracing()?;
    let cfg = config::load()?;

    match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::SetWebhook) => set_webhook(&cfg).await,
        Some(cli::Commands::Status { request_id }) => {
            // read-only: does not need the Telegram settings
            let store = open_store(&cfg, false).await?;
            match store.get(&request_id).await? {
                Some(record) => {
                    let view = StatusView::from(&record);
                    println!("{}", serde_json::to_string_pretty(&view)?);
                }
                None => println!("Request {} not found.", request_id),
            }
            Ok(())
        }
        Some(cli::Commands::Sweep) => {
            let store = open_store(&cfg, false).await?;
            let manager = build_manager(&cfg, store)?;
            let expired = manager.sweep_expired(chrono::Utc::now()).await?;
            manager.flush().await;
            println!("Expired {} request(s).", expired);
            Ok(())
        }
        Some(cli::Commands::Decide {
            request_id,
            action,
            responder,
        }) => {
            let store = open_store(&cfg, false).await?;
            let manager = build_manager(&cfg, store)?;
            handle_decide_command(&manager, request_id, action, responder).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    // Export spans over OTLP only when a collector endpoint is configured.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "approval-relay"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "approval_relay=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn open_store(cfg: &Config, migrate: bool) -> anyhow::Result<Arc<dyn RequestStore>> {
    match cfg.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            if migrate {
                tracing::info!("Running migrations...");
                db.migrate().await?;
            }
            Ok(Arc::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("RELAY_STORE=memory: requests are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_manager(cfg: &Config, store: Arc<dyn RequestStore>) -> anyhow::Result<LifecycleManager> {
    let channel = TelegramChannel::new(&cfg.telegram_api_base, cfg.bot_token()?)?;
    let backend = WebhookBackend::new(
        cfg.backend_callback_url.clone(),
        cfg.backend_signing_secret.clone(),
    )?;

    LifecycleManager::new(
        store,
        Arc::new(channel),
        Arc::new(backend),
        LifecycleConfig::from_config(cfg)?,
    )
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg, true).await?;
    let manager = build_manager(&cfg, store)?;

    jobs::expiry::spawn(manager.clone(), cfg.sweep_interval);
    tracing::info!(
        every_secs = cfg.sweep_interval.as_secs(),
        window_mins = cfg.expiry_window.num_minutes(),
        "Background expiry job started"
    );

    let state = Arc::new(AppState {
        lifecycle: manager.clone(),
        config: cfg,
    });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Approval relay listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.flush().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn set_webhook(cfg: &Config) -> anyhow::Result<()> {
    let url = cfg
        .public_webhook_url
        .as_deref()
        .context("PUBLIC_WEBHOOK_URL is not set")?;
    let channel = TelegramChannel::new(&cfg.telegram_api_base, cfg.bot_token()?)?;
    let registered = channel
        .set_webhook(url, cfg.telegram_webhook_secret.as_deref())
        .await?;
    if registered {
        println!("Webhook registered: {}", url);
    } else {
        println!("Telegram did not confirm the webhook registration.");
    }
    Ok(())
}

async fn handle_decide_command(
    manager: &LifecycleManager,
    request_id: String,
    action: String,
    responder: String,
) -> anyhow::Result<()> {
    let outcome = manager
        .apply_decision(
            DecisionCommand {
                request_id: request_id.clone(),
                action,
                responder: ResponderIdentity::named(responder),
                interaction_id: None,
            },
            chrono::Utc::now(),
        )
        .await?;
    manager.flush().await;

    match outcome {
        DecisionOutcome::Applied(record) => {
            println!("Request {} {}.", request_id, record.status)
        }
        DecisionOutcome::AlreadySettled(status) => {
            println!("Request {} was already {}; nothing changed.", request_id, status)
        }
        DecisionOutcome::NotFound => println!("Request {} not found.", request_id),
    }
    Ok(())
}
