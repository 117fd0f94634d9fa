use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use yoga_assist::channels::{Channel, TelegramChannel};
use yoga_assist::config::BotConfig;
use yoga_assist::conversation::{ConversationEngine, Dispatcher, EngineDeps};
use yoga_assist::llm::create_gateway;
use yoga_assist::scheduler::ReminderScheduler;
use yoga_assist::store::{Database, LibSqlBackend};

/// Stderr logging plus an optional daily rolling file. The returned guard
/// must live as long as the process so buffered lines are flushed.
fn init_tracing(config: &BotConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "yoga-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("🧘 Yoga Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Timezone: {}", config.timezone);
    eprintln!("   Database: {}", config.database_path.display());
    if let Some(dir) = &config.log_dir {
        eprintln!("   Log dir: {}", dir.display());
    }

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database at {}",
                    config.database_path.display()
                )
            })?,
    );

    // ── Generation gateway ───────────────────────────────────────────────
    let gateway = Arc::new(create_gateway(&config.llm).context("Failed to build LLM client")?);
    eprintln!("   Candidate models: {}", gateway.candidates().join(", "));

    // ── Channel ──────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(config.telegram_token.clone()));
    if let Err(e) = telegram.health_check().await {
        tracing::warn!(error = %e, "Telegram health check failed");
    }
    let channel: Arc<dyn Channel> = telegram;

    // ── Reminders ────────────────────────────────────────────────────────
    let scheduler = ReminderScheduler::new(Arc::clone(&channel), config.timezone);
    let restored = scheduler
        .rehydrate_all(store.as_ref())
        .await
        .context("Failed to load reminder settings")?;
    eprintln!("   Reminders restored: {restored}\n");

    // ── Conversation ─────────────────────────────────────────────────────
    let engine = Arc::new(ConversationEngine::new(EngineDeps {
        store,
        gateway,
        scheduler: scheduler.clone(),
        channel: Arc::clone(&channel),
        timezone: config.timezone,
        generation_timeout: config.llm.generation_timeout,
    }));
    let dispatcher = Dispatcher::new(engine);

    let stream = channel
        .start()
        .await
        .context("Failed to start Telegram channel")?;
    tracing::info!(channel = channel.name(), "Bot started");

    tokio::select! {
        _ = dispatcher.run(stream) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    scheduler.shutdown();
    if let Err(e) = channel.shutdown().await {
        tracing::warn!(error = %e, "Channel shutdown failed");
    }
    Ok(())
}
