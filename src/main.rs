use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use usta_bot::analysis::OpenAiAnalyzer;
use usta_bot::config::{AppConfig, LogFormat};
use usta_bot::db::{init_database_schema, PgStore};
use usta_bot::notifier::{LogNotifier, Notifier, TelegramNotifier};
use usta_bot::review::{Analyzer, DisabledAnalyzer};
use usta_bot::server::{serve, AppState};
use usta_bot::store::{MemoryStore, OrderStore};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    info!("Starting Usta service bot");
    info!(config = ?config, "Configuration loaded");

    if config.admin.is_default() {
        warn!("Admin console uses the default credentials, set ADMIN_USERNAME and ADMIN_PASSWORD");
    }

    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL database");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            init_database_schema(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, orders are kept in memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> =
        if config.customer_bot_token.is_some() || config.provider_bot_token.is_some() {
            if config.admin_chat_id.is_none() {
                warn!("TELEGRAM_ADMIN_CHAT_ID not set, admin notices are dropped");
            }
            Arc::new(TelegramNotifier::new(
                config.customer_bot_token.as_deref(),
                config.provider_bot_token.as_deref(),
                config.admin_chat_id,
                &config.locale,
            ))
        } else {
            warn!("No bot token configured, notifications are only logged");
            Arc::new(LogNotifier)
        };

    let analyzer: Arc<dyn Analyzer> = if config.analysis.api_key.is_some() {
        Arc::new(OpenAiAnalyzer::new(&config.analysis)?)
    } else {
        warn!("OPENAI_API_KEY not set, uploaded voice notes will not be analysed");
        Arc::new(DisabledAnalyzer)
    };

    serve(AppState::new(config, store, notifier, analyzer)).await
}
