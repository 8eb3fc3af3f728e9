use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use sgb_core::{
    config::{Config, LedgerBackend, SheetsCredentials},
    ledger::{LedgerStore, MemoryTable, QuotaLedger, TableLedger},
    orchestrator::CompletionOrchestrator,
    ports::MessagingPort,
};
use sgb_openai::OpenAiClient;
use sgb_sheets::{FileTable, ServiceAccountAuth, SheetsTable, StaticToken, TokenSource};
use sgb_slack::{router::AppState, SlackMessenger};

/// Slack bot that answers threads with GPT under a per-user daily token quota.
#[derive(Debug, Parser)]
#[command(name = "sgb", version)]
struct Args {
    /// Log level for the bot's crates (RUST_LOG overrides).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = Config::load()?;

    let level = args.log_level.as_deref().unwrap_or(&cfg.log_level);
    sgb_core::logging::init("sgb", level)?;

    let messenger = Arc::new(SlackMessenger::new(
        cfg.slack_bot_token.clone(),
        cfg.slack_api_base.clone(),
        cfg.http_timeout,
    )?);
    let completion = Arc::new(OpenAiClient::new(
        cfg.openai_api_key.clone(),
        cfg.openai_model.clone(),
        cfg.openai_base_url.clone(),
        cfg.http_timeout,
    )?);
    let ledger = QuotaLedger::with_limit(ledger_store(&cfg)?, cfg.daily_token_limit);

    let bot_user_id = messenger
        .resolve_self_identity()
        .await
        .map_err(|e| anyhow::anyhow!("failed to resolve bot user id: {e}"))?;
    tracing::info!(bot_user_id = %bot_user_id, model = %completion.model(), "bot identity resolved");

    let orchestrator = CompletionOrchestrator::new(messenger, completion, ledger, bot_user_id)
        .with_character_settings(cfg.character_settings.clone());

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let addr = args.bind.unwrap_or_else(|| cfg.bind_addr.clone());
    sgb_slack::router::serve(&addr, AppState::new(Arc::new(orchestrator)), shutdown).await
}

fn ledger_store(cfg: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match &cfg.ledger {
        LedgerBackend::Sheets {
            spreadsheet_id,
            credentials,
        } => {
            let auth: Arc<dyn TokenSource> = match credentials {
                SheetsCredentials::ServiceAccount(path) => {
                    tracing::info!(key_file = %path.display(), "using service account for sheets");
                    Arc::new(ServiceAccountAuth::from_file(path, cfg.http_timeout)?)
                }
                SheetsCredentials::AccessToken(token) => {
                    tracing::warn!("using static sheets access token; it will not be refreshed");
                    Arc::new(StaticToken::new(token.clone()))
                }
            };
            tracing::info!(spreadsheet_id = %spreadsheet_id, "using sheets ledger");
            Arc::new(TableLedger::new(SheetsTable::new(
                spreadsheet_id.clone(),
                auth,
                cfg.http_timeout,
            )?))
        }
        LedgerBackend::File { path } => {
            tracing::info!(path = %path.display(), "using file ledger");
            Arc::new(TableLedger::new(FileTable::new(path.clone())))
        }
        LedgerBackend::Memory => {
            tracing::warn!("using in-memory ledger; usage is lost on restart");
            Arc::new(TableLedger::new(MemoryTable::default()))
        }
    };
    Ok(store)
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down server...");
    token.cancel();
}
