use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error, ledger::DAILY_TOKEN_LIMIT, orchestrator::CHARACTER_SETTINGS, Result,
};

/// Where usage counters are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    /// Google Sheets `Activity!A:E`.
    Sheets {
        spreadsheet_id: String,
        credentials: SheetsCredentials,
    },
    /// Local JSON file with the same row layout.
    File { path: PathBuf },
    /// Process memory; counters are lost on restart.
    Memory,
}

/// How the Sheets ledger authenticates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetsCredentials {
    /// Service-account key file; access tokens are minted and refreshed from it.
    ServiceAccount(PathBuf),
    /// Pre-issued bearer token, used as-is and never refreshed.
    AccessToken(String),
}

pub const DEFAULT_CREDENTIALS_FILE: &str = "./credential.json";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Slack
    pub slack_bot_token: String,
    pub slack_api_base: String,

    // OpenAI
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub character_settings: String,

    // Ledger
    pub ledger: LedgerBackend,
    pub daily_token_limit: u64,

    // Runtime
    pub bind_addr: String,
    pub log_level: String,
    pub http_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let slack_bot_token = required("SLACK_BOT_TOKEN")?;
        let openai_api_key = required("OPENAI_API_KEY")?;

        let slack_api_base =
            env_str("SLACK_API_BASE").unwrap_or_else(|| "https://slack.com/api".to_string());
        let openai_model = env_str("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
        let openai_base_url = env_str("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let character_settings =
            env_str("CHARACTER_SETTINGS").unwrap_or_else(|| CHARACTER_SETTINGS.to_string());

        let ledger = ledger_backend(
            env_str("LEDGER_BACKEND"),
            env_str("SPREADSHEET_ID"),
            env_str("GOOGLE_SHEETS_ACCESS_TOKEN"),
            env_str("GOOGLE_APPLICATION_CREDENTIALS"),
            env_str("LEDGER_FILE"),
        )?;
        let daily_token_limit = env_u64("DAILY_TOKEN_LIMIT").unwrap_or(DAILY_TOKEN_LIMIT);

        let bind_addr = env_str("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let log_level = env_str("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let http_timeout = Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS").unwrap_or(60));

        Ok(Self {
            slack_bot_token,
            slack_api_base,
            openai_api_key,
            openai_model,
            openai_base_url,
            character_settings,
            ledger,
            daily_token_limit,
            bind_addr,
            log_level,
            http_timeout,
        })
    }
}

/// Explicit `LEDGER_BACKEND` wins; otherwise Sheets when a spreadsheet id is
/// configured, else the local file. A static access token takes precedence
/// over the service-account key file.
fn ledger_backend(
    kind: Option<String>,
    spreadsheet_id: Option<String>,
    access_token: Option<String>,
    credentials_file: Option<String>,
    ledger_file: Option<String>,
) -> Result<LedgerBackend> {
    let spreadsheet_id = spreadsheet_id.and_then(non_empty);
    let kind = kind
        .and_then(non_empty)
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_else(|| {
            if spreadsheet_id.is_some() {
                "sheets".to_string()
            } else {
                "file".to_string()
            }
        });

    match kind.as_str() {
        "sheets" => {
            let spreadsheet_id = spreadsheet_id.ok_or_else(|| {
                Error::Config("SPREADSHEET_ID is required for the sheets ledger".to_string())
            })?;
            let credentials = match access_token.and_then(non_empty) {
                Some(token) => SheetsCredentials::AccessToken(token),
                None => SheetsCredentials::ServiceAccount(PathBuf::from(
                    credentials_file
                        .and_then(non_empty)
                        .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string()),
                )),
            };
            Ok(LedgerBackend::Sheets {
                spreadsheet_id,
                credentials,
            })
        }
        "file" => Ok(LedgerBackend::File {
            path: PathBuf::from(
                ledger_file
                    .and_then(non_empty)
                    .unwrap_or_else(|| "./activity.json".to_string()),
            ),
        }),
        "memory" => Ok(LedgerBackend::Memory),
        other => Err(Error::Config(format!(
            "unknown LEDGER_BACKEND {other:?} (expected sheets, file or memory)"
        ))),
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
