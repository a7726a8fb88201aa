use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{broadcast::BroadcastSettings, errors::Error, Result};

const DEFAULT_BATCH_SIZE: usize = 25;
const DEFAULT_BATCH_DELAY_MS: u64 = 1000;
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Operators allowed to trigger broadcasts.
    pub telegram_allowed_users: Vec<i64>,

    // Storage
    pub data_file: PathBuf,

    // Broadcast
    /// Restricts recipients to one bot account; `None` means all recipients.
    pub account_key: Option<String>,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub history_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if telegram_allowed_users.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ALLOWED_USERS environment variable is required".to_string(),
            ));
        }

        let data_file = PathBuf::from(
            env_str("BCAST_DATA_FILE").unwrap_or_else(|| "./bcast-data.json".to_string()),
        );
        if let Some(parent) = data_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let account_key = env_str("BCAST_ACCOUNT_KEY").and_then(non_empty);

        // A zero batch size would never pace; clamp it.
        let batch_size = env_usize("BROADCAST_BATCH_SIZE")
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .max(1);
        let batch_delay = Duration::from_millis(
            env_u64("BROADCAST_BATCH_DELAY_MS").unwrap_or(DEFAULT_BATCH_DELAY_MS),
        );
        let history_limit = env_usize("BROADCAST_HISTORY_LIMIT").unwrap_or(DEFAULT_HISTORY_LIMIT);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            data_file,
            account_key,
            batch_size,
            batch_delay,
            history_limit,
        })
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    apply_dotenv(&contents);
}

fn apply_dotenv(contents: &str) {
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
