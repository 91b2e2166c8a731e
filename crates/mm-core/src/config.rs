use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, retry::RetryPolicy, Result};

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub data_dir: PathBuf,
    pub log_json: bool,
    pub polls: PollSettings,
}

/// Runtime knobs of the voting core.
#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    /// Trailing-edge debounce before a poll message is re-rendered.
    pub render_debounce: Duration,
    /// Controllers with no traffic for this long are dropped from memory.
    pub idle_eviction: Duration,
    pub store_retry: RetryPolicy,
    pub transport_retry: RetryPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            render_debounce: Duration::from_millis(1500),
            idle_eviction: Duration::from_secs(30 * 60),
            store_retry: RetryPolicy {
                attempts: 3,
                timeout: Duration::from_secs(5),
                backoff: Duration::from_millis(200),
            },
            transport_retry: RetryPolicy {
                attempts: 2,
                timeout: Duration::from_secs(10),
                backoff: Duration::from_millis(500),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let data_dir = env_path("POLL_DATA_DIR").unwrap_or_else(|| PathBuf::from("./data/polls"));
        fs::create_dir_all(&data_dir)?;

        let log_json = env_bool("LOG_JSON").unwrap_or(false);

        let defaults = PollSettings::default();
        let render_debounce = env_u64("POLL_RENDER_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.render_debounce);
        let idle_eviction = env_u64("POLL_IDLE_EVICTION_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_eviction);
        if idle_eviction.is_zero() {
            return Err(Error::Config(
                "POLL_IDLE_EVICTION_SECS must be greater than zero".to_string(),
            ));
        }

        let store_retry = RetryPolicy {
            attempts: env_u32("STORE_RETRIES")
                .unwrap_or(defaults.store_retry.attempts)
                .max(1),
            timeout: env_u64("STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_retry.timeout),
            backoff: defaults.store_retry.backoff,
        };
        let transport_retry = RetryPolicy {
            attempts: env_u32("TRANSPORT_RETRIES")
                .unwrap_or(defaults.transport_retry.attempts)
                .max(1),
            timeout: env_u64("TRANSPORT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.transport_retry.timeout),
            backoff: defaults.transport_retry.backoff,
        };

        Ok(Self {
            telegram_bot_token,
            data_dir,
            log_json,
            polls: PollSettings {
                render_debounce,
                idle_eviction,
                store_retry,
                transport_retry,
            },
        })
    }
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

        let key = k.trim();
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

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_lines_strip_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\nTELEGRAM_BOT_TOKEN=\"abc\"\n\nPOLL_DATA_DIR = '/srv/polls'\nbroken line\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "abc".to_string()),
                ("POLL_DATA_DIR".to_string(), "/srv/polls".to_string()),
            ]
        );
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert!(parse_bool("yes"));
        assert!(parse_bool(" ON "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }

    #[test]
    fn default_settings_are_usable() {
        let s = PollSettings::default();
        assert!(s.render_debounce > Duration::ZERO);
        assert!(s.store_retry.attempts >= 1);
        assert!(s.transport_retry.attempts >= 1);
    }
}
