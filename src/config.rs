//! Configuration and credential persistence.
//!
//! The client id/secret live in a `key=value` config file; the token pair is
//! persisted separately as JSON so the overlay can skip the browser flow on
//! the next launch. Both files sit in the platform config directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Tokens;

const CONFIG_TEMPLATE: &str = "\
# Spotify API Configuration
client.id=your_client_id
client.secret=your_client_secret
";

/// Spotify application credentials, constructed once in `main` and passed
/// down by reference.
#[derive(Clone, Debug)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    /// Load credentials from `path`. If the file does not exist yet, a
    /// template is written and an error asks the user to fill it in.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, CONFIG_TEMPLATE)
                    .with_context(|| format!("could not write {}", path.display()))?;
                bail!(
                    "no configuration found; template written to {}, fill in your credentials",
                    path.display()
                );
            }
            Err(e) => return Err(e).with_context(|| format!("could not read {}", path.display())),
        };

        let config = Self::parse(&contents);
        if config.client_id.is_empty() || config.client_id == "your_client_id" {
            bail!("client.id is not set in {}", path.display());
        }
        if config.client_secret.is_empty() || config.client_secret == "your_client_secret" {
            bail!("client.secret is not set in {}", path.display());
        }
        Ok(config)
    }

    fn parse(contents: &str) -> Self {
        let mut client_id = String::new();
        let mut client_secret = String::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "client.id" => client_id = value.trim().to_string(),
                    "client.secret" => client_secret = value.trim().to_string(),
                    _ => {}
                }
            }
        }

        Self {
            client_id,
            client_secret,
        }
    }
}

/// On-disk token format: `{access_token, refresh_token, last_updated}` with
/// the timestamp in epoch seconds.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: String,
    last_updated: i64,
}

/// Directory holding `config.ini` and `tokens.json`.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("could not determine config directory")?;
    Ok(base.join("spotify-overlay"))
}

/// Load persisted tokens, if any. Returns `None` when the file is missing
/// or unreadable; a stale-but-parseable pair is still returned so the
/// caller can attempt a refresh.
pub fn load_tokens(path: &Path) -> Option<Tokens> {
    let data = fs::read_to_string(path).ok()?;
    let stored: StoredTokens = match serde_json::from_str(&data) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not parse stored tokens");
            return None;
        }
    };

    let last_update = DateTime::<Utc>::from_timestamp(stored.last_updated, 0)?;
    tracing::info!(path = %path.display(), "Loaded stored tokens");
    Some(Tokens {
        access_token: stored.access_token,
        refresh_token: stored.refresh_token,
        last_update,
    })
}

/// Persist tokens atomically (write to a temp file, then rename).
pub fn save_tokens(path: &Path, tokens: &Tokens) -> Result<()> {
    let stored = StoredTokens {
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        last_updated: tokens.last_update.timestamp(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(&stored)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "Saved tokens");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_credentials() {
        let config = Config::parse(
            "# Spotify API Configuration\n\
             client.id=abc123\n\
             client.secret=shh\n",
        );
        assert_eq!(config.client_id, "abc123");
        assert_eq!(config.client_secret, "shh");
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let config = Config::parse("\n# client.id=commented\n\nclient.id=real\n");
        assert_eq!(config.client_id, "real");
        assert_eq!(config.client_secret, "");
    }

    #[test]
    fn parse_ignores_unknown_keys() {
        let config = Config::parse("theme=dark\nclient.id=id\nclient.secret=sec\n");
        assert_eq!(config.client_id, "id");
        assert_eq!(config.client_secret, "sec");
    }

    #[test]
    fn load_rejects_placeholder_credentials() {
        let dir = std::env::temp_dir().join("spotify-overlay-test-config");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.ini");

        fs::write(&path, "client.id=your_client_id\nclient.secret=real\n").unwrap();
        assert!(Config::load(&path).is_err());

        fs::write(&path, "client.id=real\nclient.secret=your_client_secret\n").unwrap();
        assert!(Config::load(&path).is_err());

        fs::write(&path, "client.id=real\nclient.secret=also-real\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.client_id, "real");
        assert_eq!(config.client_secret, "also-real");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn tokens_round_trip_through_disk() {
        let dir = std::env::temp_dir().join("spotify-overlay-test-tokens");
        let path = dir.join("tokens.json");
        let _ = fs::remove_file(&path);

        let tokens = Tokens::new("access".to_string(), "refresh".to_string());
        save_tokens(&path, &tokens).unwrap();

        let loaded = load_tokens(&path).expect("tokens should load back");
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token, "refresh");
        // Epoch-second precision on disk
        assert_eq!(loaded.last_update.timestamp(), tokens.last_update.timestamp());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_tokens_missing_file_is_none() {
        assert!(load_tokens(Path::new("/nonexistent/tokens.json")).is_none());
    }
}
