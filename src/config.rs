use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_PING_BASE_URL: &str = "https://trackgit.app/api/ping";
const DEFAULT_SHORTENER_HOST: &str = "shorturl-sfy-cx.p.rapidapi.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base of every token's ping URL; the token id is appended as a path segment.
    pub ping_base_url: String,
    /// URL-shortener endpoint. Shortening is skipped when unset.
    pub shortener_url: Option<String>,
    pub shortener_host: String,
    pub shortener_api_key: Option<String>,
    /// Ownership-transfer endpoint.
    pub transfer_url: Option<String>,
    /// Identity token sent as bearer credentials to the transfer endpoint.
    pub auth_token: Option<String>,
    /// Where the "last active token" marker is persisted.
    pub session_file: PathBuf,
    /// Per-request timeout for outbound HTTP calls.
    /// Set via TRACKGIT_HTTP_TIMEOUT_SECS. Default: 10.
    pub http_timeout_secs: u64,
    /// Transient-failure retries for idempotent outbound calls.
    /// Set via TRACKGIT_HTTP_MAX_RETRIES. Default: 2.
    pub http_max_retries: u32,
    /// Width of a request-group bucket in milliseconds. Default: one hour.
    pub bucket_ms: i64,
}

impl Config {
    /// Build a config from an arbitrary variable lookup (env, test maps, ...).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let ping_base_url = non_empty("TRACKGIT_PING_BASE_URL")
            .unwrap_or_else(|| DEFAULT_PING_BASE_URL.into());
        validate_url("TRACKGIT_PING_BASE_URL", &ping_base_url)?;

        let shortener_url = non_empty("TRACKGIT_SHORTENER_URL");
        if let Some(u) = &shortener_url {
            validate_url("TRACKGIT_SHORTENER_URL", u)?;
        }

        let transfer_url = non_empty("TRACKGIT_TRANSFER_URL");
        if let Some(u) = &transfer_url {
            validate_url("TRACKGIT_TRANSFER_URL", u)?;
        }

        let bucket_ms = non_empty("TRACKGIT_BUCKET_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3_600_000);
        if bucket_ms <= 0 {
            anyhow::bail!("TRACKGIT_BUCKET_MS must be positive, got {}", bucket_ms);
        }

        Ok(Config {
            ping_base_url,
            shortener_url,
            shortener_host: non_empty("TRACKGIT_SHORTENER_HOST")
                .unwrap_or_else(|| DEFAULT_SHORTENER_HOST.into()),
            shortener_api_key: non_empty("TRACKGIT_SHORTENER_API_KEY"),
            transfer_url,
            auth_token: non_empty("TRACKGIT_AUTH_TOKEN"),
            session_file: non_empty("TRACKGIT_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".trackgit-session.json")),
            http_timeout_secs: non_empty("TRACKGIT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            http_max_retries: non_empty("TRACKGIT_HTTP_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            bucket_ms,
        })
    }
}

fn validate_url(name: &str, value: &str) -> anyhow::Result<()> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        Ok(u) => anyhow::bail!("{} must be an http(s) URL, got scheme '{}'", name, u.scheme()),
        Err(e) => anyhow::bail!("{} is not a valid URL ({}): {}", name, value, e),
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|name| std::env::var(name).ok())
}
