use anyhow::{Context, Result};

/// Default request body cap for uploads (20 MiB). Scanned PDFs get large.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Only malformed values fail startup; every variable is optional.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server-held credential for the chat-completion API.
    /// Without it the proxy endpoint answers 500 and in-process generation fails per record.
    pub openai_api_key: Option<String>,
    /// When set, record generation goes through this proxy URL instead of calling
    /// the chat-completion API in-process.
    pub generate_proxy_url: Option<String>,
    /// When set, the saved form state lives in Redis; otherwise in memory.
    pub redis_url: Option<String>,
    pub max_upload_bytes: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            openai_api_key: optional_env("OPENAI_API_KEY"),
            generate_proxy_url: optional_env("GENERATE_PROXY_URL"),
            redis_url: optional_env("REDIS_URL"),
            max_upload_bytes: match optional_env("MAX_UPLOAD_BYTES") {
                Some(v) => v
                    .parse::<usize>()
                    .context("MAX_UPLOAD_BYTES must be a byte count")?,
                None => DEFAULT_MAX_UPLOAD_BYTES,
            },
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Reads an environment variable, treating unset and blank the same.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
