use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Defaults to the API URL.
    pub chat_url: String,
    pub credential_path: Option<PathBuf>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub refresh_leeway: chrono::Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = var("PARLOR_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let chat_url = var("PARLOR_CHAT_URL").unwrap_or_else(|| api_url.clone());

        let connect_timeout = var("PARLOR_CONNECT_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("PARLOR_CONNECT_TIMEOUT_SECS must be a whole number of seconds")?
            .map(Duration::from_secs);

        let refresh_leeway = var("PARLOR_REFRESH_LEEWAY_SECS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("PARLOR_REFRESH_LEEWAY_SECS must be a non-negative whole number of seconds")?
            .unwrap_or(0);
        let refresh_leeway = chrono::Duration::try_seconds(i64::from(refresh_leeway))
            .context("PARLOR_REFRESH_LEEWAY_SECS is out of range")?;

        Ok(Self {
            api_url,
            chat_url,
            credential_path: var("PARLOR_CREDENTIAL_PATH").map(PathBuf::from),
            email: var("PARLOR_EMAIL"),
            password: var("PARLOR_PASSWORD"),
            connect_timeout,
            refresh_leeway,
        })
    }
}
