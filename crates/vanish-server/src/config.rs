use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub session_secret: String,
    pub service_key: String,
    pub site_url: String,
    pub admin_email: String,
    pub mail_webhook_url: Option<String>,
    pub reap_interval_secs: u64,
    pub blob_sweep_secs: u64,
    pub trust_proxy: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let session_secret = required_secret(&lookup, "VANISH_SESSION_SECRET")?;
        let service_key = required_secret(&lookup, "VANISH_SERVICE_KEY")?;

        let admin_email = var("VANISH_ADMIN_EMAIL", "");
        if !admin_email.contains('@') {
            bail!("VANISH_ADMIN_EMAIL must be set to the address allowed to sign in");
        }

        let site_url = var("VANISH_SITE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        if !(site_url.starts_with("http://") || site_url.starts_with("https://")) {
            bail!("VANISH_SITE_URL must be an http(s) URL, got '{}'", site_url);
        }

        let port: u16 = var("VANISH_PORT", "3000")
            .parse()
            .context("VANISH_PORT must be a port number")?;
        let reap_interval_secs: u64 = var("VANISH_REAP_INTERVAL_SECS", "0")
            .parse()
            .context("VANISH_REAP_INTERVAL_SECS must be a number of seconds")?;
        let blob_sweep_secs: u64 = var("VANISH_BLOB_SWEEP_SECS", "3600")
            .parse()
            .context("VANISH_BLOB_SWEEP_SECS must be a number of seconds")?;
        let trust_proxy = match var("VANISH_TRUST_PROXY", "false").trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => bail!("VANISH_TRUST_PROXY must be true or false, got '{}'", other),
        };

        Ok(Self {
            host: var("VANISH_HOST", "0.0.0.0"),
            port,
            db_path: var("VANISH_DB_PATH", "vanish.db").into(),
            storage_dir: var("VANISH_STORAGE_DIR", "./vanish-storage").into(),
            session_secret,
            service_key,
            site_url,
            admin_email,
            mail_webhook_url: lookup("VANISH_MAIL_WEBHOOK_URL").filter(|v| !v.trim().is_empty()),
            reap_interval_secs,
            blob_sweep_secs,
            trust_proxy,
        })
    }
}

fn required_secret<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let secret = lookup(key).unwrap_or_default();
    if secret.is_empty() || PLACEHOLDER_SECRETS.contains(&secret.as_str()) {
        bail!("{} is unset or still a placeholder", key);
    }
    Ok(secret)
}
