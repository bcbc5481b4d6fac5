use std::path::PathBuf;

use anyhow::{Context, bail};

const MAX_TOKEN_TTL_DAYS: i64 = 365;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your-secret-key",
    "secret",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// `FRIENDZI_ENV=development` exposes internal error detail in responses.
    pub development: bool,
    /// `None` means any origin.
    pub cors_origin: Option<String>,
    pub reconcile_on_start: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("FRIENDZI_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("FRIENDZI_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = match var("FRIENDZI_PORT") {
            Some(p) => p
                .parse()
                .with_context(|| format!("FRIENDZI_PORT '{}' is not a valid port", p))?,
            None => 8000,
        };

        let token_ttl_days = match var("FRIENDZI_TOKEN_TTL_DAYS") {
            Some(d) => {
                let days: i64 = d
                    .parse()
                    .with_context(|| format!("FRIENDZI_TOKEN_TTL_DAYS '{}' is not a number", d))?;
                if !(1..=MAX_TOKEN_TTL_DAYS).contains(&days) {
                    bail!(
                        "FRIENDZI_TOKEN_TTL_DAYS must be between 1 and {}",
                        MAX_TOKEN_TTL_DAYS
                    );
                }
                days
            }
            None => 7,
        };

        let reconcile_on_start = match var("FRIENDZI_RECONCILE_ON_START").as_deref() {
            None => false,
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(other) => bail!("FRIENDZI_RECONCILE_ON_START '{}' is not a boolean", other),
        };

        Ok(Self {
            host: var("FRIENDZI_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("FRIENDZI_DB_PATH")
                .unwrap_or_else(|| "friendzi.db".into())
                .into(),
            jwt_secret,
            token_ttl_days,
            development: var("FRIENDZI_ENV").as_deref() == Some("development"),
            cors_origin: var("FRIENDZI_CORS_ORIGIN").filter(|o| o != "*"),
            reconcile_on_start,
        })
    }
}
