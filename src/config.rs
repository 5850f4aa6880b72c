use anyhow::{Context, Result};
use std::{collections::HashMap, env};

use crate::models::SharedSecret;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub port: u16,
    pub secret_keys: HashMap<String, SharedSecret>,
    /// How old a provider callback timestamp may be, in seconds.
    pub timestamp_expiration: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        let port = env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8081);
        let secret_keys = match env::var("CREDIT_PROVIDER_SECRET_KEYS") {
            Ok(raw) => parse_secret_keys(&raw)?,
            Err(_) => HashMap::new(),
        };
        let timestamp_expiration = env::var("CREDIT_PROVIDER_TIMESTAMP_EXPIRATION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15 * 60);
        Ok(Self { database_url, max_connections, port, secret_keys, timestamp_expiration })
    }
}

/// `{"provider_id": "secret", ...}`; empty secrets are dropped.
pub fn parse_secret_keys(raw: &str) -> Result<HashMap<String, SharedSecret>> {
    let map: HashMap<String, String> =
        serde_json::from_str(raw).context("CREDIT_PROVIDER_SECRET_KEYS must be a JSON object")?;
    Ok(map
        .into_iter()
        .filter_map(|(id, secret)| SharedSecret::new(secret).map(|s| (id, s)))
        .collect())
}
