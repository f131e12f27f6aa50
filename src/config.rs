use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub notification_webhook_url: String,
    pub public_rps: u32,
    pub admin_rps: u32,
    pub certificate_script: Option<String>,
    pub certificate_output_dir: String,
    pub outbox_poll_ms: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            notification_webhook_url: get_env("NOTIFICATION_WEBHOOK_URL")?,
            public_rps: get_env_parse("PUBLIC_RPS")?,
            admin_rps: get_env_parse("ADMIN_RPS")?,
            certificate_script: env::var("CERTIFICATE_SCRIPT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            certificate_output_dir: env::var("CERTIFICATE_OUTPUT_DIR")
                .unwrap_or_else(|_| "storage/certificates".to_string()),
            outbox_poll_ms: get_env_parse_or("OUTBOX_POLL_MS", 1000)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(_) => get_env_parse(name),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

/// Like [`init_config`] but tolerates an already-initialized config.
pub fn ensure_config() -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    let config = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| config))
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
