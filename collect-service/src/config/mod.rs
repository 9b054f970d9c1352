//! Configuration for collect-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub cors: CorsConfig,
}

/// Where orders and statuses live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    /// Process-local store; contents are lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(Self::Mongo),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "STORE_BACKEND must be 'mongo' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

/// Credentials and tenant for the payment gateway's collect-request API.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    /// Shared secret used to sign collect requests.
    pub pg_key: Secret<String>,
    /// Tenant every order created by this deployment belongs to.
    pub school_id: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookConfig {
    /// Reject notifications for ids the order store does not know.
    pub require_known_order: bool,
    /// Do not let an older notification overwrite a terminal status.
    pub reject_stale: bool,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_production();

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "collect-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store: get_env("STORE_BACKEND", Some("mongo"), false)?.parse()?,
            database: DatabaseConfig {
                url: Secret::new(get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                db_name: get_env("MONGODB_DATABASE", Some("collect_db"), false)?,
            },
            gateway: GatewayConfig {
                base_url: get_env(
                    "GATEWAY_BASE_URL",
                    Some("https://dev-vanilla.edviron.com"),
                    false,
                )?,
                api_key: Secret::new(get_env("GATEWAY_API_KEY", Some(""), is_prod)?),
                pg_key: Secret::new(get_env("GATEWAY_PG_KEY", Some(""), is_prod)?),
                school_id: get_env("GATEWAY_SCHOOL_ID", None, false)?,
                timeout_secs: parse_env("GATEWAY_TIMEOUT_SECS", 30)?,
            },
            webhook: WebhookConfig {
                require_known_order: parse_env("WEBHOOK_REQUIRE_KNOWN_ORDER", false)?,
                reject_stale: parse_env("WEBHOOK_REJECT_STALE", false)?,
            },
            cors: CorsConfig {
                allowed_origin: env::var("CORS_ALLOWED_ORIGIN").ok().filter(|s| !s.is_empty()),
            },
            common,
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} is required in production but not set",
            key
        ))),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(val) => val.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}'", key, val))
        }),
        Err(_) => Ok(default),
    }
}
