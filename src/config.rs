use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.razorpay.com/v1";
const DEFAULT_CURRENCY: &str = "INR";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to verify bearer tokens issued by the auth service
    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Public key id presented to the payment gateway
    #[validate(length(min = 1, message = "payment_gateway_key_id must be set"))]
    pub payment_gateway_key_id: String,

    /// Shared secret used to sign gateway callbacks
    #[validate(custom = "validate_gateway_secret")]
    pub payment_gateway_key_secret: String,

    /// Payment gateway REST base URL
    #[serde(default = "default_gateway_base_url")]
    pub payment_gateway_base_url: String,

    /// Timeout for gateway HTTP calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub payment_gateway_timeout_secs: u64,

    /// Currency used when a gateway order request does not name one
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "default_currency must be an ISO 4217 code"))]
    pub default_currency: String,

    /// Reject `apply` once `used_count` reaches `usage_limit` (conditional increment).
    /// When false the limit is a soft cap that concurrent checkouts may overshoot.
    #[serde(default = "default_true_bool")]
    pub coupon_strict_usage_limit: bool,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1, message = "event_channel_capacity must be greater than 0"))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the secrets
    pub fn new(
        database_url: String,
        jwt_secret: String,
        payment_gateway_key_id: String,
        payment_gateway_key_secret: String,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            payment_gateway_key_id,
            payment_gateway_key_secret,
            payment_gateway_base_url: default_gateway_base_url(),
            payment_gateway_timeout_secs: default_gateway_timeout_secs(),
            default_currency: default_currency(),
            coupon_strict_usage_limit: true,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message =
                Some("Set APP__CORS_ALLOWED_ORIGINS when running in production".into());
            errors.add("cors_allowed_origins", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs field validation plus cross-field constraints
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_additional_constraints()
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// The verifier must never run with an empty or placeholder key.
fn validate_gateway_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("payment_gateway_key_secret");
        err.message = Some("payment_gateway_key_secret must be set".into());
        return Err(err);
    }

    const DISALLOWED: [&str; 3] = ["changeme", "secret", "your-key-secret"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("payment_gateway_key_secret");
        err.message = Some("payment_gateway_key_secret must be the real gateway secret".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // Secrets have no defaults; they must come from a config file or the environment.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    build_config(config)
}

fn build_config(config: Config) -> Result<AppConfig, AppConfigError> {
    for required in ["jwt_secret", "payment_gateway_key_id", "payment_gateway_key_secret"] {
        if config.get_string(required).is_err() {
            error!(
                "{} is not configured. Set APP__{} in the environment.",
                required,
                required.to_ascii_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(format!(
                "{} is required but not configured",
                required
            ))));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const JWT: &str = "test_jwt_secret_that_is_comfortably_long_enough";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            JWT.into(),
            "rzp_test_key".into(),
            "gateway_secret_for_tests".into(),
            "development".into(),
        )
    }

    fn from_toml(content: &str) -> Result<AppConfig, AppConfigError> {
        let config = Config::builder()
            .set_default("host", "127.0.0.1")
            .unwrap()
            .set_default("environment", "development")
            .unwrap()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .unwrap();
        build_config(config)
    }

    #[test]
    fn base_config_is_valid() {
        assert!(base_config().validate_all().is_ok());
    }

    #[test]
    fn empty_gateway_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.payment_gateway_key_secret = "   ".into();
        let errors = cfg.validate_all().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("payment_gateway_key_secret"));
    }

    #[test]
    fn production_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_all().is_err());
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn missing_gateway_secret_fails_to_load() {
        let result = from_toml(&format!(
            r#"
            database_url = "sqlite::memory:"
            jwt_secret = "{JWT}"
            payment_gateway_key_id = "rzp_test_key"
            "#
        ));
        assert!(matches!(result, Err(AppConfigError::Load(_))));
    }

    #[test]
    fn loads_defaults_from_file_source() {
        let cfg = from_toml(&format!(
            r#"
            database_url = "sqlite::memory:"
            jwt_secret = "{JWT}"
            payment_gateway_key_id = "rzp_test_key"
            payment_gateway_key_secret = "s3cr3t-from-file"
            coupon_strict_usage_limit = false
            "#
        ))
        .expect("config should load");

        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.default_currency, "INR");
        assert!(!cfg.coupon_strict_usage_limit);
        assert!(cfg.auto_migrate);
    }
}
