use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::readiness::training::UnknownClassifier;
use crate::readiness::{ClassifierKind, TrainingConfig};

/// Deployment stage, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub readiness: ReadinessConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port = var_or("APP_PORT", "3000")
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        Ok(Self {
            environment: AppEnvironment::from_str(&var_or("APP_ENV", "development")),
            server: ServerConfig {
                host: var_or("APP_HOST", "127.0.0.1"),
                port,
            },
            telemetry: TelemetryConfig {
                log_level: var_or("APP_LOG_LEVEL", "info"),
            },
            readiness: ReadinessConfig::from_env()?,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Unset and blank variables both read as absent.
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|raw| !raw.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = if self.host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host
                .parse()
                .map_err(|source| ConfigError::InvalidHost { source })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Log filter fallback when `RUST_LOG` is unset.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Data locations and model selection for the readiness pipeline.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub data_path: PathBuf,
    pub models_dir: PathBuf,
    pub prefer_ml: bool,
    pub classifier: ClassifierKind,
    pub train_seed: Option<u64>,
}

impl ReadinessConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let prefer_ml = non_empty_var("READINESS_PREFER_ML")
            .map(|raw| parse_flag(&raw).ok_or(ConfigError::InvalidPreferMl(raw)))
            .transpose()?
            .unwrap_or(true);

        let classifier = non_empty_var("READINESS_CLASSIFIER")
            .map(|raw| raw.parse::<ClassifierKind>())
            .transpose()
            .map_err(|source| ConfigError::InvalidClassifier { source })?
            .unwrap_or_default();

        let train_seed = non_empty_var("READINESS_TRAIN_SEED")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidSeed(raw))
            })
            .transpose()?;

        Ok(Self {
            data_path: var_or("READINESS_DATA_PATH", "data/readiness.json").into(),
            models_dir: var_or("READINESS_MODELS_DIR", "models").into(),
            prefer_ml,
            classifier,
            train_seed,
        })
    }

    pub fn training(&self) -> TrainingConfig {
        TrainingConfig {
            seed: self.train_seed,
            ..TrainingConfig::default()
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },
    #[error("READINESS_PREFER_ML must be true or false, got '{0}'")]
    InvalidPreferMl(String),
    #[error("READINESS_CLASSIFIER is invalid: {source}")]
    InvalidClassifier { source: UnknownClassifier },
    #[error("READINESS_TRAIN_SEED must be an unsigned integer, got '{0}'")]
    InvalidSeed(String),
}
