use std::{env, fmt::Display, path::Path, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};
use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://ta_management.db?mode=rwc";
const DEFAULT_TOKEN_TTL_HOURS: i64 = 30;

/// Settings every request handler can reach through Rocket's managed state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub frontend_dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let token_ttl_hours: i64 = try_load("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS)?;
        if token_ttl_hours <= 0 {
            bail!("TOKEN_TTL_HOURS must be positive, got {token_ttl_hours}");
        }

        Ok(Self {
            database_url: load_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            jwt_secret,
            token_ttl_hours,
            upload_dir: PathBuf::from(load_or("UPLOAD_DIR", "uploads")),
            frontend_dir: PathBuf::from(load_or("FRONTEND_DIR", "frontend/build")),
        })
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }
}

/// Exporter settings, read before the subscriber exists.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub otlp_api_key: Option<String>,
    pub environment: String,
}

impl TelemetryConfig {
    pub fn load() -> Self {
        Self {
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            otlp_api_key: env::var("OTLP_API_KEY").ok().filter(|v| !v.is_empty()),
            environment: load_or("ROCKET_PROFILE", "development"),
        }
    }
}

/// Which env files were read at startup. Collected before the subscriber
/// exists and logged once it does.
#[derive(Debug, Default)]
pub struct LoadedEnvironment {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

impl LoadedEnvironment {
    pub fn log(&self) {
        for path in &self.missing {
            warn!("Environment file {} not found, skipping", path);
        }
        for path in &self.loaded {
            info!("Loaded environment from: {}", path);
        }
    }
}

/// Loads `.secrets.env` and `config/*.env` into the process environment.
/// Variables already set win, then secrets, then the profile file, then
/// `common.env`. Missing files are skipped.
pub fn load_environment() -> anyhow::Result<LoadedEnvironment> {
    let is_production = env::var("ROCKET_PROFILE").is_ok_and(|p| p == "production");

    let env_files = if is_production {
        [".secrets.env", "config/prod.env", "config/common.env"]
    } else {
        [".secrets.env", "config/dev.env", "config/common.env"]
    };

    let mut report = LoadedEnvironment::default();
    for env_file in env_files {
        if load_env_file(env_file)? {
            report.loaded.push(env_file.to_string());
        } else {
            report.missing.push(env_file.to_string());
        }
    }

    Ok(report)
}

/// Reads `path` without overriding variables that are already set.
/// Returns `false` when the file does not exist.
pub(crate) fn load_env_file(path: impl AsRef<Path>) -> anyhow::Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(false);
    }

    dotenvy::from_filename(path)
        .with_context(|| format!("Failed to load environment file {}", path.display()))?;
    Ok(true)
}

fn load_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw}")),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
