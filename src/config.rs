//! Configuration, secret loading and logging setup for host binaries.

use std::time::Duration;

use clap::Parser;
use tracing::error;

use crate::error::{AuthError, AuthResult};
use crate::jwt::HmacKeys;

/// Access token duration: 5 minutes
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(5 * 60);

/// Refresh token duration: 2 weeks
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Password reset token duration: 30 minutes
pub const DEFAULT_RESET_TTL: Duration = Duration::from_secs(30 * 60);

/// Longest lifetime accepted for any token: 100 years
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub const DEFAULT_ISSUER: &str = "tokenwarden";

pub const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

/// Token lifetimes and issuer name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            reset_ttl: DEFAULT_RESET_TTL,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer.trim().is_empty() {
            return Err(AuthError::Config("issuer must not be empty".to_string()));
        }
        if self.access_ttl.as_secs() == 0
            || self.refresh_ttl.as_secs() == 0
            || self.reset_ttl.as_secs() == 0
        {
            return Err(AuthError::Config(
                "token lifetimes must be at least one second".to_string(),
            ));
        }
        if self.access_ttl > MAX_TTL || self.refresh_ttl > MAX_TTL || self.reset_ttl > MAX_TTL {
            return Err(AuthError::Config(format!(
                "token lifetimes must not exceed {} seconds",
                MAX_TTL.as_secs()
            )));
        }
        if self.access_ttl >= self.refresh_ttl {
            return Err(AuthError::Config(
                "access token lifetime must be shorter than refresh token lifetime".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(clap::ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Options a host binary can parse directly or `#[command(flatten)]` into its own.
#[derive(Parser, Debug, Clone)]
#[command(name = "tokenwarden", about = "Token lifecycle engine")]
pub struct AuthArgs {
    /// Path to SQLite database file
    #[arg(short, long, env = "TOKENWARDEN_DATABASE", default_value = "tokenwarden.db")]
    pub database: String,

    /// Issuer name written into access tokens
    #[arg(long, env = "TOKENWARDEN_ISSUER", default_value = DEFAULT_ISSUER)]
    pub issuer: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "TOKENWARDEN_ACCESS_TTL", default_value_t = DEFAULT_ACCESS_TTL.as_secs())]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "TOKENWARDEN_REFRESH_TTL", default_value_t = DEFAULT_REFRESH_TTL.as_secs())]
    pub refresh_ttl_secs: u64,

    /// Password reset token lifetime in seconds
    #[arg(long, env = "TOKENWARDEN_RESET_TTL", default_value_t = DEFAULT_RESET_TTL.as_secs())]
    pub reset_ttl_secs: u64,

    /// Path to file containing the access token secret. Prefer the ACCESS_TOKEN_SECRET env var
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer the REFRESH_TOKEN_SECRET env var
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl AuthArgs {
    pub fn auth_config(&self) -> AuthResult<AuthConfig> {
        let config = AuthConfig {
            issuer: self.issuer.clone(),
            access_ttl: Duration::from_secs(self.access_ttl_secs),
            refresh_ttl: Duration::from_secs(self.refresh_ttl_secs),
            reset_ttl: Duration::from_secs(self.reset_ttl_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load both secrets and build the signing keys.
    pub fn signing_keys(&self) -> AuthResult<HmacKeys> {
        let access = load_secret(ACCESS_SECRET_ENV, self.access_secret_file.as_deref())?;
        let refresh = load_secret(REFRESH_SECRET_ENV, self.refresh_secret_file.as_deref())?;
        HmacKeys::new(access.as_bytes(), refresh.as_bytes())
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    // A subscriber installed by the host (or an earlier test) wins.
    let _ = match format {
        LogFormat::Pretty => tracing_subscriber::fmt().try_init(),
        LogFormat::Json => tracing_subscriber::fmt().json().try_init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().try_init(),
    };
}

/// Load a secret from an environment variable, falling back to a file.
pub fn load_secret(env_var: &str, file: Option<&str>) -> AuthResult<String> {
    if let Ok(secret) = std::env::var(env_var) {
        return Ok(secret);
    }
    let Some(path) = file else {
        error!(
            env_var,
            "Secret is required. Set the environment variable (recommended) or pass a secret file"
        );
        return Err(AuthError::Config(format!("{env_var} is not set")));
    };
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().to_string()),
        Err(e) => {
            error!(path = %path, error = %e, "Failed to read secret file");
            Err(AuthError::Config(format!("cannot read secret file {path}")))
        }
    }
}
