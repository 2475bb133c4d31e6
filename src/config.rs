//! Relay configuration: defaults, optional TOML file, CLI overrides,
//! secrets from the environment.

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cli::Args;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET not set. Export it or pass via environment.")]
    MissingJwtSecret,
    #[error("GOOGLE_API_KEY not set. Export it or pass via environment.")]
    MissingApiKey,
    #[error("failed to read config file {path}: {detail}")]
    FileRead { path: String, detail: String },
    #[error("failed to parse config file {path}: {detail}")]
    FileParse { path: String, detail: String },
}

/// Optional values loadable from a TOML file. Absent keys fall through
/// to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub directory_url: Option<String>,
    pub model: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::FileRead {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?;
        toml::from_str(&raw).map_err(|err| ConfigError::FileParse {
            path: path.display().to_string(),
            detail: err.to_string(),
        })
    }
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub bind: String,
    pub directory_url: Option<String>,
    pub model: String,
    pub jwt_secret: String,
    pub google_api_key: String,
}

impl RelayConfig {
    /// Resolve from CLI arguments, an optional config file, and the
    /// environment. Precedence: CLI flag → file value → default.
    pub fn resolve(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::MissingJwtSecret)?;
        let google_api_key =
            env::var("GOOGLE_API_KEY").map_err(|_| ConfigError::MissingApiKey)?;
        Ok(Self::from_parts(args, file, jwt_secret, google_api_key))
    }

    /// Merge the non-secret layers. Split out so precedence is testable
    /// without touching the process environment.
    pub fn from_parts(
        args: &Args,
        file: FileConfig,
        jwt_secret: String,
        google_api_key: String,
    ) -> Self {
        RelayConfig {
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            bind: args
                .bind
                .clone()
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            directory_url: args.directory_url.clone().or(file.directory_url),
            model: args
                .model
                .clone()
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            jwt_secret,
            google_api_key,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
