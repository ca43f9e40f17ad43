// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;

/// Which document backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Firestore,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "firestore" => Ok(Backend::Firestore),
            other => Err(ConfigError::Invalid(format!(
                "IDENTITY_BACKEND must be memory or firestore, got {}",
                other
            ))),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Document backend
    pub backend: Backend,
    /// GCP project ID (Firestore backend only)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Commit after every store mutation
    pub auto_save_changes: bool,
    /// Version-check every document written by a session
    pub optimistic_concurrency: bool,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            backend: Backend::Memory,
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            auto_save_changes: true,
            optimistic_concurrency: true,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let backend: Backend = env::var("IDENTITY_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;

        let gcp_project_id = match env::var("GCP_PROJECT_ID") {
            Ok(id) => id,
            Err(_) if backend == Backend::Firestore => {
                return Err(ConfigError::Missing("GCP_PROJECT_ID"))
            }
            Err(_) => "local-dev".to_string(),
        };

        Ok(Self {
            backend,
            gcp_project_id,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT must be a port number".to_string()))?,
            auto_save_changes: parse_flag("AUTO_SAVE_CHANGES", true)?,
            optimistic_concurrency: parse_flag("OPTIMISTIC_CONCURRENCY", true)?,
        })
    }
}

fn parse_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(format!(
                "{} must be true or false, got {}",
                name, value
            ))),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("IDENTITY_BACKEND", "Memory");
        env::set_var("AUTO_SAVE_CHANGES", "false");
        env::remove_var("PORT");
        env::remove_var("OPTIMISTIC_CONCURRENCY");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.backend, Backend::Memory);
        assert!(!config.auto_save_changes);
        assert!(config.optimistic_concurrency);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_backend_rejects_unknown_value() {
        assert!(matches!(
            "postgres".parse::<Backend>(),
            Err(ConfigError::Invalid(_))
        ));
        assert_eq!("firestore".parse::<Backend>().unwrap(), Backend::Firestore);
    }
}
