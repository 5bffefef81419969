//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::TesterConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a config file without validating it.
///
/// The format follows the extension: `.toml` or `.json`.
pub fn parse_config(path: &Path) -> Result<TesterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load and validate configuration from a TOML or JSON file.
pub fn load_config(path: &Path) -> Result<TesterConfig, ConfigError> {
    let config = parse_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rpc-tester-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_toml() {
        let path = write_temp(
            "config.toml",
            r#"
            endpoints = ["http://localhost:8545"]
            test_methods = ["eth_chainId"]

            [test]
            num_requests = 50
            "#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.test.num_requests, 50);
        assert_eq!(config.test_methods, vec!["eth_chainId".to_string()]);
    }

    #[test]
    fn test_load_json() {
        let path = write_temp(
            "config.json",
            r#"{"endpoints": ["http://localhost:8545"], "test": {"concurrency": 3}}"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.test.concurrency, 3);
    }

    #[test]
    fn test_validation_failure() {
        let path = write_temp("config.toml", "endpoints = []");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(err.to_string(), "Validation failed: no endpoints configured");
    }

    #[test]
    fn test_unsupported_extension() {
        let path = write_temp("config.yaml", "endpoints: []");
        assert!(matches!(load_config(&path), Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
