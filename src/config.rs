use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::alerts::AlertRuleConfig;
use crate::error::MohawkError;
use crate::Result;

/// Environment variable naming an optional configuration file.
pub const CONFIG_PATH_ENV: &str = "MOHAWK_CONFIG";
pub const ENV_PREFIX: &str = "MOHAWK";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub storage: String,
    /// Backend options as `key=value&key=value`.
    pub options: String,
    pub port: u16,
    pub tls: bool,
    pub cert: String,
    pub key: String,
    pub gzip: bool,
    /// Bearer token; empty disables authentication.
    pub token: String,
    pub media: PathBuf,
    pub verbose: bool,
    pub quiet: bool,
    pub alerts: Vec<AlertRuleConfig>,
    pub alerts_webhook: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage: "memory".to_string(),
            options: String::new(),
            port: 8080,
            tls: false,
            cert: "server.pem".to_string(),
            key: "server.key".to_string(),
            gzip: false,
            token: String::new(),
            media: PathBuf::from("./media"),
            verbose: false,
            quiet: false,
            alerts: Vec::new(),
            alerts_webhook: None,
        }
    }
}

impl ServerConfig {
    /// Loads the file named by `MOHAWK_CONFIG`, if any, then `MOHAWK_*`
    /// environment variables on top.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(MohawkError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let config: ServerConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tls {
            return Err(MohawkError::Configuration(
                "TLS is not served directly; terminate TLS in front of the server".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(MohawkError::Configuration("port must not be 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() {
        let config = ServerConfig::load_from(None).unwrap();
        assert_eq!(config.storage, "memory");
        assert_eq!(config.port, 8080);
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn test_load_yaml_with_alerts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mohawk.yaml");
        fs::write(
            &path,
            r#"
storage: duckdb
options: db-dirname=/tmp/mohawk
port: 9090
gzip: true
token: secret
alerts:
  - id: cpu-high
    metric: cpu
    threshold: 90
    operator: ">"
    interval: 10s
"#,
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.storage, "duckdb");
        assert_eq!(config.options, "db-dirname=/tmp/mohawk");
        assert_eq!(config.port, 9090);
        assert!(config.gzip);
        assert_eq!(config.token, "secret");
        assert_eq!(config.alerts.len(), 1);
        assert_eq!(config.alerts[0].id, "cpu-high");
        assert_eq!(config.alerts[0].threshold, 90.0);
        assert_eq!(config.alerts[0].interval, "10s");
    }

    #[test]
    fn test_tls_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mohawk.toml");
        fs::write(&path, "tls = true\n").unwrap();

        assert!(matches!(
            ServerConfig::load_from(Some(&path)),
            Err(MohawkError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(ServerConfig::load_from(Some(Path::new("/nonexistent/mohawk.toml"))).is_err());
    }
}
