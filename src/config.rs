//! Server configuration, loaded from a YAML file.
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ServerError};
use weblog::Level;

fn default_src_dir() -> String {
    "./resources".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_queue_size() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// 0: listener LT / conn LT, 1: listener LT / conn ET,
    /// 2: listener ET / conn LT, 3: listener ET / conn ET.
    pub trig_mode: u8,
    pub idle_timeout_ms: u64,

    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_pool_size: usize,

    pub worker_count: usize,

    #[serde(default = "default_src_dir")]
    pub src_dir: String,

    #[serde(default)]
    pub logging_on: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_queue_size")]
    pub log_queue_size: usize,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig> {
        let contents = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.trig_mode > 3 {
            return Err(ServerError::from(format!(
                "trig_mode must be 0..=3, got {}",
                self.trig_mode
            )));
        }
        if self.worker_count == 0 {
            return Err(ServerError::from("worker_count must be at least 1".to_string()));
        }
        if self.db_pool_size == 0 {
            return Err(ServerError::from("db_pool_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Level {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn listener_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 2 | 3)
    }

    pub fn conn_edge_triggered(&self) -> bool {
        matches!(self.trig_mode, 1 | 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_trig_mode() {
        let yaml = r#"
port: 1316
trig_mode: 9
idle_timeout_ms: 60000
db_host: localhost
db_port: 3306
db_user: root
db_password: root
db_name: webserver
db_pool_size: 4
worker_count: 4
"#;
        let path = std::env::temp_dir().join("tinyhttpd_bad_config.yaml");
        fs::write(&path, yaml).unwrap();
        let err = ServerConfig::load(&path);
        assert!(err.is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn trig_mode_selects_edge_vs_level() {
        let yaml = r#"
port: 1316
trig_mode: 3
idle_timeout_ms: 60000
db_host: localhost
db_port: 3306
db_user: root
db_password: root
db_name: webserver
db_pool_size: 4
worker_count: 4
"#;
        let path = std::env::temp_dir().join("tinyhttpd_good_config.yaml");
        fs::write(&path, yaml).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert!(config.listener_edge_triggered());
        assert!(config.conn_edge_triggered());
        let _ = fs::remove_file(&path);
    }
}
