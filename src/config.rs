//! Server configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Data directory holding the write-ahead log.
    pub data_dir: PathBuf,
    /// This node's server id in the cluster metadata.
    pub server_id: String,
    /// Human-readable server name reported in health.
    pub short_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8529".to_string(),
            data_dir: PathBuf::from("./corvusdb-data"),
            server_id: "PRMR-0001".to_string(),
            short_name: "DBServer0001".to_string(),
        }
    }
}

impl ServerConfig {
    /// Directory the write-ahead log lives in.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_dir_is_under_data_dir() {
        let config = ServerConfig {
            data_dir: PathBuf::from("/tmp/x"),
            ..Default::default()
        };
        assert_eq!(config.wal_dir(), PathBuf::from("/tmp/x/wal"));
    }
}
