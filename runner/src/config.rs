use serde_derive::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub address: Ipv4Addr,
    pub port: u16,
    /// Session table capacity.
    pub max_connections: usize,
    /// Kernel queue depth. 0 picks the engine default.
    pub queue_depth: u32,
    /// Frame arena size in bytes. 0 picks the engine default.
    pub frame_pool_size: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            address: Ipv4Addr::LOCALHOST,
            port: 25565,
            max_connections: 1024,
            queue_depth: 0,
            frame_pool_size: 0,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.port, 25565);
        assert_eq!(config.max_connections, 1024);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: ServerConfig = serdeconv::from_toml_str(
            r#"
port = 25570
max_connections = 64
"#,
        )
        .unwrap();

        assert_eq!(config.port, 25570);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.queue_depth, 0);
    }
}
