pub mod config;
pub mod fetch;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use warpgrid_bridge::BridgeConfig;

/// Load the configuration file, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_path_means_defaults() {
        assert_eq!(load_config(None).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn loads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read_chunk_size = 1024\n\n[host]\nthread_name = \"edge\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.read_chunk_size, 1024);
        assert_eq!(config.host.thread_name, "edge");
        assert_eq!(config.socket_queue_capacity, 128);
    }

    #[test]
    fn unreadable_config_names_the_file() {
        let err = load_config(Some(Path::new("/nonexistent/warpbridge.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/warpbridge.toml"));
    }
}
