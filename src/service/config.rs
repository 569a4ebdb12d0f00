use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::app_error::GatewayError::InvalidValue;
use super::app_error::GatewayResult;

pub static GLOBAL_CONFIG: OnceCell<GatewayConfig> = OnceCell::new();

pub fn global_config() -> &'static GatewayConfig {
    GLOBAL_CONFIG.get_or_init(GatewayConfig::default)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    pub node_id: i32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig { node_id: 0 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    /// Upper bound for a single request frame.
    pub max_frame_size: usize,
    /// Bound of the per-call outbound reply channel; this is the only
    /// buffering between a record source and the transport.
    pub reply_channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 6565,
            max_connection: 1024,
            max_frame_size: 4 * 1024 * 1024,
            reply_channel_capacity: 64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// How many partitions the in-process records storage gives each topic.
    /// Key-hash routing spreads publishes across exactly this many logs.
    pub partitions_per_topic: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            partitions_per_topic: 4,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// Loads a TOML config file. Unreadable or malformed files surface as
    /// errors so the entrypoint can report them; missing files are the
    /// caller's decision (the node falls back to defaults).
    pub fn load<P: AsRef<Path>>(path: P) -> GatewayResult<GatewayConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| InvalidValue("config path is not valid utf-8".to_string()))?;
        let loaded = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;
        let gateway_config: GatewayConfig = loaded.try_deserialize()?;
        Ok(gateway_config)
    }
}
