pub mod gateway;
pub mod network;
pub mod processor;
pub mod protocol;
pub mod service;
pub mod storage;

pub use gateway::{GatewayService, SessionRegistry};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, GatewayConfig, GatewayError, GatewayNode,
    GatewayResult, GLOBAL_CONFIG,
};
