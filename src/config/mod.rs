// src/config/mod.rs
pub mod bridge;

pub use bridge::{BridgeConfig, DeliveryConfig, ReconnectConfig, StreamConfig};
