//! Driver for a BLE infrared blaster peripheral.
//!
//! Temperature queries, IR learning and IR emission over two pairs of GATT
//! characteristics, with notification traffic demultiplexed into
//! per-request subscriptions.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{DeviceError, Result};
pub use domain::models::{
    ConnectionStatus, DeviceStatus, LearnData, LearnMode, SensorData, WriteSummary,
};
pub use infrastructure::bluetooth::{BleTransport, DeviceRegistry, GattLink, Session};
