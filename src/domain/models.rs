use serde::{Deserialize, Serialize};

/// Result of a temperature query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub success: bool,
    pub have_data: bool,
    /// Degrees Celsius, 1/16 degree resolution. 0 when absent.
    pub temperature: f64,
    /// Reserved by the peripheral, always 0.
    pub humidity: f64,
}

impl SensorData {
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Result of an IR learn capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnData {
    pub success: bool,
    pub have_data: bool,
    /// Captured IR payload, lowercase hex.
    pub data: String,
}

impl LearnData {
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Which remote family the peripheral should capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearnMode {
    /// Audio/video remotes
    Av,
    /// Air conditioner remotes
    Ac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Connected and the GATT profile has been discovered
    Ready,
}

/// Snapshot of one known peripheral, as reported by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub address: String,
    pub connected: bool,
}

/// Outcome of a best-effort sequence of characteristic writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub attempted: usize,
    pub failed: usize,
}

impl WriteSummary {
    pub fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if !ok {
            self.failed += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}
