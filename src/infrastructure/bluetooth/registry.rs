//! Device Registry
//!
//! Address-keyed table of sessions shared by every caller of the crate.
//! Sessions are created on first use and live until the registry is dropped.

use crate::domain::models::DeviceStatus;
use crate::infrastructure::bluetooth::protocol::CharacteristicMap;
use crate::infrastructure::bluetooth::session::{Session, DEFAULT_TIMEOUT};
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

pub struct DeviceRegistry {
    transport: Arc<dyn BleTransport>,
    characteristics: CharacteristicMap,
    default_timeout: Duration,
    devices: Mutex<HashMap<String, Arc<Session>>>,
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn BleTransport>) -> Self {
        Self {
            transport,
            characteristics: CharacteristicMap::default(),
            default_timeout: DEFAULT_TIMEOUT,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_characteristics(mut self, characteristics: CharacteristicMap) -> Self {
        self.characteristics = characteristics;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Addresses are compared case-insensitively.
    fn key(address: &str) -> String {
        address.trim().to_ascii_uppercase()
    }

    /// Session for `address`, created on first use.
    pub fn session(&self, address: &str) -> Arc<Session> {
        let key = Self::key(address);
        let mut devices = self.lock();
        let session = devices.entry(key.clone()).or_insert_with(|| {
            info!(address = %key, "Registering device");
            Arc::new(
                Session::new(key.clone(), Arc::clone(&self.transport))
                    .with_characteristics(self.characteristics)
                    .with_timeout(self.default_timeout),
            )
        });
        Arc::clone(session)
    }

    pub fn get(&self, address: &str) -> Option<Arc<Session>> {
        self.lock().get(&Self::key(address)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Connection state of every known device, ordered by address.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut statuses: Vec<DeviceStatus> = self
            .lock()
            .values()
            .map(|session| DeviceStatus {
                address: session.address().to_string(),
                connected: session.is_connected(),
            })
            .collect();
        statuses.sort_by(|a, b| a.address.cmp(&b.address));
        statuses
    }

    /// Request teardown of every connected device.
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<Session>> = self.lock().values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.disconnect().await {
                warn!(address = %session.address(), "Disconnect failed: {}", e);
            }
        }
        info!("Disconnected all BLE connections");
    }
}
