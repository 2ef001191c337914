//! Peripheral Session
//!
//! Connection lifecycle for one IR blaster: dial, profile discovery,
//! notification subscription and teardown. The device operations built on
//! top of it live in [`super::operations`].

use crate::domain::error::{DeviceError, Result};
use crate::domain::models::{ConnectionStatus, WriteSummary};
use crate::infrastructure::bluetooth::protocol::{CharacteristicMap, DeviceCommand};
use crate::infrastructure::bluetooth::router::NotificationRouter;
use crate::infrastructure::bluetooth::transport::{BleTransport, GattLink, ServiceTable};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connection state, always updated as one unit
#[derive(Default)]
struct LinkState {
    link: Option<Arc<dyn GattLink>>,
    services: Option<Arc<ServiceTable>>,
    connecting: bool,
    /// Bumped on every successful dial so a stale disconnect watcher can't
    /// clear a newer connection.
    generation: u64,
}

impl LinkState {
    fn clear(&mut self) {
        self.link = None;
        self.services = None;
    }
}

/// Link and profile captured for the duration of one operation
pub(crate) struct ReadyLink {
    pub(crate) link: Arc<dyn GattLink>,
    pub(crate) services: Arc<ServiceTable>,
}

/// One IR blaster peripheral
pub struct Session {
    address: String,
    transport: Arc<dyn BleTransport>,
    characteristics: CharacteristicMap,
    state: Arc<Mutex<LinkState>>,
    timeout: Mutex<Duration>,
    connect_lock: tokio::sync::Mutex<()>,
    pub(crate) command_lock: tokio::sync::Mutex<()>,
    pub(crate) data: NotificationRouter,
    pub(crate) control: NotificationRouter,
}

impl Session {
    pub fn new(address: impl Into<String>, transport: Arc<dyn BleTransport>) -> Self {
        Self {
            address: address.into(),
            transport,
            characteristics: CharacteristicMap::default(),
            state: Arc::new(Mutex::new(LinkState::default())),
            timeout: Mutex::new(DEFAULT_TIMEOUT),
            connect_lock: tokio::sync::Mutex::new(()),
            command_lock: tokio::sync::Mutex::new(()),
            data: NotificationRouter::new("data"),
            control: NotificationRouter::new("control"),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn with_characteristics(mut self, characteristics: CharacteristicMap) -> Self {
        self.characteristics = characteristics;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn characteristics(&self) -> &CharacteristicMap {
        &self.characteristics
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        lock_state(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().link.is_some()
    }

    pub fn is_discovered(&self) -> bool {
        self.lock_state().services.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.lock_state();
        match (&state.link, &state.services) {
            (Some(_), Some(_)) => ConnectionStatus::Ready,
            (Some(_), None) => ConnectionStatus::Connected,
            (None, _) if state.connecting => ConnectionStatus::Connecting,
            (None, _) => ConnectionStatus::Disconnected,
        }
    }

    /// Connect to the peripheral. No-op when already connected.
    ///
    /// A fresh connection is discovered and both notification sources are
    /// subscribed before this returns.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        info!(address = %self.address, "Connecting to IR blaster");
        let timeout = self.timeout();
        self.lock_state().connecting = true;
        let dialed = tokio::time::timeout(timeout, self.transport.dial(&self.address)).await;
        self.lock_state().connecting = false;

        let link = match dialed {
            Ok(Ok(link)) => link,
            Ok(Err(source)) => {
                return Err(DeviceError::Connect {
                    address: self.address.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(DeviceError::Connect {
                    address: self.address.clone(),
                    source: anyhow::anyhow!("dial timed out after {:?}", timeout),
                })
            }
        };

        let generation = {
            let mut state = self.lock_state();
            state.generation += 1;
            state.link = Some(Arc::clone(&link));
            state.services = None;
            state.generation
        };
        self.spawn_disconnect_watcher(&link, generation);

        if let Err(e) = self.subscribe(&link, generation).await {
            warn!(address = %self.address, "Setup failed, dropping connection: {}", e);
            self.lock_state().clear();
            let _ = link.cancel_connection().await;
            return Err(e);
        }

        info!(address = %self.address, "Connected");
        Ok(())
    }

    fn spawn_disconnect_watcher(&self, link: &Arc<dyn GattLink>, generation: u64) {
        let signal = link.disconnected();
        let state = Arc::clone(&self.state);
        let address = self.address.clone();
        tokio::spawn(async move {
            signal.wait().await;
            let mut state = lock_state(&state);
            if state.generation == generation && state.link.is_some() {
                state.clear();
                info!(address = %address, "Peripheral disconnected");
            }
        });
    }

    /// Discover the profile for `link`, caching it for this connection.
    async fn discover_profile(
        &self,
        link: &Arc<dyn GattLink>,
        generation: u64,
    ) -> Result<Arc<ServiceTable>> {
        if let Some(services) = self.cached_services(generation) {
            return Ok(services);
        }

        let services = Arc::new(link.discover_services().await.map_err(DeviceError::Discover)?);
        debug!(
            address = %self.address,
            characteristics = services.len(),
            "Profile discovered"
        );

        let mut state = self.lock_state();
        if state.generation == generation && state.link.is_some() {
            state.services = Some(Arc::clone(&services));
        }
        Ok(services)
    }

    fn cached_services(&self, generation: u64) -> Option<Arc<ServiceTable>> {
        let state = self.lock_state();
        if state.generation != generation {
            return None;
        }
        state.services.clone()
    }

    /// Route both notify characteristics into their routers.
    async fn subscribe(&self, link: &Arc<dyn GattLink>, generation: u64) -> Result<()> {
        let services = self.discover_profile(link, generation).await?;

        let sources = [
            (&self.control, self.characteristics.control_notify),
            (&self.data, self.characteristics.data_notify),
        ];
        for (router, characteristic) in sources {
            if !services.contains(&characteristic) {
                warn!(
                    address = %self.address,
                    %characteristic,
                    "Notify characteristic missing from profile"
                );
                continue;
            }

            let router = router.clone();
            link.subscribe(characteristic, Arc::new(move |frame: &[u8]| router.dispatch(frame)))
                .await
                .map_err(DeviceError::Subscribe)?;
        }
        Ok(())
    }

    /// Connect if needed and make sure the profile is known.
    pub async fn discover(&self) -> Result<()> {
        self.connect()
            .await
            .map_err(|e| DeviceError::Discover(anyhow::Error::new(e)))?;

        let (link, generation) = {
            let state = self.lock_state();
            if state.services.is_some() {
                return Ok(());
            }
            (state.link.clone(), state.generation)
        };
        let link = link.ok_or_else(|| {
            DeviceError::Discover(anyhow::anyhow!("connection lost before discovery"))
        })?;
        self.discover_profile(&link, generation).await?;
        Ok(())
    }

    /// Request teardown without waiting for it.
    pub async fn disconnect(&self) -> Result<()> {
        let link = self.lock_state().link.clone();
        let Some(link) = link else {
            return Ok(());
        };
        info!(address = %self.address, "Disconnecting");
        link.cancel_connection().await.map_err(DeviceError::Disconnect)
    }

    /// Request teardown and wait for the transport to confirm it.
    ///
    /// Local state is cleared even if confirmation does not arrive within the
    /// operation timeout.
    pub async fn disconnect_sync(&self) -> Result<()> {
        let (link, generation) = {
            let state = self.lock_state();
            match &state.link {
                Some(link) => (Arc::clone(link), state.generation),
                None => return Ok(()),
            }
        };

        info!(address = %self.address, "Disconnecting and waiting for confirmation");
        let signal = link.disconnected();
        link.cancel_connection()
            .await
            .map_err(DeviceError::Disconnect)?;

        if tokio::time::timeout(self.timeout(), signal.wait()).await.is_err() {
            warn!(address = %self.address, "No disconnect confirmation, clearing state anyway");
        }

        let mut state = self.lock_state();
        if state.generation == generation {
            state.clear();
        }
        Ok(())
    }

    /// Snapshot of the live link, for operations that already ran [`Session::discover`].
    pub(crate) fn ready_link(&self) -> Result<ReadyLink> {
        let state = self.lock_state();
        match (&state.link, &state.services) {
            (Some(link), Some(services)) => Ok(ReadyLink {
                link: Arc::clone(link),
                services: Arc::clone(services),
            }),
            _ => Err(DeviceError::NotConnected),
        }
    }

    /// Best-effort write. Failures are logged and counted, never returned.
    pub(crate) async fn write(
        &self,
        ready: &ReadyLink,
        characteristic: Uuid,
        value: &[u8],
        summary: &mut WriteSummary,
    ) {
        if !ready.services.contains(&characteristic) {
            warn!(
                address = %self.address,
                %characteristic,
                "Characteristic missing, write skipped"
            );
            summary.record(false);
            return;
        }

        match ready.link.write_characteristic(characteristic, value).await {
            Ok(()) => {
                debug!(address = %self.address, %characteristic, value = ?value, "Wrote");
                summary.record(true);
            }
            Err(e) => {
                warn!(address = %self.address, %characteristic, "Write failed: {}", e);
                summary.record(false);
            }
        }
    }

    pub(crate) async fn send_command(
        &self,
        ready: &ReadyLink,
        characteristic: Uuid,
        command: DeviceCommand,
        summary: &mut WriteSummary,
    ) {
        self.write(ready, characteristic, command.as_bytes(), summary)
            .await;
    }
}

fn lock_state(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
