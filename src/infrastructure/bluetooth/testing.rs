//! Scripted in-memory transport for tests.

use super::protocol::CharacteristicMap;
use super::transport::{
    BleTransport, DisconnectNotifier, DisconnectSignal, GattLink, NotificationHandler,
    ServiceTable,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Gap between scripted notifications
pub const REACTION_STEP: Duration = Duration::from_millis(10);

struct Trigger {
    characteristic: Uuid,
    value: Vec<u8>,
    reactions: Vec<Vec<(Uuid, Vec<u8>)>>,
}

#[derive(Default)]
struct MockState {
    services: ServiceTable,
    hang_dial: bool,
    fail_dial: bool,
    fail_discover: bool,
    fail_subscribe: bool,
    failing_writes: HashSet<Uuid>,
    writes: Vec<(Uuid, Vec<u8>)>,
    handlers: HashMap<Uuid, NotificationHandler>,
    triggers: Vec<Trigger>,
    notifier: Option<Arc<DisconnectNotifier>>,
    dial_count: usize,
    discover_count: usize,
    cancel_count: usize,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A peripheral exposing the four protocol characteristics.
    pub fn new() -> Self {
        let map = CharacteristicMap::default();
        let state = MockState {
            services: [
                map.data_write,
                map.data_notify,
                map.control_write,
                map.control_notify,
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_services(self, services: ServiceTable) -> Self {
        self.lock().services = services;
        self
    }

    pub fn hang_dial(self) -> Self {
        self.lock().hang_dial = true;
        self
    }

    pub fn fail_dial(self) -> Self {
        self.lock().fail_dial = true;
        self
    }

    pub fn fail_discover(self) -> Self {
        self.lock().fail_discover = true;
        self
    }

    pub fn fail_subscribe(self) -> Self {
        self.lock().fail_subscribe = true;
        self
    }

    pub fn fail_writes_to(self, characteristic: Uuid) -> Self {
        self.lock().failing_writes.insert(characteristic);
        self
    }

    /// After `value` is written to `characteristic`, push `reactions` one
    /// [`REACTION_STEP`] apart.
    pub fn react(
        self,
        characteristic: Uuid,
        value: &[u8],
        reactions: Vec<(Uuid, Vec<u8>)>,
    ) -> Self {
        let steps = reactions.into_iter().map(|reaction| vec![reaction]).collect();
        self.react_in_bursts(characteristic, value, steps)
    }

    /// Like [`MockTransport::react`], but every frame of a step is pushed
    /// back to back without yielding, as a radio delivering a burst would.
    pub fn react_in_bursts(
        self,
        characteristic: Uuid,
        value: &[u8],
        steps: Vec<Vec<(Uuid, Vec<u8>)>>,
    ) -> Self {
        self.lock().triggers.push(Trigger {
            characteristic,
            value: value.to_vec(),
            reactions: steps,
        });
        self
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn dial_count(&self) -> usize {
        self.lock().dial_count
    }

    pub fn discover_count(&self) -> usize {
        self.lock().discover_count
    }

    pub fn cancel_count(&self) -> usize {
        self.lock().cancel_count
    }

    pub fn is_subscribed(&self, characteristic: Uuid) -> bool {
        self.lock().handlers.contains_key(&characteristic)
    }

    /// Deliver a notification as the radio would.
    pub fn push(&self, characteristic: Uuid, frame: &[u8]) {
        let handler = self.lock().handlers.get(&characteristic).cloned();
        if let Some(handler) = handler {
            handler(frame);
        }
    }

    /// Simulate the link dropping on the peripheral side.
    pub fn drop_link(&self) {
        let notifier = self.lock().notifier.clone();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn dial(&self, address: &str) -> anyhow::Result<Arc<dyn GattLink>> {
        let hang = {
            let mut state = self.lock();
            state.dial_count += 1;
            if state.fail_dial {
                anyhow::bail!("no route to {}", address);
            }
            state.hang_dial
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let notifier = Arc::new(DisconnectNotifier::new());
        {
            let mut state = self.lock();
            state.handlers.clear();
            state.notifier = Some(Arc::clone(&notifier));
        }
        Ok(Arc::new(MockLink {
            transport: self.clone(),
            notifier,
        }))
    }
}

struct MockLink {
    transport: MockTransport,
    notifier: Arc<DisconnectNotifier>,
}

#[async_trait]
impl GattLink for MockLink {
    async fn discover_services(&self) -> anyhow::Result<ServiceTable> {
        let mut state = self.transport.lock();
        state.discover_count += 1;
        if state.fail_discover {
            anyhow::bail!("attribute discovery failed");
        }
        Ok(state.services.clone())
    }

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> anyhow::Result<()> {
        let steps: Vec<Vec<(Uuid, Vec<u8>)>> = {
            let mut state = self.transport.lock();
            state.writes.push((characteristic, value.to_vec()));
            if state.failing_writes.contains(&characteristic) {
                anyhow::bail!("write to {} rejected", characteristic);
            }
            state
                .triggers
                .iter()
                .filter(|t| t.characteristic == characteristic && t.value == value)
                .flat_map(|t| t.reactions.iter().cloned())
                .collect()
        };

        if !steps.is_empty() {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                for step in steps {
                    tokio::time::sleep(REACTION_STEP).await;
                    for (source, frame) in step {
                        transport.push(source, &frame);
                    }
                }
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> anyhow::Result<()> {
        let mut state = self.transport.lock();
        if state.fail_subscribe {
            anyhow::bail!("CCCD write failed");
        }
        state.handlers.insert(characteristic, handler);
        Ok(())
    }

    async fn cancel_connection(&self) -> anyhow::Result<()> {
        self.transport.lock().cancel_count += 1;
        self.notifier.notify();
        Ok(())
    }

    fn disconnected(&self) -> DisconnectSignal {
        self.notifier.signal()
    }
}
