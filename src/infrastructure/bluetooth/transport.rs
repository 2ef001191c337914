//! BLE transport boundary
//!
//! The radio stack is supplied from outside the crate. A [`BleTransport`]
//! dials a peripheral and yields a [`GattLink`] for it.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Callback receiving raw notification frames. Invoked on the transport's own thread.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Characteristics found during profile discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTable {
    characteristics: HashSet<Uuid>,
}

impl ServiceTable {
    pub fn contains(&self, characteristic: &Uuid) -> bool {
        self.characteristics.contains(characteristic)
    }

    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }
}

impl FromIterator<Uuid> for ServiceTable {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self {
            characteristics: iter.into_iter().collect(),
        }
    }
}

/// Sending half of a disconnect signal, owned by the transport
#[derive(Debug)]
pub struct DisconnectNotifier {
    sender: watch::Sender<bool>,
}

impl DisconnectNotifier {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Mark the link as gone. Idempotent.
    pub fn notify(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_disconnected(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn signal(&self) -> DisconnectSignal {
        DisconnectSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for DisconnectNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the link has gone down
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    receiver: watch::Receiver<bool>,
}

impl DisconnectSignal {
    pub async fn wait(mut self) {
        // An error means the notifier is gone, which also ends the link.
        let _ = self.receiver.wait_for(|down| *down).await;
    }
}

/// Dials peripherals by address
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn dial(&self, address: &str) -> anyhow::Result<Arc<dyn GattLink>>;
}

/// One live GATT connection
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn discover_services(&self) -> anyhow::Result<ServiceTable>;

    /// Write without response.
    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) -> anyhow::Result<()>;

    /// Enable notifications and route every frame to `handler`.
    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> anyhow::Result<()>;

    /// Ask the stack to tear the link down. Does not wait.
    async fn cancel_connection(&self) -> anyhow::Result<()>;

    fn disconnected(&self) -> DisconnectSignal;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_resolves_after_notify() {
        let notifier = DisconnectNotifier::new();
        let signal = notifier.signal();

        let waiter = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        notifier.notify();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(notifier.is_disconnected());
    }

    #[tokio::test]
    async fn test_signal_taken_late_still_resolves() {
        let notifier = DisconnectNotifier::new();
        notifier.notify();
        tokio::time::timeout(Duration::from_secs(1), notifier.signal().wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_service_table_lookup() {
        let uuid = Uuid::from_u128(7);
        let table: ServiceTable = [uuid].into_iter().collect();
        assert!(table.contains(&uuid));
        assert!(!table.contains(&Uuid::from_u128(8)));
        assert_eq!(table.len(), 1);
    }
}
