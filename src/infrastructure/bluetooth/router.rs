//! Notification Router
//!
//! Fans inbound notification frames out to short-lived filtered
//! subscriptions. One router exists per notification source.
//!
//! Delivery is a rendezvous: a frame is handed over only to a subscriber
//! that is parked in [`SubscriptionHandle::recv`] at the moment the frame is
//! dispatched. A matching frame that finds its subscriber not waiting
//! deactivates the subscription instead of being queued.

use crate::domain::error::{DeviceError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Predicate deciding whether a subscription wants a frame.
///
/// Filters run while the registry lock is held and must not call back into the router.
pub type FrameFilter = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct Subscription {
    id: u64,
    filter: Option<FrameFilter>,
    waiter: Option<oneshot::Sender<Vec<u8>>>,
    active: bool,
    life: u32,
}

impl Subscription {
    fn matches(&self, frame: &[u8]) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(frame))
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Registry of active subscriptions for one notification source
#[derive(Clone)]
pub struct NotificationRouter {
    source: &'static str,
    inner: Arc<Mutex<Registry>>,
}

impl NotificationRouter {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            inner: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscription accepting up to `life` frames.
    ///
    /// `None` matches every frame. The subscription is removed when the
    /// returned handle is dropped.
    pub fn register(&self, filter: Option<FrameFilter>, life: u32) -> SubscriptionHandle {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscriptions.push(Subscription {
            id,
            filter,
            waiter: None,
            active: life > 0,
            life,
        });
        registry.subscriptions.retain(|s| s.active);
        debug!(source = self.source, id, life, "Subscription registered");

        SubscriptionHandle {
            id,
            router: self.clone(),
        }
    }

    /// Offer a frame to every active subscription, in registration order.
    pub fn dispatch(&self, frame: &[u8]) {
        trace!(source = self.source, frame = ?frame, "Dispatching notification");

        let mut registry = self.lock();
        for sub in registry.subscriptions.iter_mut() {
            if !sub.active || !sub.matches(frame) {
                continue;
            }

            let delivered = sub
                .waiter
                .take()
                .map_or(false, |waiter| waiter.send(frame.to_vec()).is_ok());
            if delivered {
                sub.life = sub.life.saturating_sub(1);
                if sub.life == 0 {
                    sub.active = false;
                }
            } else {
                debug!(
                    source = self.source,
                    id = sub.id,
                    "Subscriber not waiting, dropping subscription"
                );
                sub.active = false;
            }
        }
        registry.subscriptions.retain(|s| s.active);
    }

    /// Number of subscriptions still registered.
    pub fn active_count(&self) -> usize {
        self.lock().subscriptions.len()
    }
}

/// Consumer side of a subscription
pub struct SubscriptionHandle {
    id: u64,
    router: NotificationRouter,
}

impl SubscriptionHandle {
    /// Wait for the next matching frame.
    ///
    /// Fails with [`DeviceError::SubscriptionClosed`] once the subscription
    /// has been deactivated.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let receiver = {
            let mut registry = self.router.lock();
            let sub = registry
                .subscriptions
                .iter_mut()
                .find(|s| s.id == self.id && s.active)
                .ok_or(DeviceError::SubscriptionClosed)?;
            let (sender, receiver) = oneshot::channel();
            sub.waiter = Some(sender);
            receiver
        };

        receiver.await.map_err(|_| DeviceError::SubscriptionClosed)
    }

    /// Remaining deliveries; 0 once the subscription is gone.
    pub fn life(&self) -> u32 {
        self.router
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.id == self.id && s.active)
            .map_or(0, |s| s.life)
    }

    /// Overwrite the remaining deliveries. Zero ends the subscription.
    pub fn set_life(&self, life: u32) {
        let mut registry = self.router.lock();
        if let Some(sub) = registry.subscriptions.iter_mut().find(|s| s.id == self.id) {
            sub.life = life;
            if life == 0 {
                sub.active = false;
            }
        }
        registry.subscriptions.retain(|s| s.active);
    }

    pub fn is_active(&self) -> bool {
        self.life() > 0
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let mut registry = self.router.lock();
        registry.subscriptions.retain(|s| s.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Let a spawned receiver park before the test dispatches.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_delivers_to_waiting_subscriber() {
        let router = NotificationRouter::new("data");
        let mut sub = router.register(None, 2);

        let waiter = tokio::spawn(async move {
            let frame = sub.recv().await;
            (frame, sub)
        });
        settle().await;
        router.dispatch(&[0x71, 0x05]);

        let (frame, sub) = waiter.await.unwrap();
        assert_eq!(frame.unwrap(), vec![0x71, 0x05]);
        assert_eq!(sub.life(), 1);
        assert_eq!(router.active_count(), 1);
    }

    #[tokio::test]
    async fn test_life_exhaustion_prunes() {
        let router = NotificationRouter::new("data");
        let mut sub = router.register(None, 1);

        let waiter = tokio::spawn(async move {
            let first = sub.recv().await;
            let second = sub.recv().await;
            (first, second)
        });
        settle().await;
        router.dispatch(&[0x01]);
        router.dispatch(&[0x02]);

        let (first, second) = waiter.await.unwrap();
        assert_eq!(first.unwrap(), vec![0x01]);
        assert!(matches!(second, Err(DeviceError::SubscriptionClosed)));
        assert_eq!(router.active_count(), 0);
    }

    #[tokio::test]
    async fn test_life_bounds_deliveries() {
        let router = NotificationRouter::new("data");
        let mut sub = router.register(None, 3);

        let waiter = tokio::spawn(async move {
            let mut received = Vec::new();
            loop {
                match sub.recv().await {
                    Ok(frame) => received.push(frame),
                    Err(e) => return (received, e),
                }
            }
        });
        for i in 0..4u8 {
            settle().await;
            router.dispatch(&[i]);
        }

        let (received, err) = waiter.await.unwrap();
        assert_eq!(received, vec![vec![0], vec![1], vec![2]]);
        assert!(matches!(err, DeviceError::SubscriptionClosed));
        assert_eq!(router.active_count(), 0);
    }

    #[tokio::test]
    async fn test_not_waiting_deactivates() {
        let router = NotificationRouter::new("control");
        let mut sub = router.register(None, 5);

        router.dispatch(&[0x01]);

        assert!(!sub.is_active());
        assert_eq!(router.active_count(), 0);
        assert!(matches!(sub.recv().await, Err(DeviceError::SubscriptionClosed)));
    }

    #[tokio::test]
    async fn test_abandoned_wait_counts_as_not_waiting() {
        let router = NotificationRouter::new("data");
        let mut sub = router.register(None, 3);

        let timed_out = tokio::time::timeout(Duration::from_millis(5), sub.recv()).await;
        assert!(timed_out.is_err());

        router.dispatch(&[0x01]);
        assert_eq!(sub.life(), 0);
        assert_eq!(router.active_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_skips_non_matching_frames() {
        let router = NotificationRouter::new("data");
        let mut sub = router.register(Some(Box::new(|f: &[u8]| f.first() == Some(&0x71))), 1);

        // Non-matching frames leave an idle subscriber untouched.
        router.dispatch(&[0x24, 0x00]);
        assert!(sub.is_active());

        let waiter = tokio::spawn(async move { sub.recv().await });
        settle().await;
        router.dispatch(&[0x24, 0x01]);
        router.dispatch(&[0x71, 0x02]);

        assert_eq!(waiter.await.unwrap().unwrap(), vec![0x71, 0x02]);
        assert_eq!(router.active_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_overlapping_subscribers() {
        let router = NotificationRouter::new("data");
        let mut all = router.register(None, 1);
        let mut temperature =
            router.register(Some(Box::new(|f: &[u8]| f.first() == Some(&0x71))), 1);

        let a = tokio::spawn(async move { all.recv().await });
        let b = tokio::spawn(async move { temperature.recv().await });
        settle().await;
        router.dispatch(&[0x71, 0x05, 0x00, 0x01, 0x10]);

        assert_eq!(a.await.unwrap().unwrap()[0], 0x71);
        assert_eq!(b.await.unwrap().unwrap()[0], 0x71);
    }

    #[tokio::test]
    async fn test_drop_removes_subscription() {
        let router = NotificationRouter::new("data");
        let sub = router.register(None, 4);
        let _other = router.register(None, 4);
        assert_eq!(router.active_count(), 2);

        drop(sub);
        assert_eq!(router.active_count(), 1);
    }

    #[tokio::test]
    async fn test_set_life_overrides_remaining() {
        let router = NotificationRouter::new("data");
        let sub = router.register(None, 2);

        sub.set_life(7);
        assert_eq!(sub.life(), 7);

        sub.set_life(0);
        assert!(!sub.is_active());
        assert_eq!(router.active_count(), 0);
    }

    #[test]
    fn test_zero_life_registration_is_inert() {
        let router = NotificationRouter::new("data");
        let sub = router.register(None, 0);
        assert!(!sub.is_active());
        assert_eq!(router.active_count(), 0);
    }
}
