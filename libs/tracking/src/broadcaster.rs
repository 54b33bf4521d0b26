//! Live fan-out of accepted location updates to dashboard observers.
//!
//! Built on a `tokio::sync::broadcast` ring: every subscriber owns an
//! independent cursor into a bounded buffer. Publishing never waits on a
//! subscriber. A subscriber that falls more than `capacity` events behind
//! skips the oldest ones and resumes from what is still buffered; the
//! skipped count is tracked as a delivery miss and never retried.
//!
//! Events published by one producer reach each subscriber in publish order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;

use crate::model::LocationEvent;

/// Default per-subscriber buffer size.
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared publisher side of the live update channel.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<LocationEvent>,
    next_id: Arc<AtomicU64>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    /// Create a broadcaster buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fire-and-forget delivery to all current subscribers.
    ///
    /// Returns how many subscribers the event was queued for.
    pub fn publish(&self, event: LocationEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No dashboard observers connected, update not pushed");
                0
            }
        }
    }

    /// Register a new observer. Only events published afterwards are seen.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Dashboard observer {} subscribed", id);
        Subscription {
            id,
            rx: self.tx.subscribe(),
            missed: 0,
        }
    }

    /// Remove an observer. Dropping the handle has the same effect.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!("Dashboard observer {} unsubscribed", subscription.id);
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side held by one dashboard observer.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<LocationEvent>,
    missed: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Events skipped because this observer fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Wait for the next event. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<LocationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_miss(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<LocationEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_miss(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_miss(&mut self, skipped: u64) {
        self.missed += skipped;
        debug!(
            "Dashboard observer {} lagged, {} updates dropped",
            self.id, skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DriverId, EventLocation};
    use chrono::Utc;
    use std::time::Duration;

    fn event(driver: &str, seq: usize) -> LocationEvent {
        LocationEvent {
            driver_id: DriverId::from(driver),
            location: EventLocation {
                latitude: seq as f64 / 1000.0,
                longitude: 0.0,
                timestamp: Utc::now(),
            },
        }
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let broadcaster = Broadcaster::new(4);
        assert_eq!(broadcaster.publish(event("d", 1)), 0);
    }

    #[test]
    fn every_subscriber_gets_every_event() {
        let broadcaster = Broadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        assert_eq!(broadcaster.publish(event("d", 1)), 2);

        assert_eq!(a.try_recv().unwrap().location.latitude, 0.001);
        assert_eq!(b.try_recv().unwrap().location.latitude, 0.001);
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn unsubscribe_removes_observer() {
        let broadcaster = Broadcaster::new(8);
        let a = broadcaster.subscribe();
        let _b = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.unsubscribe(a);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(broadcaster.publish(event("d", 1)), 1);
    }

    #[test]
    fn per_driver_order_is_preserved() {
        let broadcaster = Broadcaster::new(64);
        let mut sub = broadcaster.subscribe();

        for seq in 0..20 {
            broadcaster.publish(event(if seq % 2 == 0 { "a" } else { "b" }, seq));
        }

        let received: Vec<LocationEvent> = std::iter::from_fn(|| sub.try_recv()).collect();
        let a: Vec<f64> = received
            .iter()
            .filter(|e| e.driver_id.as_str() == "a")
            .map(|e| e.location.latitude)
            .collect();
        let mut sorted = a.clone();
        sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(a.len(), 10);
        assert_eq!(a, sorted);
    }

    #[test]
    fn slow_subscriber_drops_oldest_without_blocking() {
        let broadcaster = Broadcaster::new(8);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        let mut fast_seen = 0;
        for seq in 0..100 {
            broadcaster.publish(event("d", seq));
            if fast.try_recv().is_some() {
                fast_seen += 1;
            }
        }
        assert_eq!(fast_seen, 100);
        assert_eq!(fast.missed(), 0);

        let first = slow.try_recv().expect("slow observer keeps the newest events");
        assert_eq!(slow.missed(), 92);
        assert_eq!(first.location.latitude, 0.092);
        let rest = std::iter::from_fn(|| slow.try_recv()).count();
        assert_eq!(rest, 7);
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_delay_fast_one() {
        let broadcaster = Broadcaster::new(4);
        let _stalled = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        let reader = tokio::spawn(async move {
            let mut count = 0;
            while count < 50 {
                if fast.recv().await.is_none() {
                    break;
                }
                count += 1;
            }
            count
        });

        for seq in 0..50 {
            broadcaster.publish(event("d", seq));
            tokio::task::yield_now().await;
        }

        let count = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("fast observer finished in time")
            .unwrap();
        assert_eq!(count, 50);
    }

    #[tokio::test]
    async fn recv_ends_when_broadcaster_dropped() {
        let broadcaster = Broadcaster::new(4);
        let mut sub = broadcaster.subscribe();
        drop(broadcaster);
        assert!(sub.recv().await.is_none());
    }
}
