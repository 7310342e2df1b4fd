//! COV subscription lifecycle.
//!
//! Each [`SubscriptionKey`] moves through
//! `Unsubscribed -> Subscribing -> Active -> Unsubscribing -> Unsubscribed`,
//! or straight back from `Subscribing` to `Unsubscribed` when the device
//! refuses or never answers. Entries are never removed, so cancelling twice
//! is harmless.
//!
//! Every entry carries a generation. A transition names the generation it
//! started from and is discarded if the entry was replaced or cancelled in
//! the meantime, so a late acknowledgement cannot revive a cancelled key.

use crate::discovery::DeviceHandle;
use crate::engine::{subscribe_cov, ProtocolEngine, SubscribeCovRequest};
use crate::ClientError;
use bacwatch_core::ObjectId;
use core::fmt;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Unsubscribing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscriptionKey {
    pub subscriber_process_id: u32,
    pub object_id: ObjectId,
}

impl SubscriptionKey {
    pub fn new(subscriber_process_id: u32, object_id: ObjectId) -> Self {
        Self {
            subscriber_process_id,
            object_id,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (process {})", self.object_id, self.subscriber_process_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subscription {
    pub key: SubscriptionKey,
    pub device: DeviceHandle,
    pub confirmed: bool,
    pub lifetime_seconds: u32,
    pub state: SubscriptionState,
    /// When the device last acknowledged the subscription.
    pub activated_at: Option<SystemTime>,
    pub notifications: u64,
    pub last_notification: Option<SystemTime>,
    /// Lease time left as last reported by the device.
    pub time_remaining_seconds: Option<u32>,
    #[cfg_attr(feature = "serde", serde(skip))]
    generation: u64,
}

impl Subscription {
    /// When the lease lapses unless renewed. `None` until acknowledged.
    pub fn lease_expires_at(&self) -> Option<SystemTime> {
        self.activated_at
            .map(|at| at + Duration::from_secs(u64::from(self.lifetime_seconds)))
    }
}

/// Result of a best-effort cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnsubscribeOutcome {
    /// Nothing to cancel; no request was sent.
    AlreadyInactive,
    Cancelled,
    /// The cancel request failed. The entry is `Unsubscribed` regardless.
    CancelFailed,
}

#[derive(Debug, Default)]
struct TableInner {
    entries: HashMap<SubscriptionKey, Subscription>,
    next_generation: u64,
}

impl TableInner {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Subscription state shared between the manager and the dispatcher.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    inner: Mutex<TableInner>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Unsubscribed` for keys never seen.
    pub fn state(&self, key: SubscriptionKey) -> SubscriptionState {
        self.lock()
            .entries
            .get(&key)
            .map_or(SubscriptionState::Unsubscribed, |s| s.state)
    }

    pub fn is_active(&self, key: SubscriptionKey) -> bool {
        self.state(key) == SubscriptionState::Active
    }

    pub fn get(&self, key: SubscriptionKey) -> Option<Subscription> {
        self.lock().entries.get(&key).cloned()
    }

    /// All entries, ordered by key.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<_> = self.lock().entries.values().cloned().collect();
        subs.sort_by_key(|s| s.key);
        subs
    }

    /// Counts a notification against an `Active` key. Returns `false`, and
    /// changes nothing, for any other key.
    pub fn record_notification(&self, key: SubscriptionKey, time_remaining_seconds: u32) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(&key) {
            Some(sub) if sub.state == SubscriptionState::Active => {
                sub.notifications += 1;
                sub.last_notification = Some(SystemTime::now());
                sub.time_remaining_seconds = Some(time_remaining_seconds);
                true
            }
            _ => false,
        }
    }

    /// Inserts `key` as `Subscribing`, replacing any previous entry.
    fn begin_subscribe(
        &self,
        key: SubscriptionKey,
        device: DeviceHandle,
        confirmed: bool,
        lifetime_seconds: u32,
    ) -> u64 {
        let mut inner = self.lock();
        let generation = inner.bump();
        inner.entries.insert(
            key,
            Subscription {
                key,
                device,
                confirmed,
                lifetime_seconds,
                state: SubscriptionState::Subscribing,
                activated_at: None,
                notifications: 0,
                last_notification: None,
                time_remaining_seconds: None,
                generation,
            },
        );
        generation
    }

    /// Moves a live entry to `Unsubscribing` under a fresh generation.
    fn begin_cancel(&self, key: SubscriptionKey) -> Option<(u64, DeviceHandle)> {
        let mut inner = self.lock();
        let generation = inner.bump();
        let sub = inner.entries.get_mut(&key)?;
        match sub.state {
            SubscriptionState::Active | SubscriptionState::Subscribing => {
                sub.state = SubscriptionState::Unsubscribing;
                sub.generation = generation;
                Some((generation, sub.device))
            }
            _ => None,
        }
    }

    /// Applies `to` if the entry still carries `generation`.
    fn transition(&self, key: SubscriptionKey, generation: u64, to: SubscriptionState) -> bool {
        let mut inner = self.lock();
        let Some(sub) = inner.entries.get_mut(&key) else {
            return false;
        };
        if sub.generation != generation {
            return false;
        }
        sub.state = to;
        if to == SubscriptionState::Active {
            sub.activated_at = Some(SystemTime::now());
        }
        true
    }

    fn live_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .lock()
            .entries
            .values()
            .filter(|s| {
                matches!(
                    s.state,
                    SubscriptionState::Active | SubscriptionState::Subscribing
                )
            })
            .map(|s| s.key)
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SubscriptionManager<E: ProtocolEngine> {
    engine: Arc<E>,
    table: Arc<SubscriptionTable>,
    request_timeout: Duration,
}

impl<E: ProtocolEngine> SubscriptionManager<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            table: Arc::new(SubscriptionTable::new()),
            request_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// The table the dispatcher consults.
    pub fn table(&self) -> Arc<SubscriptionTable> {
        self.table.clone()
    }

    /// Subscribes and waits for the device's acknowledgement.
    ///
    /// A lifetime of zero would be a cancellation and is refused without
    /// contacting the device. There is no automatic renewal.
    pub async fn subscribe(
        &self,
        key: SubscriptionKey,
        device: &DeviceHandle,
        confirmed: bool,
        lifetime_seconds: u32,
    ) -> Result<(), ClientError> {
        if lifetime_seconds == 0 {
            return Err(ClientError::InvalidLifetime);
        }
        let generation = self
            .table
            .begin_subscribe(key, *device, confirmed, lifetime_seconds);
        let request = SubscribeCovRequest {
            subscriber_process_id: key.subscriber_process_id,
            monitored_object_id: key.object_id,
            confirmed,
            lifetime_seconds,
        };

        match subscribe_cov(
            self.engine.as_ref(),
            device.address,
            request,
            self.request_timeout,
        )
        .await
        {
            Ok(()) => {
                if self
                    .table
                    .transition(key, generation, SubscriptionState::Active)
                {
                    log::info!(
                        "subscribed to {key} on {device} for {lifetime_seconds}s ({})",
                        if confirmed { "confirmed" } else { "unconfirmed" }
                    );
                } else {
                    log::debug!("subscription {key} superseded before its acknowledgement");
                }
                Ok(())
            }
            Err(err) => {
                self.table
                    .transition(key, generation, SubscriptionState::Unsubscribed);
                log::warn!("subscribing to {key} on {device} failed: {err}");
                Err(err)
            }
        }
    }

    /// Cancels `key` with a lifetime-zero SubscribeCOV. Never fails; the
    /// entry ends `Unsubscribed` whatever the device says.
    pub async fn unsubscribe(&self, key: SubscriptionKey) -> UnsubscribeOutcome {
        let Some((generation, device)) = self.table.begin_cancel(key) else {
            log::debug!("{key} already inactive");
            return UnsubscribeOutcome::AlreadyInactive;
        };
        let result = subscribe_cov(
            self.engine.as_ref(),
            device.address,
            SubscribeCovRequest::cancel(key.subscriber_process_id, key.object_id),
            self.request_timeout,
        )
        .await;
        self.table
            .transition(key, generation, SubscriptionState::Unsubscribed);
        match result {
            Ok(()) => {
                log::info!("unsubscribed from {key}");
                UnsubscribeOutcome::Cancelled
            }
            Err(err) => {
                log::warn!("cancelling {key} on {device} failed: {err}");
                UnsubscribeOutcome::CancelFailed
            }
        }
    }

    /// Cancels every `Active` or `Subscribing` entry concurrently.
    pub async fn unsubscribe_all(&self) -> Vec<(SubscriptionKey, UnsubscribeOutcome)> {
        let keys = self.table.live_keys();
        let outcomes = join_all(keys.iter().map(|key| self.unsubscribe(*key))).await;
        keys.into_iter().zip(outcomes).collect()
    }

    pub fn state(&self, key: SubscriptionKey) -> SubscriptionState {
        self.table.state(key)
    }

    pub fn is_active(&self, key: SubscriptionKey) -> bool {
        self.table.is_active(key)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.table.subscriptions()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SubscriptionKey, SubscriptionManager, SubscriptionState, SubscriptionTable,
        UnsubscribeOutcome,
    };
    use crate::discovery::DeviceHandle;
    use crate::engine::ProtocolEngine;
    use crate::simulator::{SimulatedDevice, SimulatedEngine};
    use crate::ClientError;
    use bacwatch_core::{DataValue, DeviceAddress, ObjectId, ObjectType};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    fn device() -> DeviceHandle {
        DeviceHandle {
            instance: 2640,
            address: DeviceAddress::Ip("192.168.2.233:47808".parse::<SocketAddr>().unwrap()),
        }
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new(1, ObjectId::new(ObjectType::AnalogValue, 40250))
    }

    fn engine_with(configure: impl FnOnce(SimulatedDevice) -> SimulatedDevice) -> Arc<SimulatedEngine> {
        let sim = SimulatedDevice::new(2640, device().address).with_point(
            key().object_id,
            "Zone temp",
            DataValue::Real(20.0),
        );
        Arc::new(SimulatedEngine::new().with_device(configure(sim)))
    }

    #[tokio::test]
    async fn subscribe_then_cancel_twice_is_harmless() {
        let engine = engine_with(|d| d);
        let manager = SubscriptionManager::new(engine.clone());

        manager.subscribe(key(), &device(), true, 3600).await.unwrap();
        assert!(manager.is_active(key()));
        let sub = manager.subscriptions().remove(0);
        assert!(sub.lease_expires_at().is_some());
        assert_eq!(engine.remote_subscriptions(2640), vec![(1, key().object_id)]);

        assert_eq!(manager.unsubscribe(key()).await, UnsubscribeOutcome::Cancelled);
        assert_eq!(
            manager.unsubscribe(key()).await,
            UnsubscribeOutcome::AlreadyInactive
        );
        assert_eq!(manager.state(key()), SubscriptionState::Unsubscribed);
        assert!(engine.remote_subscriptions(2640).is_empty());

        let cancels = engine
            .subscribe_requests()
            .iter()
            .filter(|r| r.is_cancel())
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn rejection_returns_to_unsubscribed() {
        let engine = engine_with(SimulatedDevice::rejecting_subscriptions);
        let manager = SubscriptionManager::new(engine);
        let err = manager
            .subscribe(key(), &device(), true, 3600)
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(manager.state(key()), SubscriptionState::Unsubscribed);
        assert_eq!(
            manager.unsubscribe(key()).await,
            UnsubscribeOutcome::AlreadyInactive
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_and_cancel_is_still_final() {
        let engine = engine_with(SimulatedDevice::losing_subscriptions);
        let manager =
            SubscriptionManager::new(engine).with_request_timeout(Duration::from_secs(3));
        let err = manager
            .subscribe(key(), &device(), false, 600)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert_eq!(manager.state(key()), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn zero_lifetime_is_refused_locally() {
        let engine = engine_with(|d| d);
        let manager = SubscriptionManager::new(engine.clone());
        let err = manager.subscribe(key(), &device(), true, 0).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidLifetime));
        assert!(engine.requests().is_empty());
        assert!(manager.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn failed_cancel_is_reported_not_raised() {
        let engine = Arc::new(SimulatedEngine::new().with_device(
            SimulatedDevice::new(2640, device().address).with_point(
                key().object_id,
                "Zone temp",
                DataValue::Real(20.0),
            ),
        ));
        let manager = SubscriptionManager::new(engine.clone());
        manager.subscribe(key(), &device(), true, 3600).await.unwrap();

        engine.stop().await.unwrap();
        assert_eq!(
            manager.unsubscribe(key()).await,
            UnsubscribeOutcome::CancelFailed
        );
        assert_eq!(manager.state(key()), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn unsubscribe_all_cancels_each_live_key() {
        let second = ObjectId::new(ObjectType::BinaryValue, 3);
        let engine = engine_with(|d| d.with_point(second, "Fan", DataValue::Enumerated(1)));
        let manager = SubscriptionManager::new(engine.clone());
        manager.subscribe(key(), &device(), true, 3600).await.unwrap();
        manager
            .subscribe(SubscriptionKey::new(1, second), &device(), true, 3600)
            .await
            .unwrap();

        let outcomes = manager.unsubscribe_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == UnsubscribeOutcome::Cancelled));
        assert!(manager.unsubscribe_all().await.is_empty());
    }

    #[test]
    fn stale_acknowledgement_cannot_revive_cancelled_entry() {
        let table = SubscriptionTable::new();
        let generation = table.begin_subscribe(key(), device(), true, 3600);
        let (cancel_generation, _) = table.begin_cancel(key()).unwrap();

        assert!(!table.transition(key(), generation, SubscriptionState::Active));
        assert_eq!(table.state(key()), SubscriptionState::Unsubscribing);

        assert!(table.transition(key(), cancel_generation, SubscriptionState::Unsubscribed));
        assert_eq!(table.state(key()), SubscriptionState::Unsubscribed);
        assert!(table.begin_cancel(key()).is_none());
    }

    #[test]
    fn notifications_count_only_for_active_keys() {
        let table = SubscriptionTable::new();
        assert!(!table.record_notification(key(), 100));

        let generation = table.begin_subscribe(key(), device(), true, 3600);
        assert!(!table.record_notification(key(), 100));

        table.transition(key(), generation, SubscriptionState::Active);
        assert!(table.record_notification(key(), 3599));
        let sub = table.get(key()).unwrap();
        assert_eq!(sub.notifications, 1);
        assert_eq!(sub.time_remaining_seconds, Some(3599));
    }
}
