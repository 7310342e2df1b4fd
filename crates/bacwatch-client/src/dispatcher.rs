//! Applies inbound COV notifications to the object repository.
//!
//! The dispatcher runs inside the engine's event callback, so it only takes
//! the subscription-table and repository locks briefly. An optional hook
//! sees every applied update on its own thread behind a bounded queue; when
//! the hook falls behind, updates are dropped rather than queued without
//! limit.

use crate::cov::{CovNotification, CovUpdate};
use crate::engine::{EngineEvent, EventHandler, HandlerRegistration, ProtocolEngine};
use crate::repository::ObjectRepository;
use crate::subscription::{SubscriptionKey, SubscriptionTable};
use crate::ClientError;
use bacwatch_core::PropertyId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};

/// What [`NotificationDispatcher::handle`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DispatchOutcome {
    /// The present value was written to the repository.
    Applied,
    /// Recognised, but the notification carried no present value.
    NoPresentValue,
    /// No active subscription matches; dropped.
    Unmatched,
    /// Subscribed, but the object was never enumerated; dropped.
    UnknownPoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatchStats {
    pub applied: u64,
    pub no_present_value: u64,
    pub unmatched: u64,
    pub unknown_point: u64,
    pub hook_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    no_present_value: AtomicU64,
    unmatched: AtomicU64,
    unknown_point: AtomicU64,
    hook_dropped: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A dedicated thread running the downstream hook.
struct HookWorker {
    tx: Mutex<Option<mpsc::Sender<CovUpdate>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HookWorker {
    fn spawn<F>(capacity: usize, mut hook: F) -> Result<Self, ClientError>
    where
        F: FnMut(CovUpdate) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<CovUpdate>(capacity.max(1));
        let thread = std::thread::Builder::new()
            .name("bacwatch-cov-hook".into())
            .spawn(move || {
                while let Some(update) = rx.blocking_recv() {
                    hook(update);
                }
                log::debug!("COV hook worker finished");
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues without waiting. Returns `false` if the update was dropped.
    fn offer(&self, update: CovUpdate) -> bool {
        let tx = lock(&self.tx);
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        match tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                log::warn!("COV hook queue full; dropping update for {}", update.object_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the queue and waits for the hook to finish what is queued.
    async fn drain(&self) {
        lock(&self.tx).take();
        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => log::warn!("COV hook panicked"),
                Err(err) => log::warn!("waiting for COV hook failed: {err}"),
            }
        }
    }
}

pub struct NotificationDispatcher {
    repository: Arc<ObjectRepository>,
    subscriptions: Arc<SubscriptionTable>,
    hook: Option<HookWorker>,
    counters: Counters,
}

impl NotificationDispatcher {
    pub fn new(repository: Arc<ObjectRepository>, subscriptions: Arc<SubscriptionTable>) -> Self {
        Self {
            repository,
            subscriptions,
            hook: None,
            counters: Counters::default(),
        }
    }

    /// Runs `hook` on a dedicated thread for every recognised update. At most
    /// `capacity` updates wait for it; further ones are dropped.
    pub fn with_hook<F>(mut self, capacity: usize, hook: F) -> Result<Self, ClientError>
    where
        F: FnMut(CovUpdate) + Send + 'static,
    {
        self.hook = Some(HookWorker::spawn(capacity, hook)?);
        Ok(self)
    }

    /// Registers this dispatcher for COV notifications on `engine`. The
    /// handler stays registered while the returned guard lives.
    pub fn install<E: ProtocolEngine>(self: &Arc<Self>, engine: &Arc<E>) -> HandlerRegistration<E> {
        let dispatcher = Arc::downgrade(self);
        let handler: EventHandler = Arc::new(move |event: &EngineEvent| {
            if let EngineEvent::CovNotification(notification) = event {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.handle(notification);
                }
            }
        });
        HandlerRegistration::register(engine, handler)
    }

    pub fn handle(&self, notification: &CovNotification) -> DispatchOutcome {
        let object_id = notification.monitored_object_id;
        log::info!(
            "COV from {} ({}) for {object_id}, {}s remaining: {}",
            notification.initiating_device_id,
            notification.source,
            notification.time_remaining_seconds,
            notification
                .values
                .iter()
                .map(|v| format!("{}={}", v.property_id, v.value))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let key = SubscriptionKey::new(notification.subscriber_process_id, object_id);
        if !self.subscriptions.is_active(key) {
            log::debug!("no active subscription for {key}; notification dropped");
            return self.count(DispatchOutcome::Unmatched);
        }

        let outcome = match notification.present_value() {
            Some(value) => match self.repository.update_present_value(object_id, value.clone()) {
                Some(_) => DispatchOutcome::Applied,
                None => DispatchOutcome::UnknownPoint,
            },
            None if self.repository.contains(object_id) => DispatchOutcome::NoPresentValue,
            None => DispatchOutcome::UnknownPoint,
        };
        if outcome == DispatchOutcome::UnknownPoint {
            log::debug!("{object_id} was never enumerated; notification dropped");
            return self.count(outcome);
        }
        if !self
            .subscriptions
            .record_notification(key, notification.time_remaining_seconds)
        {
            log::debug!("subscription {key} ended while its notification was applied");
        }

        for other in notification
            .values
            .iter()
            .filter(|v| v.property_id != PropertyId::PresentValue)
        {
            log::debug!("{object_id} {} = {}", other.property_id, other.value);
        }

        if let Some(hook) = &self.hook {
            if !hook.offer(CovUpdate::from_notification(notification)) {
                self.counters.hook_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count(outcome)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            applied: c.applied.load(Ordering::Relaxed),
            no_present_value: c.no_present_value.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
            unknown_point: c.unknown_point.load(Ordering::Relaxed),
            hook_dropped: c.hook_dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting hook updates and waits for queued ones to run.
    pub async fn drain_hook(&self) {
        if let Some(hook) = &self.hook {
            hook.drain().await;
        }
    }

    fn count(&self, outcome: DispatchOutcome) -> DispatchOutcome {
        let counter = match outcome {
            DispatchOutcome::Applied => &self.counters.applied,
            DispatchOutcome::NoPresentValue => &self.counters.no_present_value,
            DispatchOutcome::Unmatched => &self.counters.unmatched,
            DispatchOutcome::UnknownPoint => &self.counters.unknown_point,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchOutcome, NotificationDispatcher};
    use crate::cov::{CovNotification, CovPropertyValue, CovUpdate};
    use crate::discovery::DeviceHandle;
    use crate::engine::EngineEvent;
    use crate::repository::{DiscoveredPoint, ObjectRepository};
    use crate::simulator::{SimulatedDevice, SimulatedEngine};
    use crate::subscription::{SubscriptionKey, SubscriptionManager};
    use bacwatch_core::{DataValue, DeviceAddress, ObjectId, ObjectType, PropertyId};
    use std::net::SocketAddr;
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    fn target() -> ObjectId {
        ObjectId::new(ObjectType::AnalogValue, 40250)
    }

    fn address() -> DeviceAddress {
        DeviceAddress::Ip("192.168.2.233:47808".parse::<SocketAddr>().unwrap())
    }

    fn notification(object_id: ObjectId, value: Option<DataValue>) -> CovNotification {
        let mut values = vec![CovPropertyValue {
            property_id: PropertyId::StatusFlags,
            array_index: None,
            value: DataValue::BitString {
                unused_bits: 4,
                data: vec![0],
            },
            priority: None,
        }];
        if let Some(value) = value {
            values.insert(
                0,
                CovPropertyValue {
                    property_id: PropertyId::PresentValue,
                    array_index: None,
                    value,
                    priority: None,
                },
            );
        }
        CovNotification {
            source: address(),
            confirmed: true,
            subscriber_process_id: 1,
            initiating_device_id: ObjectId::device(2640),
            monitored_object_id: object_id,
            time_remaining_seconds: 3590,
            values,
        }
    }

    /// Repository with the target point and an active subscription on it.
    async fn subscribed() -> (
        Arc<SimulatedEngine>,
        Arc<ObjectRepository>,
        SubscriptionManager<SimulatedEngine>,
    ) {
        let engine = Arc::new(SimulatedEngine::new().with_device(
            SimulatedDevice::new(2640, address())
                .with_point(target(), "Zone temp", DataValue::Real(20.0))
                .without_initial_notification(),
        ));
        let repository = Arc::new(ObjectRepository::new());
        repository.upsert(DiscoveredPoint::new(target()).with_present_value(DataValue::Real(20.0)));
        let manager = SubscriptionManager::new(engine.clone());
        let device = DeviceHandle {
            instance: 2640,
            address: address(),
        };
        manager
            .subscribe(SubscriptionKey::new(1, target()), &device, true, 3600)
            .await
            .unwrap();
        (engine, repository, manager)
    }

    #[tokio::test]
    async fn active_subscription_updates_present_value() {
        let (_engine, repository, manager) = subscribed().await;
        let before = repository.get(target()).unwrap().last_updated();
        let dispatcher = NotificationDispatcher::new(repository.clone(), manager.table());

        let outcome = dispatcher.handle(&notification(target(), Some(DataValue::Real(21.5))));
        assert_eq!(outcome, DispatchOutcome::Applied);

        let point = repository.get(target()).unwrap();
        assert_eq!(point.present_value(), Some(&DataValue::Real(21.5)));
        assert!(point.last_updated() >= before);

        let sub = manager.subscriptions().remove(0);
        assert_eq!(sub.notifications, 1);
        assert_eq!(sub.time_remaining_seconds, Some(3590));
    }

    #[tokio::test]
    async fn unmatched_notifications_leave_repository_alone() {
        let (_engine, repository, manager) = subscribed().await;
        let dispatcher = NotificationDispatcher::new(repository.clone(), manager.table());
        let before = repository.snapshot();

        let mut foreign = notification(target(), Some(DataValue::Real(99.0)));
        foreign.subscriber_process_id = 7;
        assert_eq!(dispatcher.handle(&foreign), DispatchOutcome::Unmatched);

        manager.unsubscribe(SubscriptionKey::new(1, target())).await;
        assert_eq!(
            dispatcher.handle(&notification(target(), Some(DataValue::Real(99.0)))),
            DispatchOutcome::Unmatched
        );
        assert_eq!(repository.snapshot(), before);
        assert_eq!(dispatcher.stats().unmatched, 2);
    }

    #[tokio::test]
    async fn unknown_points_are_not_created() {
        let (_engine, repository, manager) = subscribed().await;
        repository.clear();
        let dispatcher = NotificationDispatcher::new(repository.clone(), manager.table());
        assert_eq!(
            dispatcher.handle(&notification(target(), Some(DataValue::Real(1.0)))),
            DispatchOutcome::UnknownPoint
        );
        assert!(repository.is_empty());

        let sub = manager.subscriptions().remove(0);
        assert_eq!(sub.notifications, 0);
        assert_eq!(sub.last_notification, None);
        assert_eq!(sub.time_remaining_seconds, None);
    }

    #[tokio::test]
    async fn notification_without_present_value_changes_nothing() {
        let (_engine, repository, manager) = subscribed().await;
        let dispatcher = NotificationDispatcher::new(repository.clone(), manager.table());
        assert_eq!(
            dispatcher.handle(&notification(target(), None)),
            DispatchOutcome::NoPresentValue
        );
        assert_eq!(
            repository.get(target()).unwrap().present_value(),
            Some(&DataValue::Real(20.0))
        );
    }

    #[tokio::test]
    async fn installed_handler_follows_engine_events() {
        let (engine, repository, manager) = subscribed().await;
        let dispatcher = Arc::new(NotificationDispatcher::new(repository.clone(), manager.table()));
        let registration = dispatcher.install(&engine);
        assert_eq!(engine.handler_count(), 1);

        assert!(engine.set_present_value(2640, target(), DataValue::Real(22.0)));
        assert_eq!(
            repository.get(target()).unwrap().present_value(),
            Some(&DataValue::Real(22.0))
        );

        drop(registration);
        assert_eq!(engine.handler_count(), 0);
        engine.inject(EngineEvent::CovNotification(notification(
            target(),
            Some(DataValue::Real(5.0)),
        )));
        assert_eq!(
            repository.get(target()).unwrap().present_value(),
            Some(&DataValue::Real(22.0))
        );
    }

    #[tokio::test]
    async fn full_hook_queue_drops_instead_of_blocking() {
        let (_engine, repository, manager) = subscribed().await;
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let delivered: Arc<Mutex<Vec<CovUpdate>>> = Arc::default();
        let sink = delivered.clone();
        let dispatcher = NotificationDispatcher::new(repository.clone(), manager.table())
            .with_hook(1, move |update| {
                // Blocks until the gate is dropped.
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                sink.lock().unwrap().push(update);
            })
            .unwrap();

        for i in 0..5 {
            let outcome =
                dispatcher.handle(&notification(target(), Some(DataValue::Real(i as f32))));
            assert_eq!(outcome, DispatchOutcome::Applied);
        }
        assert_eq!(
            repository.get(target()).unwrap().present_value(),
            Some(&DataValue::Real(4.0))
        );
        let dropped = dispatcher.stats().hook_dropped;
        assert!(dropped >= 3, "dropped {dropped}");

        drop(gate_tx);
        dispatcher.drain_hook().await;
        assert_eq!(delivered.lock().unwrap().len() as u64, 5 - dropped);
    }
}
