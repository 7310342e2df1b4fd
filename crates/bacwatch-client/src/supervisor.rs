//! Runs the whole subscriber: discover, enumerate, subscribe, then wait for
//! shutdown and tear everything down exactly once.

use crate::config::SubscriberConfig;
use crate::cov::CovUpdate;
use crate::discovery::{DeviceDiscoverer, DeviceHandle};
use crate::dispatcher::{DispatchStats, NotificationDispatcher};
use crate::engine::{read_property, HandlerRegistration, ProtocolEngine};
use crate::enumerate::{EnumerationReport, ObjectEnumerator};
use crate::repository::ObjectRepository;
use crate::subscription::{Subscription, SubscriptionKey, SubscriptionManager};
use crate::ClientError;
use bacwatch_core::{ObjectId, PropertyId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

const EXAMPLE_POINTS: usize = 5;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A one-shot stop signal. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has fired, immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any token, so this only ends by firing.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// What a run achieved, for the host to report.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    pub device: Option<DeviceHandle>,
    pub enumeration: Option<EnumerationReport>,
    pub objects: usize,
    pub subscriptions: Vec<Subscription>,
    pub dispatch: DispatchStats,
    pub uptime: Duration,
}

pub struct Supervisor<E: ProtocolEngine> {
    engine: Arc<E>,
    config: SubscriberConfig,
    shutdown: ShutdownToken,
    repository: Arc<ObjectRepository>,
    subscriptions: SubscriptionManager<E>,
    dispatcher: Arc<NotificationDispatcher>,
    registration: Mutex<Option<HandlerRegistration<E>>>,
    device: Mutex<Option<DeviceHandle>>,
    report: Mutex<Option<EnumerationReport>>,
    torn_down: AtomicBool,
}

impl<E: ProtocolEngine> Supervisor<E> {
    pub fn new(engine: Arc<E>, config: SubscriberConfig, shutdown: ShutdownToken) -> Self {
        let repository = Arc::new(ObjectRepository::new());
        let subscriptions =
            SubscriptionManager::new(engine.clone()).with_request_timeout(config.request_timeout());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            repository.clone(),
            subscriptions.table(),
        ));
        Self {
            engine,
            config,
            shutdown,
            repository,
            subscriptions,
            dispatcher,
            registration: Mutex::new(None),
            device: Mutex::new(None),
            report: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Forwards every applied update to `hook`, run on its own thread with
    /// at most `hook_queue_capacity` updates waiting.
    pub fn with_hook<F>(mut self, hook: F) -> Result<Self, ClientError>
    where
        F: FnMut(CovUpdate) + Send + 'static,
    {
        let dispatcher =
            NotificationDispatcher::new(self.repository.clone(), self.subscriptions.table())
                .with_hook(self.config.hook_queue_capacity, hook)?;
        self.dispatcher = Arc::new(dispatcher);
        Ok(self)
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn repository(&self) -> Arc<ObjectRepository> {
        self.repository.clone()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager<E> {
        &self.subscriptions
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        *lock(&self.device)
    }

    /// Starts up, waits for the shutdown token, then tears down.
    ///
    /// A startup failure skips the wait. Teardown runs either way and the
    /// failure is returned once it has finished. Firing the token during
    /// startup abandons startup.
    pub async fn run(&self) -> Result<RunSummary, ClientError> {
        let started = Instant::now();
        let startup = tokio::select! {
            result = self.start_up() => Some(result),
            () = self.shutdown.wait() => None,
        };
        let result = match startup {
            Some(Ok(())) => {
                log::info!("subscriber running; waiting for shutdown");
                self.shutdown.wait().await;
                Ok(())
            }
            Some(Err(err)) => {
                log::error!("startup failed: {err}");
                Err(err)
            }
            None => {
                log::info!("shutdown requested during startup");
                Ok(())
            }
        };
        self.shutdown().await;
        result.map(|()| self.summary(started.elapsed()))
    }

    /// Best-effort teardown: cancel subscriptions, remove the dispatcher,
    /// stop the engine, drain the hook, fire the token. Only the first call
    /// does anything.
    pub async fn shutdown(&self) {
        if self
            .torn_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("shutdown already done or in progress");
            return;
        }
        log::info!("shutting down");

        for (key, outcome) in self.subscriptions.unsubscribe_all().await {
            log::debug!("{key}: {outcome:?}");
        }
        let registration = lock(&self.registration).take();
        drop(registration);
        if let Err(err) = self.engine.stop().await {
            log::warn!("stopping protocol engine failed: {err}");
        }
        self.dispatcher.drain_hook().await;
        self.shutdown.trigger();
        log::info!("shutdown complete");
    }

    pub fn summary(&self, uptime: Duration) -> RunSummary {
        RunSummary {
            device: self.device(),
            enumeration: *lock(&self.report),
            objects: self.repository.len(),
            subscriptions: self.subscriptions.subscriptions(),
            dispatch: self.dispatcher.stats(),
            uptime,
        }
    }

    async fn start_up(&self) -> Result<(), ClientError> {
        let config = &self.config;
        config.validate()?;

        self.engine.start(&config.local).await?;
        log::info!(
            "local device {} started on port {}",
            config.local.device_instance,
            config.local.port
        );

        let device = DeviceDiscoverer::new(self.engine.clone())
            .with_lookup_timeout(config.lookup_timeout())
            .discover(config.target_device_instance, config.discovery_window())
            .await?;
        *lock(&self.device) = Some(device);

        let report = ObjectEnumerator::new(self.engine.clone())
            .with_request_timeout(config.request_timeout())
            .with_max_concurrent(config.max_concurrent_reads)
            .enumerate(&device, &self.repository, config.enumeration_timeout())
            .await?;
        *lock(&self.report) = Some(report);
        self.repository.log_statistics();
        self.log_examples();

        let registration = self.dispatcher.install(&self.engine);
        *lock(&self.registration) = Some(registration);

        for target in &config.targets {
            self.preflight(&device, *target).await;
        }
        for target in &config.targets {
            let key = SubscriptionKey::new(config.subscriber_process_id, *target);
            self.subscriptions
                .subscribe(
                    key,
                    &device,
                    config.confirmed_notifications,
                    config.lifetime_seconds,
                )
                .await?;
        }
        Ok(())
    }

    /// Reads the device model and the target's present value. Failures are
    /// only logged.
    async fn preflight(&self, device: &DeviceHandle, target: ObjectId) {
        let wait = self.config.request_timeout();
        let engine = self.engine.as_ref();
        let model = read_property(
            engine,
            device.address,
            device.device_id(),
            PropertyId::ModelName,
            wait,
        );
        match model.await {
            Ok(model) => log::info!("{device} model: {model}"),
            Err(err) => log::warn!("reading model name of {device} failed: {err}"),
        }
        let value = read_property(engine, device.address, target, PropertyId::PresentValue, wait);
        match value.await {
            Ok(value) => log::info!("{target} present value: {value}"),
            Err(err) => log::warn!("reading {target} before subscribing failed: {err}"),
        }
    }

    fn log_examples(&self) {
        let examples: Vec<_> = self
            .repository
            .snapshot()
            .into_iter()
            .filter(|p| p.name().is_some())
            .take(EXAMPLE_POINTS)
            .collect();
        if examples.is_empty() {
            return;
        }
        log::info!("example objects:");
        for point in examples {
            log::info!(
                "  {} {:?} value={} units={}",
                point.object_id(),
                point.name().unwrap_or_default(),
                point
                    .present_value()
                    .map_or_else(|| "-".to_string(), ToString::to_string),
                point.units().unwrap_or("-")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ShutdownToken;
    use std::time::Duration;

    #[tokio::test]
    async fn token_fires_once_for_every_clone() {
        let token = ShutdownToken::new();
        let other = token.clone();
        let waiter = tokio::spawn(async move { other.wait().await });

        assert!(!token.is_triggered());
        assert!(token.trigger());
        assert!(!token.trigger());
        assert!(token.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already fired: resolves at once.
        token.wait().await;
    }
}
