//! Locating devices through Who-Is / I-Am.

use crate::engine::{EngineEvent, EventHandler, HandlerRegistration, ProtocolEngine};
use crate::ClientError;
use bacwatch_core::{DeviceAddress, ObjectId, ObjectType};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// An I-Am as delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAnnouncement {
    pub device_id: ObjectId,
    pub address: DeviceAddress,
    pub vendor_id: u16,
}

/// A located device: its instance number and where to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceHandle {
    pub instance: u32,
    pub address: DeviceAddress,
}

impl DeviceHandle {
    pub fn device_id(&self) -> ObjectId {
        ObjectId::device(self.instance)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{} at {}", self.instance, self.address)
    }
}

/// Devices seen so far, in first-seen order.
///
/// The first address seen for an instance wins; later announcements from a
/// different address are ignored.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: Vec<DeviceHandle>,
    index: HashMap<u32, usize>,
}

impl DeviceTable {
    /// Records an announcement. Returns the handle only when the instance is
    /// new.
    pub fn record(&mut self, announcement: &DeviceAnnouncement) -> Option<DeviceHandle> {
        if announcement.device_id.object_type() != ObjectType::Device {
            log::debug!(
                "ignoring I-Am carrying non-device id {}",
                announcement.device_id
            );
            return None;
        }
        let instance = announcement.device_id.instance();
        if let Some(&slot) = self.index.get(&instance) {
            let known = self.devices[slot];
            if known.address != announcement.address {
                log::debug!(
                    "device {instance} also announced from {}; keeping {}",
                    announcement.address,
                    known.address
                );
            }
            return None;
        }
        let handle = DeviceHandle {
            instance,
            address: announcement.address,
        };
        self.index.insert(instance, self.devices.len());
        self.devices.push(handle);
        Some(handle)
    }

    pub fn get(&self, instance: u32) -> Option<DeviceHandle> {
        self.index.get(&instance).map(|&slot| self.devices[slot])
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn into_devices(self) -> Vec<DeviceHandle> {
        self.devices
    }
}

pub struct DeviceDiscoverer<E: ProtocolEngine> {
    engine: Arc<E>,
    lookup_timeout: Duration,
}

impl<E: ProtocolEngine> DeviceDiscoverer<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            lookup_timeout: Duration::from_secs(5),
        }
    }

    /// How long the targeted lookup after a fruitless window may take.
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Finds `target_instance`, returning as soon as it announces itself.
    ///
    /// A global Who-Is is followed by up to `window` of listening. If the
    /// target stays silent, one Who-Is limited to its instance gets another
    /// `lookup_timeout` before [`ClientError::NotFound`] is reported. The
    /// announcement handler is released on every return path.
    pub async fn discover(
        &self,
        target_instance: u32,
        window: Duration,
    ) -> Result<DeviceHandle, ClientError> {
        let (_registration, mut rx) = self.listen();
        let mut table = DeviceTable::default();

        self.engine.who_is(None).await?;
        log::info!("Who-Is sent; waiting up to {window:?} for device {target_instance}");
        let deadline = Instant::now() + window;
        if let Some(handle) = collect(&mut rx, &mut table, Some(target_instance), deadline).await {
            log::info!("found {handle}");
            return Ok(handle);
        }

        log::info!(
            "device {target_instance} silent after {window:?} ({} other devices seen); trying targeted lookup",
            table.len()
        );
        self.engine
            .who_is(Some((target_instance, target_instance)))
            .await?;
        let deadline = Instant::now() + self.lookup_timeout;
        match collect(&mut rx, &mut table, Some(target_instance), deadline).await {
            Some(handle) => {
                log::info!("found {handle} by targeted lookup");
                Ok(handle)
            }
            None => Err(ClientError::NotFound {
                device_instance: target_instance,
            }),
        }
    }

    /// Every device that announces itself within `window`, in first-seen
    /// order.
    pub async fn scan(&self, window: Duration) -> Result<Vec<DeviceHandle>, ClientError> {
        let (_registration, mut rx) = self.listen();
        let mut table = DeviceTable::default();
        self.engine.who_is(None).await?;
        collect(&mut rx, &mut table, None, Instant::now() + window).await;
        Ok(table.into_devices())
    }

    fn listen(
        &self,
    ) -> (
        HandlerRegistration<E>,
        mpsc::UnboundedReceiver<DeviceAnnouncement>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: EventHandler = Arc::new(move |event: &EngineEvent| {
            if let EngineEvent::DeviceAnnounced(announcement) = event {
                let _ = tx.send(announcement.clone());
            }
        });
        (HandlerRegistration::register(&self.engine, handler), rx)
    }
}

/// Drains announcements into `table` until `deadline`, or until `target`
/// (when given) is known.
async fn collect(
    rx: &mut mpsc::UnboundedReceiver<DeviceAnnouncement>,
    table: &mut DeviceTable,
    target: Option<u32>,
    deadline: Instant,
) -> Option<DeviceHandle> {
    if let Some(found) = target.and_then(|t| table.get(t)) {
        return Some(found);
    }
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(announcement)) => {
                let Some(handle) = table.record(&announcement) else {
                    continue;
                };
                log::debug!("I-Am from {handle}");
                if target == Some(handle.instance) {
                    return Some(handle);
                }
            }
            Ok(None) => {
                tokio::time::sleep_until(deadline).await;
                return None;
            }
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceAnnouncement, DeviceDiscoverer, DeviceTable};
    use crate::engine::ProtocolEngine;
    use crate::simulator::{SimulatedDevice, SimulatedEngine};
    use crate::ClientError;
    use bacwatch_core::{DeviceAddress, ObjectId};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn addr(s: &str) -> DeviceAddress {
        DeviceAddress::Ip(s.parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn first_seen_address_wins() {
        let mut table = DeviceTable::default();
        let first = DeviceAnnouncement {
            device_id: ObjectId::device(7),
            address: addr("10.0.0.7:47808"),
            vendor_id: 1,
        };
        let moved = DeviceAnnouncement {
            address: addr("10.0.0.99:47808"),
            ..first.clone()
        };
        assert!(table.record(&first).is_some());
        assert!(table.record(&moved).is_none());
        assert!(table.record(&first).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(7).unwrap().address, addr("10.0.0.7:47808"));
    }

    #[test]
    fn non_device_announcements_are_ignored() {
        let mut table = DeviceTable::default();
        let bogus = DeviceAnnouncement {
            device_id: ObjectId::from_raw(0),
            address: addr("10.0.0.1:47808"),
            vendor_id: 0,
        };
        assert!(table.record(&bogus).is_none());
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn discover_returns_early_with_announced_address() {
        let engine = Arc::new(SimulatedEngine::new().with_device(
            SimulatedDevice::new(2640, addr("192.168.2.233:47808"))
                .with_announce_delay(Duration::from_millis(300))
                .with_duplicate_announcements(2),
        ));
        let discoverer = DeviceDiscoverer::new(engine.clone());
        let started = Instant::now();
        let handle = discoverer
            .discover(2640, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(handle.instance, 2640);
        assert_eq!(handle.address, addr("192.168.2.233:47808"));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_only_after_window_and_lookup() {
        let engine = Arc::new(SimulatedEngine::new().with_device(SimulatedDevice::new(
            100,
            addr("192.168.2.10:47808"),
        )));
        let discoverer =
            DeviceDiscoverer::new(engine.clone()).with_lookup_timeout(Duration::from_secs(5));
        let started = Instant::now();
        let err = discoverer
            .discover(2640, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotFound {
                device_instance: 2640
            }
        ));
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(engine.who_is_requests(), vec![None, Some((2640, 2640))]);
        assert_eq!(engine.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn targeted_lookup_finds_device_that_ignores_global_who_is() {
        let engine = Arc::new(SimulatedEngine::new().with_device(
            SimulatedDevice::new(2640, addr("192.168.2.233:47808")).ignoring_global_who_is(),
        ));
        let discoverer = DeviceDiscoverer::new(engine.clone());
        let started = Instant::now();
        let handle = discoverer
            .discover(2640, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(handle.address, addr("192.168.2.233:47808"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_lists_each_device_once_in_arrival_order() {
        let engine = Arc::new(
            SimulatedEngine::new()
                .with_device(
                    SimulatedDevice::new(2, addr("10.0.0.2:47808"))
                        .with_announce_delay(Duration::from_millis(200))
                        .with_duplicate_announcements(3),
                )
                .with_device(
                    SimulatedDevice::new(1, addr("10.0.0.1:47808"))
                        .with_announce_delay(Duration::from_millis(50))
                        .announcing_also_from(addr("10.0.0.201:47808")),
                ),
        );
        let devices = DeviceDiscoverer::new(engine.clone())
            .scan(Duration::from_secs(1))
            .await
            .unwrap();
        let seen: Vec<_> = devices.iter().map(|d| (d.instance, d.address)).collect();
        assert_eq!(
            seen,
            vec![(1, addr("10.0.0.1:47808")), (2, addr("10.0.0.2:47808"))]
        );
        assert_eq!(engine.handler_count(), 0);
    }

    #[tokio::test]
    async fn who_is_failure_still_releases_handler() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.stop().await.unwrap();
        let err = DeviceDiscoverer::new(engine.clone())
            .discover(1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::EngineStopped));
        assert_eq!(engine.handler_count(), 0);
    }
}
