//! In-process BACnet engine with simulated devices.
//!
//! [`SimulatedEngine`] implements [`ProtocolEngine`] without a network: it
//! answers Who-Is, ReadProperty and SubscribeCOV from a set of
//! [`SimulatedDevice`]s and delivers I-Am and COV notifications to the
//! registered handlers. Faults (failed, lost and slow reads, refused or lost
//! subscriptions, silent devices) are configured per device. Useful for
//! testing and for running the subscriber without hardware.

use crate::config::LocalDeviceConfig;
use crate::cov::{CovNotification, CovPropertyValue};
use crate::discovery::DeviceAnnouncement;
use crate::engine::{
    EngineEvent, EventHandler, HandlerId, ProtocolEngine, ServiceAck, ServiceKind,
    ServiceRequest, SubscribeCovRequest,
};
use crate::ClientError;
use bacwatch_core::{DataValue, DeviceAddress, ObjectId, ObjectType, PropertyId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const DEGREES_CELSIUS: u32 = 62;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct RemoteSubscription {
    confirmed: bool,
    lifetime_seconds: u32,
    since: Instant,
}

impl RemoteSubscription {
    fn time_remaining(&self) -> u32 {
        let elapsed = u32::try_from(self.since.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.lifetime_seconds.saturating_sub(elapsed)
    }
}

/// A simulated BACnet device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    instance: u32,
    address: DeviceAddress,
    vendor_id: u16,
    objects: BTreeMap<ObjectId, HashMap<PropertyId, DataValue>>,
    announce_delay: Duration,
    duplicate_announcements: usize,
    alternate_addresses: Vec<DeviceAddress>,
    answers_global_who_is: bool,
    failing_reads: HashSet<(ObjectId, PropertyId)>,
    lost_reads: HashSet<(ObjectId, PropertyId)>,
    read_delay: Duration,
    rejects_subscriptions: bool,
    loses_subscriptions: bool,
    initial_notification: bool,
    subscriptions: HashMap<(u32, ObjectId), RemoteSubscription>,
}

impl SimulatedDevice {
    /// A device holding only its own device object.
    pub fn new(instance: u32, address: impl Into<DeviceAddress>) -> Self {
        let device_id = ObjectId::device(instance);
        let mut device_props = HashMap::new();
        device_props.insert(PropertyId::ObjectIdentifier, DataValue::ObjectId(device_id));
        device_props.insert(
            PropertyId::ObjectName,
            DataValue::CharacterString(format!("SimDevice-{instance}")),
        );
        device_props.insert(
            PropertyId::Description,
            DataValue::CharacterString("Simulated device".into()),
        );
        device_props.insert(
            PropertyId::ModelName,
            DataValue::CharacterString("bacwatch simulated controller".into()),
        );
        device_props.insert(
            PropertyId::VendorName,
            DataValue::CharacterString("bacwatch".into()),
        );

        let mut objects = BTreeMap::new();
        objects.insert(device_id, device_props);

        Self {
            instance,
            address: address.into(),
            vendor_id: 0,
            objects,
            announce_delay: Duration::ZERO,
            duplicate_announcements: 0,
            alternate_addresses: Vec::new(),
            answers_global_who_is: true,
            failing_reads: HashSet::new(),
            lost_reads: HashSet::new(),
            read_delay: Duration::ZERO,
            rejects_subscriptions: false,
            loses_subscriptions: false,
            initial_notification: true,
            subscriptions: HashMap::new(),
        }
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    /// Adds an object with exactly the given properties.
    pub fn with_object(
        mut self,
        object_id: ObjectId,
        properties: impl IntoIterator<Item = (PropertyId, DataValue)>,
    ) -> Self {
        self.objects
            .insert(object_id, properties.into_iter().collect());
        self
    }

    /// Adds a point with name, description, present value and status flags.
    /// Analog points also report units.
    pub fn with_point(self, object_id: ObjectId, name: &str, present_value: DataValue) -> Self {
        let mut properties = vec![
            (PropertyId::ObjectName, DataValue::CharacterString(name.into())),
            (
                PropertyId::Description,
                DataValue::CharacterString(format!("{name} (simulated)")),
            ),
            (PropertyId::PresentValue, present_value),
            (
                PropertyId::StatusFlags,
                DataValue::BitString {
                    unused_bits: 4,
                    data: vec![0],
                },
            ),
        ];
        if matches!(
            object_id.object_type(),
            ObjectType::AnalogInput | ObjectType::AnalogOutput | ObjectType::AnalogValue
        ) {
            properties.push((PropertyId::Units, DataValue::Enumerated(DEGREES_CELSIUS)));
        }
        self.with_object(object_id, properties)
    }

    pub fn with_announce_delay(mut self, delay: Duration) -> Self {
        self.announce_delay = delay;
        self
    }

    /// Repeats every I-Am `extra` more times.
    pub fn with_duplicate_announcements(mut self, extra: usize) -> Self {
        self.duplicate_announcements = extra;
        self
    }

    /// Also announces the same instance from `address`, after the real one.
    pub fn announcing_also_from(mut self, address: impl Into<DeviceAddress>) -> Self {
        self.alternate_addresses.push(address.into());
        self
    }

    /// Only answers Who-Is requests whose range names this device.
    pub fn ignoring_global_who_is(mut self) -> Self {
        self.answers_global_who_is = false;
        self
    }

    /// Answers reads of this property with an error.
    pub fn with_failing_read(mut self, object_id: ObjectId, property_id: PropertyId) -> Self {
        self.failing_reads.insert((object_id, property_id));
        self
    }

    /// Never answers reads of this property.
    pub fn with_lost_read(mut self, object_id: ObjectId, property_id: PropertyId) -> Self {
        self.lost_reads.insert((object_id, property_id));
        self
    }

    /// Delays every ReadProperty answer.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn rejecting_subscriptions(mut self) -> Self {
        self.rejects_subscriptions = true;
        self
    }

    /// Never answers SubscribeCOV (cancellations included).
    pub fn losing_subscriptions(mut self) -> Self {
        self.loses_subscriptions = true;
        self
    }

    pub fn without_initial_notification(mut self) -> Self {
        self.initial_notification = false;
        self
    }

    fn answers_who_is(&self, range: Option<(u32, u32)>) -> bool {
        match range {
            None => self.answers_global_who_is,
            Some((low, high)) => (low..=high).contains(&self.instance),
        }
    }

    fn object_list(&self) -> DataValue {
        let device_id = ObjectId::device(self.instance);
        let rest = self.objects.keys().copied().filter(|id| *id != device_id);
        DataValue::List(
            std::iter::once(device_id)
                .chain(rest)
                .map(DataValue::ObjectId)
                .collect(),
        )
    }

    fn read(&self, object_id: ObjectId, property_id: PropertyId) -> Option<Result<ServiceAck, ClientError>> {
        let key = (object_id, property_id);
        if self.lost_reads.contains(&key) {
            return None;
        }
        let rejected = |reason: &str| ClientError::Rejected {
            service: ServiceKind::ReadProperty,
            reason: reason.to_string(),
        };
        if self.failing_reads.contains(&key) {
            return Some(Err(rejected("unknown-property")));
        }
        let Some(properties) = self.objects.get(&object_id) else {
            return Some(Err(rejected("unknown-object")));
        };
        if object_id == ObjectId::device(self.instance) && property_id == PropertyId::ObjectList {
            return Some(Ok(ServiceAck::Value(self.object_list())));
        }
        Some(match properties.get(&property_id) {
            Some(value) => Ok(ServiceAck::Value(value.clone())),
            None => Err(rejected("unknown-property")),
        })
    }

    fn notification_for(
        &self,
        subscriber_process_id: u32,
        object_id: ObjectId,
    ) -> Option<CovNotification> {
        let subscription = self.subscriptions.get(&(subscriber_process_id, object_id))?;
        let properties = self.objects.get(&object_id)?;
        let values = [PropertyId::PresentValue, PropertyId::StatusFlags]
            .into_iter()
            .filter_map(|property_id| {
                properties.get(&property_id).map(|value| CovPropertyValue {
                    property_id,
                    array_index: None,
                    value: value.clone(),
                    priority: None,
                })
            })
            .collect();
        Some(CovNotification {
            source: self.address,
            confirmed: subscription.confirmed,
            subscriber_process_id,
            initiating_device_id: ObjectId::device(self.instance),
            monitored_object_id: object_id,
            time_remaining_seconds: subscription.time_remaining(),
            values,
        })
    }
}

#[derive(Default)]
struct HandlerSet {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, EventHandler)>>,
}

impl HandlerSet {
    /// Calls every handler outside the lock so a handler may unregister.
    fn deliver(&self, event: &EngineEvent) {
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[derive(Debug, Default)]
struct EngineLog {
    requests: Vec<(DeviceAddress, ServiceRequest)>,
    who_is: Vec<Option<(u32, u32)>>,
    local: Option<LocalDeviceConfig>,
}

/// A [`ProtocolEngine`] backed by simulated devices.
///
/// The engine is online from construction; `start` and `stop` are counted so
/// tests can assert the lifecycle. Once stopped, every operation fails with
/// [`ClientError::EngineStopped`] until started again.
pub struct SimulatedEngine {
    devices: Arc<Mutex<Vec<SimulatedDevice>>>,
    handlers: Arc<HandlerSet>,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    log: Mutex<EngineLog>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(Mutex::new(Vec::new())),
            handlers: Arc::new(HandlerSet::default()),
            running: AtomicBool::new(true),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            log: Mutex::new(EngineLog::default()),
        }
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: SimulatedDevice) {
        lock(&self.devices).push(device);
    }

    /// Changes a property value on a device. Subscribers to the object are
    /// notified before this returns. Returns `false` when the device or
    /// object does not exist.
    pub fn set_present_value(&self, device_instance: u32, object_id: ObjectId, value: DataValue) -> bool {
        let notifications: Vec<CovNotification> = {
            let mut devices = lock(&self.devices);
            let Some(device) = devices.iter_mut().find(|d| d.instance == device_instance) else {
                return false;
            };
            let Some(properties) = device.objects.get_mut(&object_id) else {
                return false;
            };
            properties.insert(PropertyId::PresentValue, value);
            let subscribers: Vec<u32> = device
                .subscriptions
                .keys()
                .filter(|(_, id)| *id == object_id)
                .map(|(pid, _)| *pid)
                .collect();
            subscribers
                .into_iter()
                .filter_map(|pid| device.notification_for(pid, object_id))
                .collect()
        };
        for notification in notifications {
            self.handlers
                .deliver(&EngineEvent::CovNotification(notification));
        }
        true
    }

    /// Delivers an arbitrary event to the registered handlers.
    pub fn inject(&self, event: EngineEvent) {
        self.handlers.deliver(&event);
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers.handlers).len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Every confirmed request received, in order.
    pub fn requests(&self) -> Vec<(DeviceAddress, ServiceRequest)> {
        lock(&self.log).requests.clone()
    }

    /// SubscribeCOV requests received (subscriptions and cancellations).
    pub fn subscribe_requests(&self) -> Vec<SubscribeCovRequest> {
        lock(&self.log)
            .requests
            .iter()
            .filter_map(|(_, request)| match request {
                ServiceRequest::SubscribeCov(sub) => Some(*sub),
                _ => None,
            })
            .collect()
    }

    pub fn who_is_requests(&self) -> Vec<Option<(u32, u32)>> {
        lock(&self.log).who_is.clone()
    }

    pub fn local_config(&self) -> Option<LocalDeviceConfig> {
        lock(&self.log).local.clone()
    }

    /// Subscriptions the device currently holds, as (process id, object).
    pub fn remote_subscriptions(&self, device_instance: u32) -> Vec<(u32, ObjectId)> {
        let devices = lock(&self.devices);
        let mut subs: Vec<_> = devices
            .iter()
            .filter(|d| d.instance == device_instance)
            .flat_map(|d| d.subscriptions.keys().copied())
            .collect();
        subs.sort();
        subs
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ClientError::EngineStopped)
        }
    }

    fn handle_subscribe(
        &self,
        device: &mut SimulatedDevice,
        request: SubscribeCovRequest,
    ) -> Option<Result<ServiceAck, ClientError>> {
        if device.loses_subscriptions {
            return None;
        }
        let key = (request.subscriber_process_id, request.monitored_object_id);
        if request.is_cancel() {
            device.subscriptions.remove(&key);
            return Some(Ok(ServiceAck::Simple));
        }
        let rejected = |reason: &str| ClientError::Rejected {
            service: ServiceKind::SubscribeCov,
            reason: reason.to_string(),
        };
        if device.rejects_subscriptions {
            return Some(Err(rejected("services-not-supported")));
        }
        if !device.objects.contains_key(&request.monitored_object_id) {
            return Some(Err(rejected("unknown-object")));
        }
        device.subscriptions.insert(
            key,
            RemoteSubscription {
                confirmed: request.confirmed,
                lifetime_seconds: request.lifetime_seconds,
                since: Instant::now(),
            },
        );
        if device.initial_notification {
            // Sent after the acknowledgement, as a real device does.
            let devices = self.devices.clone();
            let handlers = self.handlers.clone();
            let instance = device.instance;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let notification = lock(&devices)
                    .iter()
                    .find(|d| d.instance == instance)
                    .and_then(|d| d.notification_for(key.0, key.1));
                if let Some(notification) = notification {
                    handlers.deliver(&EngineEvent::CovNotification(notification));
                }
            });
        }
        Some(Ok(ServiceAck::Simple))
    }
}

impl ProtocolEngine for SimulatedEngine {
    async fn start(&self, config: &LocalDeviceConfig) -> Result<(), ClientError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        lock(&self.log).local = Some(config.clone());
        log::debug!(
            "simulated engine up as device {} on port {}",
            config.device_instance,
            config.port
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        log::debug!("simulated engine stopped");
        Ok(())
    }

    async fn who_is(&self, range: Option<(u32, u32)>) -> Result<(), ClientError> {
        self.ensure_running()?;
        lock(&self.log).who_is.push(range);

        let devices = lock(&self.devices);
        for device in devices.iter().filter(|d| d.answers_who_is(range)) {
            let device_id = ObjectId::device(device.instance);
            let mut announcements = vec![device.address; device.duplicate_announcements + 1];
            announcements.extend(device.alternate_addresses.iter().copied());
            let announcements: Vec<_> = announcements
                .into_iter()
                .map(|address| DeviceAnnouncement {
                    device_id,
                    address,
                    vendor_id: device.vendor_id,
                })
                .collect();
            let delay = device.announce_delay;
            let handlers = self.handlers.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for announcement in announcements {
                    handlers.deliver(&EngineEvent::DeviceAnnounced(announcement));
                }
            });
        }
        Ok(())
    }

    async fn send_request(
        &self,
        address: DeviceAddress,
        request: ServiceRequest,
    ) -> Result<ServiceAck, ClientError> {
        self.ensure_running()?;
        lock(&self.log).requests.push((address, request.clone()));

        let (reply, delay) = {
            let mut devices = lock(&self.devices);
            let device = devices.iter_mut().find(|d| d.address == address);
            match device {
                None => (None, Duration::ZERO),
                Some(device) => match request {
                    ServiceRequest::ReadProperty {
                        object_id,
                        property_id,
                    } => (device.read(object_id, property_id), device.read_delay),
                    ServiceRequest::SubscribeCov(sub) => {
                        (self.handle_subscribe(device, sub), Duration::ZERO)
                    }
                },
            }
        };

        match reply {
            Some(reply) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                reply
            }
            None => std::future::pending().await,
        }
    }

    fn register_handler(&self, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.handlers.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.handlers.handlers).push((id, handler));
        id
    }

    fn unregister_handler(&self, id: HandlerId) {
        lock(&self.handlers.handlers).retain(|(existing, _)| *existing != id);
    }
}
