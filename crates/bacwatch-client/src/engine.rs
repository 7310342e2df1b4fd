//! The seam between the orchestration layer and a BACnet protocol engine.
//!
//! Wire encoding, the datagram transport and application-service semantics
//! live behind [`ProtocolEngine`]. The core only ever broadcasts Who-Is,
//! sends confirmed requests and listens for inbound [`EngineEvent`]s.

use crate::config::LocalDeviceConfig;
use crate::cov::CovNotification;
use crate::discovery::DeviceAnnouncement;
use crate::ClientError;
use bacwatch_core::{DataValue, DeviceAddress, ObjectId, PropertyId};
use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Confirmed services the core issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceKind {
    ReadProperty,
    SubscribeCov,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadProperty => "read-property",
            Self::SubscribeCov => "subscribe-cov",
        })
    }
}

/// SubscribeCOV parameters. A lifetime of zero cancels the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscribeCovRequest {
    pub subscriber_process_id: u32,
    pub monitored_object_id: ObjectId,
    pub confirmed: bool,
    pub lifetime_seconds: u32,
}

impl SubscribeCovRequest {
    pub fn cancel(subscriber_process_id: u32, monitored_object_id: ObjectId) -> Self {
        Self {
            subscriber_process_id,
            monitored_object_id,
            confirmed: false,
            lifetime_seconds: 0,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.lifetime_seconds == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ServiceRequest {
    ReadProperty {
        object_id: ObjectId,
        property_id: PropertyId,
    },
    SubscribeCov(SubscribeCovRequest),
}

impl ServiceRequest {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::ReadProperty { .. } => ServiceKind::ReadProperty,
            Self::SubscribeCov(_) => ServiceKind::SubscribeCov,
        }
    }
}

/// Positive acknowledgement of a [`ServiceRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAck {
    Simple,
    Value(DataValue),
}

/// Everything the engine delivers unsolicited, through one callback type.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DeviceAnnounced(DeviceAnnouncement),
    CovNotification(CovNotification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// Inbound event callback. Runs on the engine's delivery context, so bodies
/// must return quickly.
pub type EventHandler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// A BACnet protocol engine as seen by the orchestration layer.
///
/// Engines are shared behind `Arc` and used from several tasks at once.
/// Requests may never complete when a datagram is lost; callers bound every
/// request with their own timeout.
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Brings up the local device and its transport.
    fn start(
        &self,
        config: &LocalDeviceConfig,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Releases the local device. Further requests fail with
    /// [`ClientError::EngineStopped`].
    fn stop(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Broadcasts Who-Is, optionally limited to an inclusive instance range.
    /// Answers arrive later as [`EngineEvent::DeviceAnnounced`].
    fn who_is(
        &self,
        range: Option<(u32, u32)>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn send_request(
        &self,
        address: DeviceAddress,
        request: ServiceRequest,
    ) -> impl Future<Output = Result<ServiceAck, ClientError>> + Send;

    fn register_handler(&self, handler: EventHandler) -> HandlerId;

    fn unregister_handler(&self, id: HandlerId);
}

/// Keeps an event handler registered for as long as it is alive.
pub struct HandlerRegistration<E: ProtocolEngine> {
    engine: Arc<E>,
    id: HandlerId,
}

impl<E: ProtocolEngine> HandlerRegistration<E> {
    pub fn register(engine: &Arc<E>, handler: EventHandler) -> Self {
        let id = engine.register_handler(handler);
        log::trace!("registered engine handler {}", id.0);
        Self {
            engine: engine.clone(),
            id,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl<E: ProtocolEngine> Drop for HandlerRegistration<E> {
    fn drop(&mut self) {
        self.engine.unregister_handler(self.id);
        log::trace!("released engine handler {}", self.id.0);
    }
}

impl<E: ProtocolEngine> fmt::Debug for HandlerRegistration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// Reads one property, failing with [`ClientError::Timeout`] after `wait`.
pub async fn read_property<E: ProtocolEngine>(
    engine: &E,
    address: DeviceAddress,
    object_id: ObjectId,
    property_id: PropertyId,
    wait: Duration,
) -> Result<DataValue, ClientError> {
    let request = ServiceRequest::ReadProperty {
        object_id,
        property_id,
    };
    match timeout(wait, engine.send_request(address, request)).await {
        Ok(Ok(ServiceAck::Value(value))) => Ok(value),
        Ok(Ok(ServiceAck::Simple)) => Err(ClientError::UnsupportedResponse),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ClientError::Timeout),
    }
}

/// Sends SubscribeCOV (or its lifetime-zero cancellation) and waits for the
/// simple acknowledgement.
pub async fn subscribe_cov<E: ProtocolEngine>(
    engine: &E,
    address: DeviceAddress,
    request: SubscribeCovRequest,
    wait: Duration,
) -> Result<(), ClientError> {
    match timeout(
        wait,
        engine.send_request(address, ServiceRequest::SubscribeCov(request)),
    )
    .await
    {
        Ok(Ok(ServiceAck::Simple)) => Ok(()),
        Ok(Ok(ServiceAck::Value(_))) => Err(ClientError::UnsupportedResponse),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ClientError::Timeout),
    }
}
