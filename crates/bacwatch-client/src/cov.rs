use bacwatch_core::{DataValue, DeviceAddress, ObjectId, PropertyId};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovPropertyValue {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: DataValue,
    pub priority: Option<u8>,
}

/// A COV notification as delivered by the protocol engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovNotification {
    pub source: DeviceAddress,
    pub confirmed: bool,
    pub subscriber_process_id: u32,
    pub initiating_device_id: ObjectId,
    pub monitored_object_id: ObjectId,
    pub time_remaining_seconds: u32,
    pub values: Vec<CovPropertyValue>,
}

impl CovNotification {
    /// The reported present value, if the notification carries one.
    pub fn present_value(&self) -> Option<&DataValue> {
        self.values
            .iter()
            .find(|v| v.property_id == PropertyId::PresentValue)
            .map(|v| &v.value)
    }
}

/// What the dispatcher hands to the downstream hook after applying a
/// notification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovUpdate {
    pub device_id: ObjectId,
    pub object_id: ObjectId,
    pub present_value: Option<DataValue>,
    pub values: Vec<CovPropertyValue>,
    pub time_remaining_seconds: u32,
    pub received_at: SystemTime,
}

impl CovUpdate {
    pub(crate) fn from_notification(notification: &CovNotification) -> Self {
        Self {
            device_id: notification.initiating_device_id,
            object_id: notification.monitored_object_id,
            present_value: notification.present_value().cloned(),
            values: notification.values.clone(),
            time_remaining_seconds: notification.time_remaining_seconds,
            received_at: SystemTime::now(),
        }
    }
}
