use crate::ConfigError;
use bacwatch_core::types::object_id::MAX_INSTANCE;
use bacwatch_core::{DeviceAddress, ObjectId, ObjectType};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Identity and network placement of the local BACnet device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LocalDeviceConfig {
    pub device_instance: u32,
    pub bind_address: Ipv4Addr,
    pub broadcast_address: Ipv4Addr,
    pub broadcast_prefix: u8,
    pub port: u16,
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            device_instance: 1235,
            bind_address: Ipv4Addr::UNSPECIFIED,
            broadcast_address: Ipv4Addr::new(192, 168, 2, 255),
            broadcast_prefix: 24,
            port: DeviceAddress::BACNET_IP_DEFAULT_PORT,
        }
    }
}

/// Everything one subscriber run needs. Every field has a default, so a
/// partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SubscriberConfig {
    pub local: LocalDeviceConfig,
    pub target_device_instance: u32,
    pub targets: Vec<ObjectId>,
    pub subscriber_process_id: u32,
    pub confirmed_notifications: bool,
    pub lifetime_seconds: u32,
    pub discovery_window_secs: u64,
    pub lookup_timeout_secs: u64,
    pub enumeration_timeout_secs: u64,
    pub request_timeout_ms: u64,
    pub max_concurrent_reads: usize,
    pub hook_queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            local: LocalDeviceConfig::default(),
            target_device_instance: 2640,
            targets: vec![ObjectId::new(ObjectType::AnalogValue, 40250)],
            subscriber_process_id: 1,
            confirmed_notifications: true,
            lifetime_seconds: 3600,
            discovery_window_secs: 10,
            lookup_timeout_secs: 5,
            enumeration_timeout_secs: 30,
            request_timeout_ms: 3000,
            max_concurrent_reads: 8,
            hook_queue_capacity: 64,
        }
    }
}

impl SubscriberConfig {
    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs(self.discovery_window_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_secs(self.enumeration_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.targets.is_empty() {
            return invalid("at least one target object is required");
        }
        if self.lifetime_seconds == 0 {
            return invalid("lifetime_seconds must be non-zero");
        }
        if self.max_concurrent_reads == 0 {
            return invalid("max_concurrent_reads must be non-zero");
        }
        if self.hook_queue_capacity == 0 {
            return invalid("hook_queue_capacity must be non-zero");
        }
        if self.discovery_window_secs == 0 || self.enumeration_timeout_secs == 0 {
            return invalid("discovery and enumeration windows must be non-zero");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be non-zero");
        }
        if self.local.broadcast_prefix > 32 {
            return invalid("broadcast_prefix must be at most 32");
        }
        if self.target_device_instance > MAX_INSTANCE
            || self.local.device_instance > MAX_INSTANCE
        {
            return invalid("device instance out of range");
        }
        Ok(())
    }
}
