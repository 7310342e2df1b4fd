//! Shared pieces of the `bacwatch` command-line tools: configuration
//! loading, command-line overrides and the simulated demo site.

use bacwatch_client::{
    ConfigError, ShutdownToken, SimulatedDevice, SimulatedEngine, SubscriberConfig,
};
use bacwatch_core::{DataValue, DeviceAddress, ObjectId, ObjectType};
use clap::Args;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Loads a JSON configuration file. Fields the file leaves out keep their
/// defaults; no file means all defaults.
pub fn load_config(path: Option<&Path>) -> Result<SubscriberConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(SubscriberConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<SubscriberConfig, ConfigError> {
    serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Command-line settings that take precedence over the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Local device instance.
    #[arg(long)]
    pub local_device: Option<u32>,
    #[arg(long)]
    pub bind: Option<Ipv4Addr>,
    #[arg(long)]
    pub broadcast: Option<Ipv4Addr>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Instance of the device to subscribe on.
    #[arg(long)]
    pub target_device: Option<u32>,
    /// Object to subscribe to, e.g. `analog-value:40250`. Repeatable.
    #[arg(long = "target")]
    pub targets: Vec<ObjectId>,
    #[arg(long)]
    pub process_id: Option<u32>,
    /// Ask for unconfirmed notifications.
    #[arg(long)]
    pub unconfirmed: bool,
    #[arg(long)]
    pub lifetime_seconds: Option<u32>,
    #[arg(long)]
    pub discovery_window_secs: Option<u64>,
    #[arg(long)]
    pub enumeration_timeout_secs: Option<u64>,
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,
    #[arg(long)]
    pub max_concurrent_reads: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut SubscriberConfig) {
        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        set(&mut config.local.device_instance, &self.local_device);
        set(&mut config.local.bind_address, &self.bind);
        set(&mut config.local.broadcast_address, &self.broadcast);
        set(&mut config.local.port, &self.port);
        set(&mut config.target_device_instance, &self.target_device);
        set(&mut config.subscriber_process_id, &self.process_id);
        set(&mut config.lifetime_seconds, &self.lifetime_seconds);
        set(&mut config.discovery_window_secs, &self.discovery_window_secs);
        set(&mut config.enumeration_timeout_secs, &self.enumeration_timeout_secs);
        set(&mut config.request_timeout_ms, &self.request_timeout_ms);
        set(&mut config.max_concurrent_reads, &self.max_concurrent_reads);
        if !self.targets.is_empty() {
            config.targets = self.targets.clone();
        }
        if self.unconfirmed {
            config.confirmed_notifications = false;
        }
    }
}

/// Defaults, then the file, then the command line.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<SubscriberConfig, ConfigError> {
    let mut config = load_config(path)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn host_on_site(config: &SubscriberConfig, host: u8) -> DeviceAddress {
    let [a, b, c, _] = config.local.broadcast_address.octets();
    DeviceAddress::Ip(SocketAddrV4::new(Ipv4Addr::new(a, b, c, host), config.local.port).into())
}

/// A simulated site shaped by `config`: the target device carrying every
/// target object plus a few typical points, and two neighbours.
pub fn demo_site(config: &SubscriberConfig) -> SimulatedEngine {
    let instance = config.target_device_instance;
    let mut target = SimulatedDevice::new(instance, host_on_site(config, 233))
        .with_vendor_id(260)
        .with_announce_delay(Duration::from_millis(200))
        .with_duplicate_announcements(1)
        .with_point(
            ObjectId::new(ObjectType::AnalogInput, 1),
            "Outdoor air temperature",
            DataValue::Real(8.5),
        )
        .with_point(
            ObjectId::new(ObjectType::AnalogValue, 2),
            "Zone setpoint",
            DataValue::Real(21.0),
        )
        .with_point(
            ObjectId::new(ObjectType::BinaryValue, 3),
            "Supply fan",
            DataValue::Enumerated(1),
        )
        .with_point(
            ObjectId::new(ObjectType::MultiStateValue, 4),
            "Operating mode",
            DataValue::Unsigned(2),
        );
    for (n, object_id) in config.targets.iter().enumerate() {
        target = target.with_point(
            *object_id,
            &format!("Monitored point {}", n + 1),
            demo_value(object_id.object_type(), 0),
        );
    }

    SimulatedEngine::new()
        .with_device(
            SimulatedDevice::new(instance.wrapping_add(1), host_on_site(config, 10))
                .with_announce_delay(Duration::from_millis(50)),
        )
        .with_device(
            SimulatedDevice::new(instance.wrapping_add(2), host_on_site(config, 11))
                .with_announce_delay(Duration::from_millis(120)),
        )
        .with_device(target)
}

/// Value a demo point takes on its `tick`-th change.
pub fn demo_value(object_type: ObjectType, tick: u64) -> DataValue {
    match object_type {
        ObjectType::BinaryInput | ObjectType::BinaryOutput | ObjectType::BinaryValue => {
            DataValue::Enumerated((tick % 2) as u32)
        }
        ObjectType::MultiStateInput
        | ObjectType::MultiStateOutput
        | ObjectType::MultiStateValue => DataValue::Unsigned((tick % 3) as u32 + 1),
        _ => DataValue::Real(21.0 + (tick % 10) as f32 * 0.25),
    }
}

/// Moves every target's value each `interval` until `shutdown` fires, so the
/// demo site produces notifications.
pub async fn drive_demo(
    engine: Arc<SimulatedEngine>,
    config: SubscriberConfig,
    interval: Duration,
    shutdown: ShutdownToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut tick = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shutdown.wait() => return,
        }
        if !engine.is_running() {
            continue;
        }
        tick += 1;
        for object_id in &config.targets {
            let value = demo_value(object_id.object_type(), tick);
            engine.set_present_value(config.target_device_instance, *object_id, value);
        }
    }
}
