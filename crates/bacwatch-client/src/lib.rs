pub mod config;
pub mod cov;
pub mod discovery;
pub mod dispatcher;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod point;
pub mod repository;
pub mod simulator;
pub mod subscription;
pub mod supervisor;

pub use config::{LocalDeviceConfig, SubscriberConfig};
pub use cov::{CovNotification, CovPropertyValue, CovUpdate};
pub use discovery::{DeviceAnnouncement, DeviceDiscoverer, DeviceHandle};
pub use dispatcher::{DispatchOutcome, DispatchStats, NotificationDispatcher};
pub use engine::{
    EngineEvent, EventHandler, HandlerId, HandlerRegistration, ProtocolEngine, ServiceAck,
    ServiceKind, ServiceRequest, SubscribeCovRequest,
};
pub use enumerate::{EnumerationReport, ObjectEnumerator};
pub use error::{ClientError, ConfigError};
pub use point::{classify_point, supports_cov, PointClassification, PointDirection, PointKind};
pub use repository::{DiscoveredPoint, ObjectRepository, RepositoryStatistics};
pub use simulator::{SimulatedDevice, SimulatedEngine};
pub use subscription::{
    Subscription, SubscriptionKey, SubscriptionManager, SubscriptionState, SubscriptionTable,
    UnsubscribeOutcome,
};
pub use supervisor::{RunSummary, ShutdownToken, Supervisor};
