//! BACnet value types shared across the bacwatch crates.
//!
//! `bacwatch-core` holds the protocol vocabulary the orchestration layer works
//! in: object identifiers, object and property identifiers, owned application
//! values, engineering units and device addresses. It carries no I/O.
//!
//! # Feature flags
//!
//! - **`serde`**: derives `Serialize`/`Deserialize` on the public types.

/// Network addresses of BACnet devices.
pub mod address;
/// Object identifiers, property identifiers and application data values.
pub mod types;

pub use address::DeviceAddress;
pub use types::{
    engineering_units_name, DataValue, ObjectId, ObjectType, ParseObjectIdError, PropertyId,
};
