use crate::types::ObjectType;
use core::fmt;
use core::str::FromStr;
use thiserror::Error;

/// Largest instance number a BACnet object identifier can carry (22 bits).
pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

/// A BACnet object identifier: object type plus instance number.
///
/// Packed into one `u32` in wire layout (10 bits type, 22 bits instance), so
/// equality and hashing are structural. Displays as `analog-value:40250`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Creates an identifier; instance bits above 22 are discarded.
    pub const fn new(object_type: ObjectType, instance: u32) -> Self {
        Self((((object_type.to_u16() as u32) & 0x03FF) << 22) | (instance & MAX_INSTANCE))
    }

    /// Identifier of the device object with the given instance.
    pub const fn device(instance: u32) -> Self {
        Self::new(ObjectType::Device, instance)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn object_type(self) -> ObjectType {
        ObjectType::from_u16(((self.0 >> 22) & 0x03FF) as u16)
    }

    pub const fn instance(self) -> u32 {
        self.0 & MAX_INSTANCE
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type(), self.instance())
    }
}

/// Failure to parse an `<object-type>:<instance>` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseObjectIdError {
    #[error("expected <object-type>:<instance>, got {0:?}")]
    Format(String),
    #[error("unknown object type {0:?}")]
    UnknownType(String),
    #[error("instance {0:?} is not a number in 0..=4194303")]
    Instance(String),
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, instance_part) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseObjectIdError::Format(s.to_string()))?;
        let object_type = ObjectType::from_name(type_part)
            .ok_or_else(|| ParseObjectIdError::UnknownType(type_part.to_string()))?;
        let instance = instance_part
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|i| *i <= MAX_INSTANCE)
            .ok_or_else(|| ParseObjectIdError::Instance(instance_part.to_string()))?;
        Ok(Self::new(object_type, instance))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
