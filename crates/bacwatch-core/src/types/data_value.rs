use crate::types::ObjectId;
use core::fmt;

/// An owned BACnet application value as read from, or reported by, a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString { unused_bits: u8, data: Vec<u8> },
    Enumerated(u32),
    ObjectId(ObjectId),
    /// A sequence such as the device `object-list`.
    List(Vec<DataValue>),
}

impl DataValue {
    /// Numeric view of scalar values; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Unsigned(v) => Some(f64::from(*v)),
            Self::Signed(v) => Some(f64::from(*v)),
            Self::Real(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Enumerated(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::CharacterString(s) => Some(s),
            _ => None,
        }
    }

    /// Object identifiers carried by an `object-list` style value.
    ///
    /// A bare identifier counts as a one-element list; anything else yields
    /// `None`.
    pub fn object_ids(&self) -> Option<Vec<ObjectId>> {
        match self {
            Self::ObjectId(id) => Some(vec![*id]),
            Self::List(values) => Some(
                values
                    .iter()
                    .filter_map(|v| match v {
                        Self::ObjectId(id) => Some(*id),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::OctetString(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::CharacterString(s) => f.write_str(s),
            Self::BitString { unused_bits, data } => {
                let total = data.len() * 8 - usize::from(*unused_bits).min(data.len() * 8);
                for i in 0..total {
                    let bit = data[i / 8] & (0x80 >> (i % 8)) != 0;
                    f.write_str(if bit { "1" } else { "0" })?;
                }
                Ok(())
            }
            Self::Enumerated(v) => write!(f, "enum({v})"),
            Self::ObjectId(id) => write!(f, "{id}"),
            Self::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DataValue;
    use crate::types::{ObjectId, ObjectType};

    #[test]
    fn object_list_extraction_skips_foreign_entries() {
        let ai = ObjectId::new(ObjectType::AnalogInput, 1);
        let bv = ObjectId::new(ObjectType::BinaryValue, 7);
        let list = DataValue::List(vec![
            DataValue::ObjectId(ai),
            DataValue::Null,
            DataValue::ObjectId(bv),
        ]);
        assert_eq!(list.object_ids(), Some(vec![ai, bv]));
        assert_eq!(DataValue::ObjectId(ai).object_ids(), Some(vec![ai]));
        assert_eq!(DataValue::Real(1.0).object_ids(), None);
    }

    #[test]
    fn renders_values_for_logs() {
        assert_eq!(DataValue::Real(21.5).to_string(), "21.5");
        assert_eq!(
            DataValue::BitString {
                unused_bits: 4,
                data: vec![0b1010_0000]
            }
            .to_string(),
            "1010"
        );
        assert_eq!(
            DataValue::List(vec![DataValue::Unsigned(1), DataValue::Boolean(false)]).to_string(),
            "[1, false]"
        );
    }

    #[test]
    fn numeric_view() {
        assert_eq!(DataValue::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(DataValue::Real(21.5).as_f64(), Some(21.5));
        assert_eq!(DataValue::CharacterString("x".into()).as_f64(), None);
    }
}
