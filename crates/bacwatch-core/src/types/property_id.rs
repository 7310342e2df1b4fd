use core::fmt;

/// BACnet property identifiers used by the orchestration layer.
///
/// Anything else travels as [`Proprietary`](Self::Proprietary) with its raw
/// numeric identifier, which is also how vendor properties arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyId {
    CovIncrement,
    Description,
    ModelName,
    ObjectIdentifier,
    ObjectList,
    ObjectName,
    ObjectType,
    PresentValue,
    StatusFlags,
    Units,
    VendorName,
    Proprietary(u32),
}

impl PropertyId {
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::CovIncrement => 22,
            Self::Description => 28,
            Self::ModelName => 70,
            Self::ObjectIdentifier => 75,
            Self::ObjectList => 76,
            Self::ObjectName => 77,
            Self::ObjectType => 79,
            Self::PresentValue => 85,
            Self::StatusFlags => 111,
            Self::Units => 117,
            Self::VendorName => 121,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u32(value: u32) -> Self {
        match value {
            22 => Self::CovIncrement,
            28 => Self::Description,
            70 => Self::ModelName,
            75 => Self::ObjectIdentifier,
            76 => Self::ObjectList,
            77 => Self::ObjectName,
            79 => Self::ObjectType,
            85 => Self::PresentValue,
            111 => Self::StatusFlags,
            117 => Self::Units,
            121 => Self::VendorName,
            v => Self::Proprietary(v),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CovIncrement => "cov-increment",
            Self::Description => "description",
            Self::ModelName => "model-name",
            Self::ObjectIdentifier => "object-identifier",
            Self::ObjectList => "object-list",
            Self::ObjectName => "object-name",
            Self::ObjectType => "object-type",
            Self::PresentValue => "present-value",
            Self::StatusFlags => "status-flags",
            Self::Units => "units",
            Self::VendorName => "vendor-name",
            Self::Proprietary(v) => return write!(f, "property-{v}"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn maps_standard_identifiers() {
        assert_eq!(PropertyId::from_u32(85), PropertyId::PresentValue);
        assert_eq!(PropertyId::ObjectList.to_u32(), 76);
        assert_eq!(PropertyId::from_u32(117), PropertyId::Units);
    }

    #[test]
    fn keeps_vendor_identifiers_raw() {
        let vendor = PropertyId::from_u32(5123);
        assert_eq!(vendor, PropertyId::Proprietary(5123));
        assert_eq!(vendor.to_u32(), 5123);
        assert_eq!(vendor.to_string(), "property-5123");
    }
}
