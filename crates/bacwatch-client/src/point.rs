//! Point classification for BACnet objects.
//!
//! A pure, local lookup from [`ObjectType`] to what kind of point an object
//! is and whether it can be expected to report change-of-value. No network
//! access is involved.

use bacwatch_core::ObjectType;

/// The data kind of a BACnet point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PointKind {
    Analog,
    Binary,
    MultiState,
    Accumulator,
    Unknown,
}

/// Whether a BACnet point is an input, output, or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PointDirection {
    Input,
    Output,
    Value,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointClassification {
    pub kind: PointKind,
    pub direction: PointDirection,
    /// `true` for the input/output/value families that carry SubscribeCOV
    /// support as standard.
    pub cov_supported: bool,
}

pub fn classify_point(object_type: ObjectType) -> PointClassification {
    use PointDirection::*;
    use PointKind::*;

    let (kind, direction) = match object_type {
        ObjectType::AnalogInput => (Analog, Input),
        ObjectType::AnalogOutput => (Analog, Output),
        ObjectType::AnalogValue => (Analog, Value),
        ObjectType::BinaryInput => (Binary, Input),
        ObjectType::BinaryOutput => (Binary, Output),
        ObjectType::BinaryValue => (Binary, Value),
        ObjectType::MultiStateInput => (MultiState, Input),
        ObjectType::MultiStateOutput => (MultiState, Output),
        ObjectType::MultiStateValue => (MultiState, Value),
        ObjectType::Accumulator => (Accumulator, Input),
        ObjectType::PulseConverter => (Accumulator, Value),
        _ => (PointKind::Unknown, PointDirection::Unknown),
    };
    let cov_supported = matches!(kind, Analog | Binary | MultiState);

    PointClassification {
        kind,
        direction,
        cov_supported,
    }
}

/// Shorthand for `classify_point(object_type).cov_supported`.
pub fn supports_cov(object_type: ObjectType) -> bool {
    classify_point(object_type).cov_supported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_families_support_cov() {
        for t in [
            ObjectType::AnalogInput,
            ObjectType::AnalogOutput,
            ObjectType::AnalogValue,
            ObjectType::BinaryInput,
            ObjectType::BinaryOutput,
            ObjectType::BinaryValue,
            ObjectType::MultiStateInput,
            ObjectType::MultiStateOutput,
            ObjectType::MultiStateValue,
        ] {
            assert!(supports_cov(t), "{t} should support COV");
        }
    }

    #[test]
    fn accumulators_are_classified_without_cov() {
        let c = classify_point(ObjectType::Accumulator);
        assert_eq!(c.kind, PointKind::Accumulator);
        assert_eq!(c.direction, PointDirection::Input);
        assert!(!c.cov_supported);

        let c = classify_point(ObjectType::PulseConverter);
        assert_eq!(c.direction, PointDirection::Value);
        assert!(!c.cov_supported);
    }

    #[test]
    fn infrastructure_objects_are_unknown() {
        for t in [
            ObjectType::Device,
            ObjectType::Schedule,
            ObjectType::TrendLog,
            ObjectType::Proprietary(700),
        ] {
            let c = classify_point(t);
            assert_eq!(c.kind, PointKind::Unknown);
            assert_eq!(c.direction, PointDirection::Unknown);
            assert!(!c.cov_supported);
        }
    }
}
