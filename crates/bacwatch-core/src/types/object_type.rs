use core::fmt;

/// BACnet object type (the "category" half of an object identifier).
///
/// Standard types are named variants; vendor-specific types use
/// [`Proprietary`](Self::Proprietary). Display and parsing use the
/// kebab-case names from the BACnet standard, e.g. `analog-value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Calendar,
    Command,
    Device,
    EventEnrollment,
    File,
    Group,
    Loop,
    MultiStateInput,
    MultiStateOutput,
    NotificationClass,
    Program,
    Schedule,
    Averaging,
    MultiStateValue,
    TrendLog,
    LifeSafetyPoint,
    LifeSafetyZone,
    Accumulator,
    PulseConverter,
    EventLog,
    GlobalGroup,
    TrendLogMultiple,
    StructuredView,
    AccessDoor,
    Proprietary(u16),
}

const PROPRIETARY_PREFIX: &str = "proprietary-";

const NAMED: &[ObjectType] = &[
    ObjectType::AnalogInput,
    ObjectType::AnalogOutput,
    ObjectType::AnalogValue,
    ObjectType::BinaryInput,
    ObjectType::BinaryOutput,
    ObjectType::BinaryValue,
    ObjectType::Calendar,
    ObjectType::Command,
    ObjectType::Device,
    ObjectType::EventEnrollment,
    ObjectType::File,
    ObjectType::Group,
    ObjectType::Loop,
    ObjectType::MultiStateInput,
    ObjectType::MultiStateOutput,
    ObjectType::NotificationClass,
    ObjectType::Program,
    ObjectType::Schedule,
    ObjectType::Averaging,
    ObjectType::MultiStateValue,
    ObjectType::TrendLog,
    ObjectType::LifeSafetyPoint,
    ObjectType::LifeSafetyZone,
    ObjectType::Accumulator,
    ObjectType::PulseConverter,
    ObjectType::EventLog,
    ObjectType::GlobalGroup,
    ObjectType::TrendLogMultiple,
    ObjectType::StructuredView,
    ObjectType::AccessDoor,
];

impl ObjectType {
    /// Numeric BACnet identifier of this type.
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Calendar => 6,
            Self::Command => 7,
            Self::Device => 8,
            Self::EventEnrollment => 9,
            Self::File => 10,
            Self::Group => 11,
            Self::Loop => 12,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::NotificationClass => 15,
            Self::Program => 16,
            Self::Schedule => 17,
            Self::Averaging => 18,
            Self::MultiStateValue => 19,
            Self::TrendLog => 20,
            Self::LifeSafetyPoint => 21,
            Self::LifeSafetyZone => 22,
            Self::Accumulator => 23,
            Self::PulseConverter => 24,
            Self::EventLog => 25,
            Self::GlobalGroup => 26,
            Self::TrendLogMultiple => 27,
            Self::StructuredView => 29,
            Self::AccessDoor => 30,
            Self::Proprietary(v) => v,
        }
    }

    /// Maps a numeric identifier back to a type; unknown values become
    /// [`Proprietary`](Self::Proprietary).
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            6 => Self::Calendar,
            7 => Self::Command,
            8 => Self::Device,
            9 => Self::EventEnrollment,
            10 => Self::File,
            11 => Self::Group,
            12 => Self::Loop,
            13 => Self::MultiStateInput,
            14 => Self::MultiStateOutput,
            15 => Self::NotificationClass,
            16 => Self::Program,
            17 => Self::Schedule,
            18 => Self::Averaging,
            19 => Self::MultiStateValue,
            20 => Self::TrendLog,
            21 => Self::LifeSafetyPoint,
            22 => Self::LifeSafetyZone,
            23 => Self::Accumulator,
            24 => Self::PulseConverter,
            25 => Self::EventLog,
            26 => Self::GlobalGroup,
            27 => Self::TrendLogMultiple,
            29 => Self::StructuredView,
            30 => Self::AccessDoor,
            v => Self::Proprietary(v),
        }
    }

    /// Standard kebab-case name, or `None` for proprietary types.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::AnalogInput => "analog-input",
            Self::AnalogOutput => "analog-output",
            Self::AnalogValue => "analog-value",
            Self::BinaryInput => "binary-input",
            Self::BinaryOutput => "binary-output",
            Self::BinaryValue => "binary-value",
            Self::Calendar => "calendar",
            Self::Command => "command",
            Self::Device => "device",
            Self::EventEnrollment => "event-enrollment",
            Self::File => "file",
            Self::Group => "group",
            Self::Loop => "loop",
            Self::MultiStateInput => "multi-state-input",
            Self::MultiStateOutput => "multi-state-output",
            Self::NotificationClass => "notification-class",
            Self::Program => "program",
            Self::Schedule => "schedule",
            Self::Averaging => "averaging",
            Self::MultiStateValue => "multi-state-value",
            Self::TrendLog => "trend-log",
            Self::LifeSafetyPoint => "life-safety-point",
            Self::LifeSafetyZone => "life-safety-zone",
            Self::Accumulator => "accumulator",
            Self::PulseConverter => "pulse-converter",
            Self::EventLog => "event-log",
            Self::GlobalGroup => "global-group",
            Self::TrendLogMultiple => "trend-log-multiple",
            Self::StructuredView => "structured-view",
            Self::AccessDoor => "access-door",
            Self::Proprietary(_) => return None,
        })
    }

    /// Parses a standard name (`analog-value`), the `proprietary-<code>`
    /// form that [`Display`](fmt::Display) emits, or a bare numeric type code.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let code_text = name
            .get(..PROPRIETARY_PREFIX.len())
            .filter(|p| p.eq_ignore_ascii_case(PROPRIETARY_PREFIX))
            .map_or(name, |_| &name[PROPRIETARY_PREFIX.len()..]);
        if let Ok(code) = code_text.parse::<u16>() {
            return (code <= 0x03FF).then(|| Self::from_u16(code));
        }
        NAMED
            .iter()
            .copied()
            .find(|t| t.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{PROPRIETARY_PREFIX}{}", self.to_u16()),
        }
    }
}
