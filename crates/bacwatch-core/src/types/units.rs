/// Standard name of a BACnet engineering-units enumeration value.
///
/// Covers the units commonly seen on HVAC and metering points; returns `None`
/// for anything not in the table.
pub fn engineering_units_name(code: u32) -> Option<&'static str> {
    Some(match code {
        3 => "amperes",
        5 => "volts",
        18 => "watt-hours",
        19 => "kilowatt-hours",
        27 => "hertz",
        29 => "percent-relative-humidity",
        47 => "watts",
        48 => "kilowatts",
        53 => "pascals",
        54 => "kilopascals",
        62 => "degrees-celsius",
        63 => "degrees-kelvin",
        64 => "degrees-fahrenheit",
        70 => "days",
        71 => "hours",
        72 => "minutes",
        73 => "seconds",
        74 => "meters-per-second",
        84 => "cubic-feet-per-minute",
        87 => "liters-per-second",
        88 => "liters-per-minute",
        95 => "no-units",
        96 => "parts-per-million",
        98 => "percent",
        _ => return None,
    })
}
