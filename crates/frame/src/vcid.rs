/// Well-known GOES-R series virtual channel assignments.
pub fn name(vcid: u8) -> &'static str {
    match vcid {
        0 => "Admin Text",
        1 => "Mesoscale",
        2 => "Visual",
        6 => "GOES-ABI",
        7 => "Shortwave IR",
        8 => "Mid-Level Water Vapor",
        9 => "Upper-Level Water Vapor",
        13 => "Clean Long-Wave IR",
        14 => "IR Long-Wave",
        15 => "Dirty Long-Wave IR",
        17 => "GOES18 - Clean Long-Wave IR",
        20 => "EMWIN - High Priority",
        21 => "EMWIN - Graphics",
        22 => "EMWIN - Low Priority",
        23 => "GOES-ABI",
        24 => "NHC Maritime Graphics",
        25 => "Other GOES-19 Graphics",
        26 => "INTL",
        30 => "DCS Admin",
        31 => "DCS",
        32 => "DCS (New Format)",
        60 => "Himawari",
        63 => "IDLE",
        _ => "Unknown",
    }
}

/// The VCIDs with well-known assignments, in display order.
pub const KNOWN: [u8; 23] = [
    0, 1, 2, 6, 7, 8, 9, 13, 14, 15, 17, 20, 21, 22, 23, 24, 25, 26, 30, 31, 32, 60, 63,
];
