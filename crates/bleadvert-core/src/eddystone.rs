//! Eddystone-URL frame decoding.
//!
//! Beacons advertise their content URL as Eddystone service data:
//!
//! ```text
//! [0x10][tx power][scheme][encoded url ...]
//! ```
//!
//! The scheme byte selects a prefix and bytes `0x00..=0x0D` in the body expand
//! to common top level domains.

use uuid::Uuid;

/// 16-bit Eddystone service UUID `0xFEAA` in its 128-bit Bluetooth base form.
pub const EDDYSTONE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_feaa_0000_1000_8000_0080_5f9b_34fb);

/// Frame type byte of an Eddystone-URL frame.
pub const URL_FRAME_TYPE: u8 = 0x10;

const SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

const EXPANSIONS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu",
    ".net", ".info", ".biz", ".gov",
];

/// Decode an Eddystone-URL frame. Returns `None` for other frame types or
/// truncated frames. An unknown scheme byte decodes with no prefix.
#[must_use]
pub fn parse_eddystone_url(service_data: &[u8]) -> Option<String> {
    let (&frame_type, rest) = service_data.split_first()?;
    if frame_type != URL_FRAME_TYPE {
        return None;
    }
    // rest[0] is the calibrated tx power
    let (&scheme, body) = rest.get(1..)?.split_first()?;

    let mut url = String::from(SCHEMES.get(usize::from(scheme)).copied().unwrap_or(""));
    for &byte in body {
        match EXPANSIONS.get(usize::from(byte)) {
            Some(expansion) => url.push_str(expansion),
            None => url.push(char::from(byte)),
        }
    }
    Some(url)
}
