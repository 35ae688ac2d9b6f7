//! Printer link constants and identifier helpers.

use anyhow::Result;

/// Serial Port Profile service class, the RFCOMM service receipt printers
/// listen on.
pub const SPP_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";

/// Largest slice handed to the transport in one write.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Suffix of the Bluetooth base UUID, used to expand 16/32-bit short forms.
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Canonical lowercase, hyphenated UUID. Short 16/32-bit forms are expanded
/// against the Bluetooth base UUID. Unrecognised input is returned
/// lowercased.
pub fn normalize_uuid(uuid: &str) -> String {
    let hex: String = uuid
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return uuid.trim().to_ascii_lowercase();
    }

    match hex.len() {
        4 => format!("0000{}{}", hex, BASE_UUID_SUFFIX),
        8 => format!("{}{}", hex, BASE_UUID_SUFFIX),
        32 => format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ),
        _ => uuid.trim().to_ascii_lowercase(),
    }
}

/// Parse a `AA:BB:CC:DD:EE:FF` (or `-` separated) MAC into the 48-bit
/// integer form the platform APIs take.
pub fn parse_mac(address: &str) -> Result<u64> {
    let parts: Vec<&str> = address.trim().split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(anyhow::anyhow!("Invalid MAC address: {}", address));
    }

    let mut value = 0u64;
    for part in parts {
        if part.len() != 2 {
            return Err(anyhow::anyhow!("Invalid MAC address: {}", address));
        }
        value = (value << 8) | u64::from(u8::from_str_radix(part, 16)?);
    }
    Ok(value)
}

/// Format a 48-bit address as `AA:BB:CC:DD:EE:FF`.
pub fn format_mac(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
