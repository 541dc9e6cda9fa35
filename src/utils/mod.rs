/// Utility functions and helpers
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a unique ID based on timestamp and random component
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let random: u32 = rand::random();
    format!("{}-{}-{:08x}", prefix, timestamp, random)
}

/// Stable 64-bit hash of a client or session key.
///
/// Uses the first eight bytes of the MD5 digest so the value is identical
/// across processes and restarts, unlike `std`'s randomized hasher.
pub fn stable_hash(key: &str) -> u64 {
    let digest = md5::compute(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.0[..8]);
    u64::from_be_bytes(bytes)
}

/// `host:port` socket form, with IPv6 literals wrapped in brackets
pub fn format_address(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, port),
        _ => format!("{}:{}", host, port),
    }
}

/// Format duration for human-readable output
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
