//! Address parsing and canonical binary form.
//!
//! Every component that keys state by address — the ledger, the prefix
//! index, the persistent lists — uses the same canonical string (from
//! `IpAddr::to_string()`) as the map key, and the same binary form (4
//! octets for v4, 16 for v6) for the trie walk. Parsing happens once at
//! the edge; nothing downstream re-parses a string it was handed.

use std::net::IpAddr;

/// Parse a textual address, rejecting anything that isn't a valid v4 or
/// v6 form. Accepts bracketed/unbracketed v6 and strips a trailing zone
/// id if present (`fe80::1%eth0`), since some adapters hand us transport
/// strings rather than bare addresses.
pub fn parse_address(text: &str) -> Option<IpAddr> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_brackets = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(trimmed);
    let without_zone = without_brackets.split('%').next().unwrap_or(without_brackets);
    without_zone.parse::<IpAddr>().ok()
}

/// Strip a trailing `:port` from a `host:port` or `[v6]:port` string,
/// then parse what remains as an address. Several adapters receive a
/// transport remote address in this shape.
pub fn parse_socket_host(text: &str) -> Option<IpAddr> {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            return parse_address(&stripped[..end]);
        }
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            parse_address(host)
        }
        _ => parse_address(trimmed),
    }
}

/// Canonical string key used by the ledger and persistent lists.
pub fn canonical(addr: &IpAddr) -> String {
    addr.to_string()
}

/// Canonical binary form used by the prefix index: 4 bytes for v4, 16 for
/// v6.
pub fn to_octets(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
