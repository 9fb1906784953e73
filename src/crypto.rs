/*!
Crypto things
*/
use std::net::{IpAddr, SocketAddr};

/// Keyed one-way hash of caller network addresses.
///
/// Addresses are HMAC-SHA256 signed with a server secret and hex
/// encoded (64 chars), so the stored value can be compared for
/// equality but can't be brute forced back out of the small IPv4
/// space without the key.
#[derive(Clone)]
pub struct IpHasher {
    key: ring::hmac::Key,
}

impl IpHasher {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret),
        }
    }

    pub fn hash(&self, addr: &str) -> String {
        let normalized = normalize_addr(addr);
        let tag = ring::hmac::sign(&self.key, normalized.as_bytes());
        hex::encode(tag.as_ref())
    }
}

impl std::fmt::Debug for IpHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IpHasher { .. }")
    }
}

/// Reduce an address to its host so the same origin always hashes
/// the same, whether or not a port came along with it.
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return sock.ip().to_string();
    }
    if let Ok(ip) = addr.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return ip.to_string();
    }
    addr.to_lowercase()
}
