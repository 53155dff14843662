use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Compact identity of a normalized URL
///
/// The first eight bytes of the SHA-256 digest of the normalized URL string.
/// Collisions are possible in principle but vanishingly rare at crawl scale;
/// the durable `seen_urls` check uses the same value, so the two layers agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hex form stored in the database
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Fingerprints an already-normalized URL
pub fn fingerprint(url: &Url) -> Fingerprint {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Fingerprint(u64::from_be_bytes(bytes))
}
