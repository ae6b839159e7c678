use sha2::{Digest, Sha256};

/// Sentinel previous-hash for the first entry of any chain.
pub const CHAIN_GENESIS: &str = "genesis";

/// SHA-256 over a canonical `|`-joined payload, hex-encoded.
///
/// Every tamper-evident record in the system (wallet balance fingerprints,
/// ledger entries, audit logs, settlement hashes, reconciliation snapshots)
/// uses this same canonical form so hashes are reproducible across processes.
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
