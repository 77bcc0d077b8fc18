use std::io::{self, Read};

use sha2::{Digest, Sha256};

const CONTRACT_HASH_PREFIX: &str = "sha256:";

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Streams `reader` through SHA-256, returning the hex digest and the number
/// of bytes consumed.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// `sha256:<64 hex>`, the format used to pin an external contract. The
/// digest may be in either case; the prefix is lowercase.
pub fn is_contract_hash(s: &str) -> bool {
    s.strip_prefix(CONTRACT_HASH_PREFIX)
        .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}
