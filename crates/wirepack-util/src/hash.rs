/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hex digest truncated to `len` characters (clamped to the full digest length).
///
/// Used for cache-busting asset names such as `logo.3f2a9c1.png`.
#[must_use]
pub fn short_hash(data: &[u8], len: usize) -> String {
    let mut hex = content_hash(data);
    hex.truncate(len.min(hex.len()));
    hex
}
