use sha2::{Digest, Sha256};

pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Identity key for a normalized capture: a SHA-256 over every payload in
/// order, or the display string itself when there is nothing to hash.
///
/// Each payload is length-prefixed so that shifting bytes between adjacent
/// payloads cannot produce the same digest.
pub fn identity_hash<'a, I>(payloads: I, fallback: &str) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    let mut hashed_any = false;
    for payload in payloads {
        hasher.update((payload.len() as u64).to_le_bytes());
        hasher.update(payload);
        hashed_any = true;
    }
    if hashed_any {
        format!("{:x}", hasher.finalize())
    } else {
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h1 = hash_bytes(b"hello");
        let h2 = hash_bytes(b"hello");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_inputs() {
        let h1 = hash_bytes(b"hello");
        let h2 = hash_bytes(b"world");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let h = hash_bytes(b"hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_hash_deterministic() {
        let payloads1: Vec<&[u8]> = vec![b"one", b"two"];
        let payloads2: Vec<&[u8]> = vec![b"one", b"two"];
        assert_eq!(
            identity_hash(payloads1, "fb"),
            identity_hash(payloads2, "fb")
        );
    }

    #[test]
    fn test_identity_hash_order_sensitive() {
        let ab: Vec<&[u8]> = vec![b"a", b"b"];
        let ba: Vec<&[u8]> = vec![b"b", b"a"];
        assert_ne!(identity_hash(ab, "fb"), identity_hash(ba, "fb"));
    }

    #[test]
    fn test_identity_hash_boundary_sensitive() {
        // "ab" + "c" must not collide with "a" + "bc"
        let left: Vec<&[u8]> = vec![b"ab", b"c"];
        let right: Vec<&[u8]> = vec![b"a", b"bc"];
        assert_ne!(identity_hash(left, "fb"), identity_hash(right, "fb"));
    }

    #[test]
    fn test_identity_hash_fallback_on_empty() {
        let none: Vec<&[u8]> = vec![];
        assert_eq!(identity_hash(none, "display text"), "display text");
    }
}
