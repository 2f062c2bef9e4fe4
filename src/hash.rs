use sha2::{Digest, Sha256};

/// Hash of the declared format plus payload bytes.
pub fn fingerprint(format: &str, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format.as_bytes());
    hasher.update([0u8]);
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// CRLF and lone CR become LF so the same text copied from different
/// platforms fingerprints identically.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn text_fingerprint(text: &str) -> String {
    fingerprint("text", normalize_text(text).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(fingerprint("text", b"hello"), fingerprint("text", b"hello"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let h = fingerprint("text", b"hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_depends_on_format() {
        assert_ne!(fingerprint("text", b"abc"), fingerprint("image", b"abc"));
    }

    #[test]
    fn test_text_fingerprint_ignores_line_endings() {
        assert_eq!(text_fingerprint("a\r\nb"), text_fingerprint("a\nb"));
        assert_ne!(text_fingerprint("a b"), text_fingerprint("a\nb"));
    }
}
