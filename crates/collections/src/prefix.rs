//! Collection prefixes
//!
//! Every collection lives under `namespace bytes ‖ identifier byte`, where the
//! namespace is the owning submodule's name. Keys are `prefix ‖ encoded key`.

use std::fmt;

/// Byte prefix of one collection
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Prefix {
    namespace: String,
    bytes: Vec<u8>,
}

impl Prefix {
    /// Prefix for collection `id` of submodule `namespace`
    pub fn new(namespace: &str, id: u8) -> Self {
        let mut bytes = Vec::with_capacity(namespace.len() + 1);
        bytes.extend_from_slice(namespace.as_bytes());
        bytes.push(id);
        Prefix {
            namespace: namespace.to_string(),
            bytes,
        }
    }

    /// Owning namespace (submodule name)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Raw prefix bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True if one prefix is a byte-prefix of the other
    pub fn overlaps(&self, other: &Prefix) -> bool {
        self.bytes.starts_with(&other.bytes) || other.bytes.starts_with(&self.bytes)
    }

    /// `prefix ‖ suffix`
    pub fn join(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.bytes.len() + suffix.len());
        key.extend_from_slice(&self.bytes);
        key.extend_from_slice(suffix);
        key
    }

    /// Strip the prefix from a full key
    pub(crate) fn strip<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        key.strip_prefix(self.bytes.as_slice())
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix(")?;
        for b in &self.bytes {
            if b.is_ascii_graphic() {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_layout() {
        let p = Prefix::new("tx", 3);
        assert_eq!(p.as_bytes(), &[b't', b'x', 3]);
        assert_eq!(p.join(b"k"), vec![b't', b'x', 3, b'k']);
    }

    #[test]
    fn test_overlap_detection() {
        let a = Prefix::new("tx", 1);
        let b = Prefix::new("tx", 2);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a.clone()));

        // namespace "tx" with id b'a' equals namespace "txa" with nothing more
        let c = Prefix::new("tx", b'a');
        let d = Prefix::new("txa", 0);
        assert!(c.overlaps(&d));
    }

    #[test]
    fn test_debug_escapes_binary() {
        assert_eq!(format!("{:?}", Prefix::new("nft", 0)), "Prefix(nft\\x00)");
    }
}
