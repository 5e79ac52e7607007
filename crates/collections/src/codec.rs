//! Key and value codecs
//!
//! Keys use an order-preserving binary encoding so that byte order in the
//! store matches the logical order of the key type:
//!
//! | Type | Terminal | Non-terminal |
//! |------|----------|--------------|
//! | `u32`, `u64` | big-endian | same |
//! | `i64` | big-endian with sign bit flipped | same |
//! | `String`, `Vec<u8>` | raw bytes | `u32` BE length ‖ bytes |
//! | `(A, B)` | `A` non-terminal ‖ `B` terminal | both non-terminal |
//!
//! A component is *terminal* when it is the last one in the key. Variable
//! length components are length-prefixed everywhere else so that a tuple's
//! first component can never bleed into the second during a prefix scan.
//!
//! Values are serialized with `bincode`.

use byteorder::{BigEndian, ByteOrder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ledgerview_core::{IndexerError, IndexerResult};

/// Order-preserving key encoding
pub trait KeyCodec: Sized {
    /// Append the terminal encoding of `self`
    fn encode_key(&self, buf: &mut Vec<u8>);

    /// Decode a key occupying all of `bytes`
    fn decode_key(bytes: &[u8]) -> IndexerResult<Self>;

    /// Append the self-delimiting encoding used when more components follow
    fn encode_non_terminal(&self, buf: &mut Vec<u8>) {
        self.encode_key(buf)
    }

    /// Decode a self-delimiting key, returning it and the bytes consumed
    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)>;

    /// Human-readable type name recorded in the schema
    fn type_name() -> &'static str;

    /// Terminal encoding as a fresh buffer
    fn to_key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_key(&mut buf);
        buf
    }
}

fn need(bytes: &[u8], n: usize, ty: &str) -> IndexerResult<()> {
    if bytes.len() < n {
        return Err(IndexerError::codec(format!(
            "{}: need {} bytes, have {}",
            ty,
            n,
            bytes.len()
        )));
    }
    Ok(())
}

fn exact(bytes: &[u8], n: usize, ty: &str) -> IndexerResult<()> {
    if bytes.len() != n {
        return Err(IndexerError::codec(format!(
            "{}: expected {} bytes, got {}",
            ty,
            n,
            bytes.len()
        )));
    }
    Ok(())
}

impl KeyCodec for u64 {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        let mut b = [0u8; 8];
        BigEndian::write_u64(&mut b, *self);
        buf.extend_from_slice(&b);
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        exact(bytes, 8, "u64")?;
        Ok(BigEndian::read_u64(bytes))
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        need(bytes, 8, "u64")?;
        Ok((BigEndian::read_u64(&bytes[..8]), 8))
    }

    fn type_name() -> &'static str {
        "u64"
    }
}

impl KeyCodec for u32 {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, *self);
        buf.extend_from_slice(&b);
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        exact(bytes, 4, "u32")?;
        Ok(BigEndian::read_u32(bytes))
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        need(bytes, 4, "u32")?;
        Ok((BigEndian::read_u32(&bytes[..4]), 4))
    }

    fn type_name() -> &'static str {
        "u32"
    }
}

const SIGN_BIT: u64 = 1 << 63;

impl KeyCodec for i64 {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        ((*self as u64) ^ SIGN_BIT).encode_key(buf)
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        Ok((u64::decode_key(bytes)? ^ SIGN_BIT) as i64)
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        let (raw, n) = u64::decode_non_terminal(bytes)?;
        Ok(((raw ^ SIGN_BIT) as i64, n))
    }

    fn type_name() -> &'static str {
        "i64"
    }
}

fn write_len_prefixed(bytes: &[u8], buf: &mut Vec<u8>) {
    let mut len = [0u8; 4];
    BigEndian::write_u32(&mut len, bytes.len() as u32);
    buf.extend_from_slice(&len);
    buf.extend_from_slice(bytes);
}

fn read_len_prefixed<'a>(bytes: &'a [u8], ty: &str) -> IndexerResult<(&'a [u8], usize)> {
    need(bytes, 4, ty)?;
    let len = BigEndian::read_u32(&bytes[..4]) as usize;
    need(&bytes[4..], len, ty)?;
    Ok((&bytes[4..4 + len], 4 + len))
}

impl KeyCodec for Vec<u8> {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        Ok(bytes.to_vec())
    }

    fn encode_non_terminal(&self, buf: &mut Vec<u8>) {
        write_len_prefixed(self, buf);
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        let (raw, n) = read_len_prefixed(bytes, "bytes")?;
        Ok((raw.to_vec(), n))
    }

    fn type_name() -> &'static str {
        "bytes"
    }
}

impl KeyCodec for String {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| IndexerError::codec(format!("string: {}", e)))
    }

    fn encode_non_terminal(&self, buf: &mut Vec<u8>) {
        write_len_prefixed(self.as_bytes(), buf);
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        let (raw, n) = read_len_prefixed(bytes, "string")?;
        let s = std::str::from_utf8(raw)
            .map_err(|e| IndexerError::codec(format!("string: {}", e)))?;
        Ok((s.to_string(), n))
    }

    fn type_name() -> &'static str {
        "string"
    }
}

impl<A: KeyCodec, B: KeyCodec> KeyCodec for (A, B) {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        self.0.encode_non_terminal(buf);
        self.1.encode_key(buf);
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        let (a, n) = A::decode_non_terminal(bytes)?;
        let b = B::decode_key(&bytes[n..])?;
        Ok((a, b))
    }

    fn encode_non_terminal(&self, buf: &mut Vec<u8>) {
        self.0.encode_non_terminal(buf);
        self.1.encode_non_terminal(buf);
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        let (a, n1) = A::decode_non_terminal(bytes)?;
        let (b, n2) = B::decode_non_terminal(&bytes[n1..])?;
        Ok(((a, b), n1 + n2))
    }

    fn type_name() -> &'static str {
        "pair"
    }
}

impl<A: KeyCodec, B: KeyCodec, C: KeyCodec> KeyCodec for (A, B, C) {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        self.0.encode_non_terminal(buf);
        self.1.encode_non_terminal(buf);
        self.2.encode_key(buf);
    }

    fn decode_key(bytes: &[u8]) -> IndexerResult<Self> {
        let (a, n1) = A::decode_non_terminal(bytes)?;
        let (b, n2) = B::decode_non_terminal(&bytes[n1..])?;
        let c = C::decode_key(&bytes[n1 + n2..])?;
        Ok((a, b, c))
    }

    fn encode_non_terminal(&self, buf: &mut Vec<u8>) {
        self.0.encode_non_terminal(buf);
        self.1.encode_non_terminal(buf);
        self.2.encode_non_terminal(buf);
    }

    fn decode_non_terminal(bytes: &[u8]) -> IndexerResult<(Self, usize)> {
        let (a, n1) = A::decode_non_terminal(bytes)?;
        let (b, n2) = B::decode_non_terminal(&bytes[n1..])?;
        let (c, n3) = C::decode_non_terminal(&bytes[n1 + n2..])?;
        Ok(((a, b, c), n1 + n2 + n3))
    }

    fn type_name() -> &'static str {
        "triple"
    }
}

/// Serialize a collection value
pub fn encode_value<V: Serialize>(value: &V) -> IndexerResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a collection value
pub fn decode_value<V: DeserializeOwned>(bytes: &[u8]) -> IndexerResult<V> {
    Ok(bincode::deserialize(bytes)?)
}
