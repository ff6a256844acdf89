//! Content hashing for stored objects.
//!
//! The storage driver computes an MD5 digest of every object's original
//! bytes while writing them (`hash_id`), and the path generator mixes MD5
//! output into generated object paths. Both uses share the same
//! `ContentHash` value type, modeled on the teacher crate's `ObjectHash`
//! but narrowed to the single algorithm this domain needs.

use std::{fmt::Display, io, str::FromStr};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// An MD5 content digest, always 16 bytes / 32 hex characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub const ZERO: ContentHash = ContentHash([0u8; 16]);

    /// Hash a byte slice in one shot.
    pub fn of(data: &[u8]) -> ContentHash {
        let digest = Md5::digest(data);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(digest.as_slice());
        ContentHash(bytes)
    }

    /// Hash the full contents of a reader, consuming it.
    pub fn of_reader(mut r: impl io::Read) -> io::Result<ContentHash> {
        let mut hasher = Md5::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(digest.as_slice());
        Ok(ContentHash(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// The n-th hex character (1-indexed), used by `{{md5:N}}` path
    /// template replacers.
    pub fn hex_char_at(self, n: usize) -> Option<char> {
        self.to_hex().chars().nth(n.checked_sub(1)?)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(format!("invalid content hash length: {}", s.len()));
        }
        let decoded = hex::decode(s).map_err(|e| e.to_string())?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&decoded);
        Ok(ContentHash(bytes))
    }
}

/// A streaming hashing `Write` sink used while piping bytes to a driver so
/// the digest is available without a second read pass.
pub struct HashingWriter<W> {
    pub inner: W,
    hasher: Md5,
}

impl<W> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn finalize(self) -> (W, ContentHash) {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(digest.as_slice());
        (self.inner, ContentHash(bytes))
    }
}

impl<W: io::Write> io::Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_value() {
        let h = ContentHash::of(b"Hello, world!");
        assert_eq!(h.to_hex(), "6cd3556deb0da54bca060b4c39479839");
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let h = ContentHash::of(b"castore");
        let parsed: ContentHash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn hex_char_at_is_one_indexed() {
        let h = ContentHash::of(b"Hello, world!");
        let hex = h.to_hex();
        assert_eq!(h.hex_char_at(1), hex.chars().next());
        assert_eq!(h.hex_char_at(0), None);
    }
}
