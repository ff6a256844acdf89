//! Shared I/O and validation helpers used across the storage drivers,
//! engine, and facade: a counting reader wrapper, pooled byte buffers for
//! the streaming `Get` path, object-id path safety checks, and mime
//! wildcard matching against a manifest's `content_types` list.

use std::io::{self, BufRead, Read};

use crate::errors::StoreError;

/// A lightweight wrapper that counts bytes read from the underlying reader.
pub struct CountingReader<R> {
    pub inner: R,
    pub bytes_read: u64,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for CountingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_read += amt as u64;
        self.inner.consume(amt);
    }
}

/// Default chunk size for the streaming `Get` path (§5 resource model).
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

/// Reject object ids that escape their bucket: empty, `.`, `..`, absolute
/// paths, or any path segment that is `.`/`..`.
pub fn validate_object_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    if id.starts_with('/') {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    for segment in id.split('/') {
        if segment == "." || segment == ".." {
            return Err(StoreError::InvalidId(id.to_string()));
        }
    }
    Ok(())
}

/// Match a concrete content type (`image/jpeg`) against a manifest pattern
/// (`*`, `image/*`, or an exact string).
pub fn content_type_matches(pattern: &str, content_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return content_type
            .split('/')
            .next()
            .map(|p| p == prefix)
            .unwrap_or(false);
    }
    pattern == content_type
}

/// True if `content_type` matches at least one pattern in `patterns`.
pub fn content_type_allowed(patterns: &[String], content_type: &str) -> bool {
    patterns.iter().any(|p| content_type_matches(p, content_type))
}

/// Sniff a content type from a head-of-stream byte window. Falls back to
/// `application/octet-stream` when no signature matches.
pub fn sniff_content_type(head: &[u8]) -> &'static str {
    if head.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg"
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        "image/webp"
    } else if head.starts_with(b"BM") {
        "image/bmp"
    } else if head.starts_with(b"II*\x00") || head.starts_with(b"MM\x00*") {
        "image/tiff"
    } else {
        "application/octet-stream"
    }
}

/// File extension conventionally associated with a content type, used when
/// naming items on disk / in an object key.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_escapes() {
        for bad in ["", ".", "..", "/abs", "a/../b", "a/./b", "a/.", "a/.."] {
            assert!(validate_object_id(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn accepts_plain_relative_paths() {
        assert!(validate_object_id("2024/05/a/b/cafebabe").is_ok());
    }

    #[test]
    fn wildcard_matching() {
        assert!(content_type_matches("*", "image/jpeg"));
        assert!(content_type_matches("image/*", "image/png"));
        assert!(!content_type_matches("image/jpeg", "image/png"));
        assert!(content_type_matches("image/jpeg", "image/jpeg"));
    }

    #[test]
    fn sniffs_jpeg_signature() {
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
    }
}
