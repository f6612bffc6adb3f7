// SPDX-License-Identifier: MIT OR Apache-2.0
//! The typed, length-prefixed hasher.

use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::Path;

/// A sha1 hasher with typed, length-prefixed writes.
///
/// Every value is written as its byte length followed by the bytes, with a
/// kind prefix (`str:`, `bool:`, `int:`) baked into the bytes, so adjacent
/// values can never be confused for one another.
#[derive(Default)]
pub struct Hasher {
    inner: Sha1,
}

impl Hasher {
    /// A fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated hash.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.inner.finalize().to_vec()
    }

    /// Hash raw bytes, length-prefixed.
    pub fn hash_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(bytes.len().to_string().as_bytes());
        self.inner.update(bytes);
    }

    /// Hash a string.
    pub fn hash_string(&mut self, s: &str) {
        self.hash_bytes(format!("str:{s}").as_bytes());
    }

    /// Hash a boolean.
    pub fn hash_bool(&mut self, v: bool) {
        self.hash_bytes(format!("bool:{v}").as_bytes());
    }

    /// Hash an integer.
    pub fn hash_int(&mut self, v: i64) {
        self.hash_bytes(format!("int:{v}").as_bytes());
    }

    /// Hash a JSON-serializable value.
    pub fn hash_json<T: serde::Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        self.hash_bytes(&bytes);
        Ok(())
    }

    /// Hash a file: its name, size, and content.
    pub fn hash_file(&mut self, name: &str, path: &Path) -> std::io::Result<()> {
        let meta = std::fs::metadata(path)?;
        self.hash_string(&format!("name: {name};"));
        self.hash_string(&format!("size: {};", meta.len()));

        let mut file = std::fs::File::open(path)?;
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.inner.update(&buf[..n]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(f: impl FnOnce(&mut Hasher)) -> Vec<u8> {
        let mut h = Hasher::new();
        f(&mut h);
        h.finish()
    }

    #[test]
    fn is_deterministic() {
        let a = digest(|h| {
            h.hash_string("x");
            h.hash_bool(true);
            h.hash_int(7);
        });
        let b = digest(|h| {
            h.hash_string("x");
            h.hash_bool(true);
            h.hash_int(7);
        });
        assert_eq!(a, b);
    }

    #[test]
    fn values_do_not_collide_across_kinds() {
        assert_ne!(digest(|h| h.hash_string("true")), digest(|h| h.hash_bool(true)));
        assert_ne!(digest(|h| h.hash_string("7")), digest(|h| h.hash_int(7)));
    }

    #[test]
    fn length_prefix_prevents_concatenation_collisions() {
        let a = digest(|h| {
            h.hash_string("ab");
            h.hash_string("c");
        });
        let b = digest(|h| {
            h.hash_string("a");
            h.hash_string("bc");
        });
        assert_ne!(a, b);
    }

    #[test]
    fn file_hash_covers_name_size_and_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f");
        std::fs::write(&path, "content").expect("write");

        let base = digest(|h| h.hash_file("f", &path).expect("hash file"));
        let renamed = digest(|h| h.hash_file("g", &path).expect("hash file"));
        assert_ne!(base, renamed);

        std::fs::write(&path, "contenT").expect("write");
        let changed = digest(|h| h.hash_file("f", &path).expect("hash file"));
        assert_ne!(base, changed);
    }
}
