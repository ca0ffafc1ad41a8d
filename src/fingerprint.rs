//! Content fingerprinting.
//!
//! A fingerprint is an opaque value supporting equality only -- the
//! scanner never inspects it beyond `==`. `FingerprintSource` is the seam:
//! any implementation (content hash, mtime+size, a real crypto digest)
//! can be swapped in behind it. `SeahashFingerprint` is the one concrete
//! implementation this crate ships: a fast non-cryptographic hash used
//! purely for content identity, not as a cryptographic digest.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use seahash::SeaHasher;
use std::hash::Hasher;

/// An opaque content identifier. Two equal fingerprints imply two files
/// had equal content at sample time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl From<u64> for Fingerprint {
    fn from(v: u64) -> Self {
        Fingerprint(v)
    }
}

/// Mapping from a relative path to its fingerprint at one scan instant.
pub type Snapshot = std::collections::HashMap<std::path::PathBuf, Fingerprint>;

/// Computes a `Fingerprint` for a file's current contents.
pub trait FingerprintSource {
    /// Read and hash the file at `path`. Propagates I/O errors verbatim;
    /// callers decide how to treat a file that vanished mid-scan.
    fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint>;
}

/// Default fingerprint provider: a `seahash` of the whole file's bytes,
/// read in fixed-size chunks so multi-gigabyte files don't need to be
/// buffered in memory at once.
#[derive(Default, Clone, Copy)]
pub struct SeahashFingerprint;

const READ_CHUNK: usize = 64 * 1024;

impl FingerprintSource for SeahashFingerprint {
    fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint> {
        let mut file = File::open(path)?;
        let mut hasher = SeaHasher::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.write(&buf[..n]);
        }
        Ok(Fingerprint(hasher.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn equal_content_yields_equal_fingerprint() {
        let dir = tempdir::TempDir::new("fingerprint").unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let source = SeahashFingerprint;
        assert_eq!(
            source.fingerprint(&a).unwrap(),
            source.fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn different_content_yields_different_fingerprint() {
        let dir = tempdir::TempDir::new("fingerprint").unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, b"hello").unwrap();
        let source = SeahashFingerprint;
        let fp1 = source.fingerprint(&a).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&a).unwrap();
        f.write_all(b"!").unwrap();
        let fp2 = source.fingerprint(&a).unwrap();

        assert_ne!(fp1, fp2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = SeahashFingerprint;
        assert!(source.fingerprint(Path::new("/no/such/file")).is_err());
    }
}
