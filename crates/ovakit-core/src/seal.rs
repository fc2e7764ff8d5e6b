//! SHA-256 digests and OVF manifest files.
//!
//! Manifest lines use the form `SHA256(<entry-name>)= <hex-digest>`, one per
//! sealed file, newline-terminated. Appliance importers compare these lines
//! byte for byte, so the format must not drift.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Error, Result};
use crate::properties::{file_name, file_stem};

/// Manifest file extension.
pub const MANIFEST_EXTENSION: &str = "mf";

/// Read buffer used while digesting files.
pub const DIGEST_BUFFER_SIZE: usize = 1024 * 1024;

/// Compute the lowercase hex SHA-256 of a byte slice.
pub fn compute_sha256(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Stream a file through SHA-256 using fixed-size reads.
pub fn digest_file(path: &Path) -> Result<String> {
    digest_file_with_progress(path, |_| {})
}

/// Like [`digest_file`], calling `on_read` with the byte count of each read.
pub fn digest_file_with_progress(path: &Path, mut on_read: impl FnMut(u64)) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(e, path)),
        };
        hasher.update(&buf[..n]);
        on_read(n as u64);
    }

    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A writer that hashes everything passing through it.
pub struct Sha256Writer<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> Sha256Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    /// Consume the writer, returning the inner writer, hex digest, and byte count.
    pub fn finish(self) -> (W, String, u64) {
        let hash = to_hex(&self.hasher.finalize());
        (self.inner, hash, self.bytes_written)
    }
}

impl<W: Write> Write for Sha256Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Digest algorithms understood in manifest lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub algorithm: DigestAlgorithm,
    pub digest: String,
}

/// Ordered list of sealed archive entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a SHA-256 entry.
    pub fn push(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.entries.push(ManifestEntry {
            name: name.into(),
            algorithm: DigestAlgorithm::Sha256,
            digest: digest.into(),
        });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Digest recorded for an entry name.
    pub fn digest_for(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.digest.as_str())
    }

    /// Parse manifest text produced by [`Manifest::to_text`] or compatible tools.
    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let bad = || Error::seal(format!("malformed manifest line {}: '{}'", lineno + 1, line));

            let rest = line.strip_prefix("SHA256(").ok_or_else(bad)?;
            let (name, digest) = rest.rsplit_once(")= ").ok_or_else(bad)?;
            if name.is_empty()
                || digest.len() != 64
                || !digest.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(bad());
            }
            manifest.push(name, digest.to_ascii_lowercase());
        }
        Ok(manifest)
    }

    /// Render the manifest in its on-disk form.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}({})= {}", entry.algorithm, entry.name, entry.digest)?;
        }
        Ok(())
    }
}

/// Manifest file name for a disk image: its stem plus `.mf`.
pub fn manifest_file_name(image_path: &Path) -> Result<String> {
    Ok(format!("{}.{}", file_stem(image_path)?, MANIFEST_EXTENSION))
}

/// Digest the rendered descriptor and the disk image and write the manifest.
///
/// Entries are keyed by plain file name, descriptor first. The manifest file
/// itself is never digested.
pub fn seal(
    descriptor_path: &Path,
    image_path: &Path,
    manifest_path: &Path,
    mut on_read: impl FnMut(u64),
) -> Result<Manifest> {
    let mut manifest = Manifest::new();

    let descriptor_digest = digest_file(descriptor_path)?;
    let descriptor_name = file_name(descriptor_path)?;
    info!(entry = %descriptor_name, digest = %descriptor_digest, "sealed descriptor");
    manifest.push(descriptor_name, descriptor_digest);

    let image_digest = digest_file_with_progress(image_path, &mut on_read)?;
    let image_name = file_name(image_path)?;
    info!(entry = %image_name, digest = %image_digest, "sealed disk image");
    manifest.push(image_name, image_digest);

    fs::write(manifest_path, manifest.to_text()).map_err(|e| Error::io(e, manifest_path))?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_computation() {
        assert_eq!(compute_sha256(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_sha256_writer_incremental() {
        let mut writer = Sha256Writer::new(Vec::new());
        writer.write_all(b"hello").unwrap();
        writer.write_all(b" ").unwrap();
        writer.write_all(b"world").unwrap();

        let (inner, hash, bytes) = writer.finish();
        assert_eq!(hash, HELLO_WORLD);
        assert_eq!(bytes, 11);
        assert_eq!(inner.len(), 11);
    }

    #[test]
    fn test_digest_file_spans_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let data: Vec<u8> = (0u8..=255).cycle().take(DIGEST_BUFFER_SIZE * 2 + 17).collect();
        fs::write(&path, &data).unwrap();

        let mut seen = 0u64;
        let digest = digest_file_with_progress(&path, |n| seen += n).unwrap();
        assert_eq!(digest, compute_sha256(&data));
        assert_eq!(seen, data.len() as u64);
    }

    #[test]
    fn test_digest_missing_file() {
        let err = digest_file(Path::new("/nonexistent/disk.img")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/disk.img"));
    }

    #[test]
    fn test_manifest_format() {
        let mut manifest = Manifest::new();
        manifest.push("rootfs.ovf", "ab".repeat(32));
        manifest.push("rootfs.vmdk", "cd".repeat(32));

        assert_eq!(
            manifest.to_text(),
            format!(
                "SHA256(rootfs.ovf)= {}\nSHA256(rootfs.vmdk)= {}\n",
                "ab".repeat(32),
                "cd".repeat(32)
            )
        );
    }

    #[test]
    fn test_manifest_parse() {
        let text = format!("SHA256(a.ovf)= {}\n\nSHA256(b (1).vmdk)= {}\n", HELLO_WORLD, HELLO_WORLD);
        let manifest = Manifest::parse(&text).unwrap();
        assert_eq!(manifest.entries().len(), 2);
        assert_eq!(manifest.digest_for("b (1).vmdk"), Some(HELLO_WORLD));
        assert_eq!(manifest.digest_for("c.mf"), None);
    }

    #[test]
    fn test_manifest_parse_rejects_garbage() {
        assert!(Manifest::parse("SHA1(a.ovf)= 00").is_err());
        assert!(Manifest::parse("SHA256(a.ovf) = abc").is_err());
        assert!(Manifest::parse(&format!("SHA256()= {}", HELLO_WORLD)).is_err());
    }

    #[test]
    fn test_seal_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let ovf = dir.path().join("rootfs.ovf");
        let img = dir.path().join("rootfs.vmdk");
        let mf = dir.path().join("rootfs.mf");
        fs::write(&ovf, b"<Envelope/>").unwrap();
        fs::write(&img, b"hello world").unwrap();

        let manifest = seal(&ovf, &img, &mf, |_| {}).unwrap();

        let names: Vec<_> = manifest.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["rootfs.ovf", "rootfs.vmdk"]);
        assert_eq!(manifest.digest_for("rootfs.vmdk"), Some(HELLO_WORLD));

        let written = fs::read_to_string(&mf).unwrap();
        assert_eq!(written, manifest.to_text());
        assert!(!written.contains("rootfs.mf"));
    }

    #[test]
    fn test_manifest_file_name() {
        assert_eq!(manifest_file_name(Path::new("/out/rootfs.vmdk")).unwrap(), "rootfs.mf");
    }
}
