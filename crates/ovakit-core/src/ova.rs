//! OVA archive creation.
//!
//! An OVA is an uncompressed tar file. Importers read it sequentially, so the
//! descriptor goes first, then the disk image, then the manifest. Headers use
//! the USTAR layout; sizes that overflow the 11-digit octal field are written
//! in GNU base-256 form.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::properties::{file_name, file_stem};
use crate::seal::{Manifest, Sha256Writer};

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "ova";

/// TAR block size.
pub const BLOCK_SIZE: usize = 512;

/// Longest name the USTAR name field can hold.
pub const MAX_NAME_LEN: usize = 100;

/// Largest size representable in the octal size field (8 GiB - 1).
const MAX_OCTAL_SIZE: u64 = 0o77777777777;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Build a USTAR header for a regular file.
///
/// Mode is 0644 with uid/gid 0. Names longer than [`MAX_NAME_LEN`] bytes are
/// rejected since archive entries never carry directory prefixes.
pub fn create_tar_header_with_mtime(name: &str, size: u64, mtime: u64) -> Result<[u8; BLOCK_SIZE]> {
    let name_bytes = name.as_bytes();
    if name_bytes.is_empty() || name_bytes.len() > MAX_NAME_LEN {
        return Err(Error::ova(format!(
            "entry name '{}' must be 1 to {} bytes",
            name, MAX_NAME_LEN
        )));
    }

    let mut header = [0u8; BLOCK_SIZE];
    header[..name_bytes.len()].copy_from_slice(name_bytes);
    write_octal(&mut header[100..108], 0o644);
    write_octal(&mut header[108..116], 0);
    write_octal(&mut header[116..124], 0);

    if size <= MAX_OCTAL_SIZE {
        write_octal(&mut header[124..136], size);
    } else {
        header[124] = 0x80;
        header[128..136].copy_from_slice(&size.to_be_bytes());
    }

    write_octal(&mut header[136..148], mtime.min(MAX_OCTAL_SIZE));
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");
    write_octal(&mut header[329..337], 0);
    write_octal(&mut header[337..345], 0);

    // Checksum is computed with its own field filled with spaces.
    header[148..156].copy_from_slice(b"        ");
    let checksum: u32 = header.iter().map(|&b| b as u32).sum();
    write_octal(&mut header[148..155], checksum as u64);
    header[155] = b' ';

    Ok(header)
}

/// Zero-padded octal followed by a NUL, filling `field`.
fn write_octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    field[..digits].copy_from_slice(&text.as_bytes()[text.len() - digits..]);
    field[digits] = 0;
}

fn padding_for(size: u64) -> usize {
    let rem = (size % BLOCK_SIZE as u64) as usize;
    if rem == 0 {
        0
    } else {
        BLOCK_SIZE - rem
    }
}

/// Writes tar entries to an underlying writer.
pub struct OvaWriter<W: Write> {
    inner: W,
    entries: Vec<String>,
}

impl<W: Write> OvaWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            entries: Vec::new(),
        }
    }

    fn start_entry(&mut self, name: &str, size: u64, mtime: u64) -> Result<()> {
        if self.entries.iter().any(|e| e == name) {
            return Err(Error::ova(format!("duplicate archive entry '{}'", name)));
        }
        let header = create_tar_header_with_mtime(name, size, mtime)?;
        self.inner.write_all(&header)?;
        self.entries.push(name.to_string());
        Ok(())
    }

    fn pad(&mut self, size: u64) -> Result<()> {
        let padding = padding_for(size);
        if padding > 0 {
            self.inner.write_all(&[0u8; BLOCK_SIZE][..padding])?;
        }
        Ok(())
    }

    /// Stream a file into the archive under its plain file name.
    ///
    /// Returns the SHA-256 of the bytes written. `on_write` receives the size
    /// of each chunk copied.
    pub fn add_file(&mut self, path: &Path, on_write: &mut dyn FnMut(u64)) -> Result<String> {
        let name = file_name(path)?;
        let mut file = File::open(path).map_err(|e| Error::io(e, path))?;
        let metadata = file.metadata().map_err(|e| Error::io(e, path))?;
        let size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.start_entry(&name, size, mtime)?;

        let mut hashing = Sha256Writer::new(&mut self.inner);
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(Error::ova(format!(
                        "'{}' shrank while being archived",
                        path.display()
                    )))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(e, path)),
            };
            hashing.write_all(&buf[..n])?;
            remaining -= n as u64;
            on_write(n as u64);
        }
        let (_, digest, written) = hashing.finish();
        debug!(entry = %name, bytes = written, "archived entry");

        self.pad(size)?;
        Ok(digest)
    }

    /// Write the end-of-archive marker and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.write_all(&[0u8; BLOCK_SIZE * 2])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Archive path for a disk image: `<stem>.ova` in the image's directory.
pub fn archive_path(image_path: &Path) -> Result<PathBuf> {
    let stem = file_stem(image_path)?;
    let dir = image_path.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("{}.{}", stem, ARCHIVE_EXTENSION)))
}

/// Bundle descriptor, disk image, and manifest into `output_path`.
///
/// Entries are stored under plain file names in that order. Each streamed
/// file is re-hashed and checked against `manifest`, so an image modified
/// after sealing fails the run.
///
/// On failure the partially written archive is deliberately left on disk so
/// it can be examined; the caller decides whether to remove it.
pub fn package(
    descriptor_path: &Path,
    image_path: &Path,
    manifest_path: &Path,
    manifest: &Manifest,
    output_path: &Path,
    on_write: &mut dyn FnMut(u64),
) -> Result<PathBuf> {
    let file = File::create(output_path).map_err(|e| Error::io(e, output_path))?;
    let mut writer = OvaWriter::new(BufWriter::new(file));

    write_entries(&mut writer, descriptor_path, image_path, manifest_path, manifest, on_write)
        .map_err(|e| attach_path(e, output_path))?;

    let buffered = writer.finish().map_err(|e| attach_path(e, output_path))?;
    let file = buffered
        .into_inner()
        .map_err(|e| Error::io(e.into_error(), output_path))?;
    file.sync_all().map_err(|e| Error::io(e, output_path))?;

    info!(path = %output_path.display(), "wrote appliance archive");
    Ok(output_path.to_path_buf())
}

fn write_entries<W: Write>(
    writer: &mut OvaWriter<W>,
    descriptor_path: &Path,
    image_path: &Path,
    manifest_path: &Path,
    manifest: &Manifest,
    on_write: &mut dyn FnMut(u64),
) -> Result<()> {
    for sealed in [descriptor_path, image_path] {
        let digest = writer.add_file(sealed, on_write)?;
        let name = file_name(sealed)?;
        match manifest.digest_for(&name) {
            Some(expected) if expected == digest => {}
            Some(_) => {
                return Err(Error::seal(format!(
                    "'{}' changed after it was sealed",
                    sealed.display()
                )))
            }
            None => return Err(Error::seal(format!("'{}' is not in the manifest", name))),
        }
    }
    writer.add_file(manifest_path, &mut |_: u64| {})?;
    Ok(())
}

/// Archive write errors carry no path of their own.
fn attach_path(err: Error, path: &Path) -> Error {
    match err {
        Error::Io { source, path: None } => Error::io(source, path),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::compute_sha256;
    use std::io::Cursor;

    #[test]
    fn test_tar_header_fields() {
        let header = create_tar_header_with_mtime("myfile.vmdk", 65536, 1700000000).unwrap();

        assert_eq!(&header[0..11], b"myfile.vmdk");
        assert_eq!(header[11], 0);
        assert_eq!(&header[100..107], b"0000644");
        assert_eq!(&header[108..115], b"0000000");
        assert_eq!(&header[116..123], b"0000000");
        assert_eq!(&header[124..135], b"00000200000");
        assert_eq!(&header[136..147], b"14524770400");
        assert_eq!(header[156], b'0');
        assert_eq!(&header[257..263], b"ustar\0");
        assert_eq!(&header[263..265], b"00");
    }

    #[test]
    fn test_tar_header_checksum() {
        let header = create_tar_header_with_mtime("a.ovf", 10, 0).unwrap();
        let stored = u32::from_str_radix(std::str::from_utf8(&header[148..154]).unwrap(), 8).unwrap();
        let mut copy = header;
        copy[148..156].copy_from_slice(b"        ");
        let sum: u32 = copy.iter().map(|&b| b as u32).sum();
        assert_eq!(stored, sum);
        assert_eq!(header[154], 0);
        assert_eq!(header[155], b' ');
    }

    #[test]
    fn test_large_size_uses_base256() {
        let size = 20 * 1024 * 1024 * 1024u64;
        let header = create_tar_header_with_mtime("big.vmdk", size, 0).unwrap();
        assert_eq!(header[124], 0x80);
        assert_eq!(&header[128..136], &size.to_be_bytes());
    }

    #[test]
    fn test_name_limits() {
        assert!(create_tar_header_with_mtime(&"a".repeat(100), 0, 0).is_ok());
        assert!(create_tar_header_with_mtime(&"a".repeat(101), 0, 0).is_err());
        assert!(create_tar_header_with_mtime("", 0, 0).is_err());
    }

    #[test]
    fn test_add_file_padding_and_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"tiny").unwrap();

        let mut writer = OvaWriter::new(Cursor::new(Vec::new()));
        writer.add_file(&path, &mut |_: u64| {}).unwrap();
        let data = writer.finish().unwrap().into_inner();

        assert_eq!(data.len(), BLOCK_SIZE * 4);
        assert_eq!(&data[..9], b"small.txt");
        assert_eq!(&data[512..516], b"tiny");
        assert!(data[516..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ovf");
        std::fs::write(&path, b"x").unwrap();

        let mut writer = OvaWriter::new(Vec::new());
        writer.add_file(&path, &mut |_: u64| {}).unwrap();
        let err = writer.add_file(&path, &mut |_: u64| {}).unwrap_err();
        assert!(err.to_string().contains("duplicate archive entry 'a.ovf'"));

        // Nothing of the rejected entry reaches the output.
        let data = writer.finish().unwrap();
        assert_eq!(data.len(), BLOCK_SIZE * 4);
    }

    #[test]
    fn test_add_file_returns_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let data: Vec<u8> = (0u8..=255).cycle().take(COPY_BUFFER_SIZE + 700).collect();
        std::fs::write(&path, &data).unwrap();

        let mut writer = OvaWriter::new(Vec::new());
        let mut written = 0u64;
        let digest = writer.add_file(&path, &mut |n: u64| written += n).unwrap();
        let out = writer.finish().unwrap();

        assert_eq!(digest, compute_sha256(&data));
        assert_eq!(written, data.len() as u64);
        assert_eq!(&out[..8], b"disk.img");
        assert_eq!(&out[512..512 + data.len()], &data[..]);
        assert_eq!(out.len() % BLOCK_SIZE, 0);
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(
            archive_path(Path::new("/build/rootfs.vmdk")).unwrap(),
            PathBuf::from("/build/rootfs.ova")
        );
        assert_eq!(archive_path(Path::new("rootfs.vmdk")).unwrap(), PathBuf::from("rootfs.ova"));
    }
}
