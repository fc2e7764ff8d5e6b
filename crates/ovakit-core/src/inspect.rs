//! Disk image introspection.
//!
//! Reads container-format metadata (allocated size, virtual capacity) from a
//! disk image without looking at guest filesystem contents. The default
//! implementation shells out to `qemu-img info --output json`; anything that
//! implements [`ImageInspector`] can stand in for it.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default name of the image introspection binary.
pub const DEFAULT_QEMU_IMG: &str = "qemu-img";

/// Size information reported for a disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Bytes actually allocated on disk.
    pub actual_size: u64,
    /// Capacity of the disk as seen by the guest, in bytes.
    pub virtual_size: u64,
}

/// Source of disk image metadata.
pub trait ImageInspector {
    /// Inspect the image at `path`.
    fn inspect(&self, path: &Path) -> Result<ImageMetadata>;
}

/// Inspector backed by `qemu-img info`.
#[derive(Debug, Clone)]
pub struct QemuImgInspector {
    program: PathBuf,
}

impl QemuImgInspector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for QemuImgInspector {
    fn default() -> Self {
        Self::new(DEFAULT_QEMU_IMG)
    }
}

impl ImageInspector for QemuImgInspector {
    fn inspect(&self, path: &Path) -> Result<ImageMetadata> {
        debug!(program = %self.program.display(), path = %path.display(), "running image introspection");

        let output = Command::new(&self.program)
            .arg("info")
            .arg("--output")
            .arg("json")
            .arg(path)
            .output()
            .map_err(|e| {
                Error::inspect(
                    path,
                    format!("failed to run '{}': {}", self.program.display(), e),
                    "",
                )
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Error::inspect(
                path,
                format!("'{}' exited with {}", self.program.display(), output.status),
                format!("{}{}", stdout, stderr),
            ));
        }

        let metadata = parse_image_info(&stdout)
            .map_err(|message| Error::inspect(path, message, format!("{}{}", stdout, stderr)))?;

        info!(
            path = %path.display(),
            actual_size = metadata.actual_size,
            virtual_size = metadata.virtual_size,
            "inspected disk image"
        );
        Ok(metadata)
    }
}

#[derive(Deserialize)]
struct ImageInfo {
    #[serde(rename = "actual-size")]
    actual_size: u64,
    #[serde(rename = "format-specific")]
    format_specific: Option<FormatSpecific>,
}

#[derive(Deserialize)]
struct FormatSpecific {
    data: FormatData,
}

#[derive(Deserialize)]
struct FormatData {
    #[serde(default)]
    extents: Vec<ExtentInfo>,
}

#[derive(Deserialize)]
struct ExtentInfo {
    #[serde(rename = "virtual-size")]
    virtual_size: u64,
}

/// Parse the JSON document printed by `qemu-img info --output json`.
///
/// The virtual size is taken from the first extent listed under
/// `format-specific.data.extents`.
pub fn parse_image_info(json: &str) -> std::result::Result<ImageMetadata, String> {
    let info: ImageInfo =
        serde_json::from_str(json).map_err(|e| format!("unparsable introspection output: {}", e))?;

    let extent = info
        .format_specific
        .and_then(|fs| fs.data.extents.into_iter().next())
        .ok_or_else(|| "introspection output lists no storage extents".to_string())?;

    Ok(ImageMetadata {
        actual_size: info.actual_size,
        virtual_size: extent.virtual_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VMDK_INFO: &str = r#"{
        "virtual-size": 2147483648,
        "filename": "rootfs.vmdk",
        "cluster-size": 65536,
        "format": "vmdk",
        "actual-size": 412221440,
        "format-specific": {
            "type": "vmdk",
            "data": {
                "cid": 3411374592,
                "parent-cid": 4294967295,
                "create-type": "streamOptimized",
                "extents": [
                    {
                        "compressed": true,
                        "virtual-size": 2147483648,
                        "filename": "rootfs.vmdk",
                        "cluster-size": 65536,
                        "format": ""
                    }
                ]
            }
        },
        "dirty-flag": false
    }"#;

    #[test]
    fn test_parse_vmdk_info() {
        let meta = parse_image_info(VMDK_INFO).unwrap();
        assert_eq!(meta.actual_size, 412221440);
        assert_eq!(meta.virtual_size, 2147483648);
    }

    #[test]
    fn test_parse_uses_first_extent() {
        let json = r#"{
            "actual-size": 10,
            "format-specific": {"data": {"extents": [
                {"virtual-size": 4096},
                {"virtual-size": 8192}
            ]}}
        }"#;
        let meta = parse_image_info(json).unwrap();
        assert_eq!(meta.virtual_size, 4096);
    }

    #[test]
    fn test_parse_without_extents_fails() {
        let json = r#"{"actual-size": 10, "format": "raw", "virtual-size": 1024}"#;
        let err = parse_image_info(json).unwrap_err();
        assert!(err.contains("no storage extents"));

        let json = r#"{"actual-size": 10, "format-specific": {"data": {"extents": []}}}"#;
        assert!(parse_image_info(json).is_err());
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_image_info("qemu-img: error while reading").unwrap_err();
        assert!(err.contains("unparsable"));
    }

    #[test]
    fn test_missing_program_reports_path() {
        let inspector = QemuImgInspector::new("/nonexistent/qemu-img");
        let err = inspector
            .inspect(Path::new("/images/rootfs.vmdk"))
            .unwrap_err();
        match err {
            Error::Inspect { path, message, .. } => {
                assert_eq!(path, PathBuf::from("/images/rootfs.vmdk"));
                assert!(message.contains("/nonexistent/qemu-img"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_program() {
        assert_eq!(QemuImgInspector::default().program(), Path::new("qemu-img"));
    }
}
