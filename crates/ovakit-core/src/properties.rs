//! Appliance properties exposed to descriptor templates.
//!
//! Properties are built once through [`AppliancePropertiesBuilder`] and are
//! immutable afterwards. Templates see them under camelCase names
//! (`${p.diskFileName}`, `${p.diskFileCapacity}`, ...).

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::inspect::ImageMetadata;

/// Guest OS type recognized by the hypervisor's appliance import.
pub const DEFAULT_OS_TYPE: &str = "debian10_64Guest";

/// CIM operating system identifier matching [`DEFAULT_OS_TYPE`].
pub const DEFAULT_OS_DEFINITION: &str = "96";

/// Attributes substituted into the descriptor template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceProperties {
    /// Plain file name of the disk image (e.g. `rootfs.vmdk`).
    pub disk_file_name: String,
    /// Full path of the disk image as given on the command line.
    pub disk_full_path: String,
    /// Bytes allocated on disk.
    pub disk_file_size: u64,
    /// Virtual capacity in bytes.
    pub disk_file_capacity: u64,
    /// Image file name without its extension.
    pub virtual_system_id: String,
    pub os_type: String,
    pub os_definition: String,
}

impl ApplianceProperties {
    pub fn builder(image_path: impl Into<PathBuf>) -> AppliancePropertiesBuilder {
        AppliancePropertiesBuilder::new(image_path)
    }
}

/// Builder collecting appliance properties stage by stage.
#[derive(Debug, Clone)]
pub struct AppliancePropertiesBuilder {
    image_path: PathBuf,
    metadata: Option<ImageMetadata>,
    os_type: String,
    os_definition: String,
}

impl AppliancePropertiesBuilder {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            metadata: None,
            os_type: DEFAULT_OS_TYPE.to_string(),
            os_definition: DEFAULT_OS_DEFINITION.to_string(),
        }
    }

    /// Record sizes reported by the image inspector.
    pub fn image_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    pub fn os_definition(mut self, os_definition: impl Into<String>) -> Self {
        self.os_definition = os_definition.into();
        self
    }

    /// Finish the property set.
    ///
    /// # Errors
    ///
    /// Fails if image metadata was never supplied, if either size is zero, or
    /// if the image path has no usable file name.
    pub fn build(self) -> Result<ApplianceProperties> {
        let metadata = self
            .metadata
            .ok_or_else(|| Error::properties("disk image metadata was not provided"))?;
        if metadata.actual_size == 0 {
            return Err(Error::properties("diskFileSize must be non-zero"));
        }
        if metadata.virtual_size == 0 {
            return Err(Error::properties("diskFileCapacity must be non-zero"));
        }
        if self.os_type.is_empty() || self.os_definition.is_empty() {
            return Err(Error::properties("osType and osDefinition must be set"));
        }

        let disk_file_name = file_name(&self.image_path)?;
        let virtual_system_id = file_stem(&self.image_path)?;

        Ok(ApplianceProperties {
            disk_file_name,
            disk_full_path: self.image_path.display().to_string(),
            disk_file_size: metadata.actual_size,
            disk_file_capacity: metadata.virtual_size,
            virtual_system_id,
            os_type: self.os_type,
            os_definition: self.os_definition,
        })
    }
}

/// Plain file name of `path`, with directory components stripped.
pub fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::properties(format!("'{}' has no file name", path.display())))
}

/// File name of `path` without its extension.
pub fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::properties(format!("'{}' has no file name", path.display())))
}
