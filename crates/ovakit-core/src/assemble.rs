//! Appliance assembly orchestrator.
//!
//! Runs the assembly pipeline for one disk image:
//! 1. Inspect the image for its allocated size and virtual capacity
//! 2. Render the descriptor template with the resulting properties
//! 3. Seal descriptor and image into a SHA-256 manifest
//! 4. Package descriptor, image, and manifest into `<image-stem>.ova`
//!
//! Descriptor and manifest are staged in a private temporary directory that is
//! removed when the run ends, whether it succeeded or not. The final archive is
//! written next to the source image.
//!
//! # Example
//!
//! ```no_run
//! use ovakit_core::assemble::{assemble_appliance, AssembleOptions};
//! use ovakit_core::inspect::QemuImgInspector;
//! use std::path::Path;
//!
//! let report = assemble_appliance(
//!     Path::new("/build/rootfs.vmdk"),
//!     Path::new("/templates/vmware.ovf.template"),
//!     &AssembleOptions::default(),
//!     &QemuImgInspector::default(),
//!     None,
//! )
//! .unwrap();
//! println!("wrote {}", report.archive_path.display());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::descriptor::{descriptor_file_name, DescriptorTemplate};
use crate::error::{Error, Result};
use crate::inspect::ImageInspector;
use crate::ova::{archive_path, package, MAX_NAME_LEN};
use crate::properties::{
    file_name, ApplianceProperties, DEFAULT_OS_DEFINITION, DEFAULT_OS_TYPE,
};
use crate::seal::{manifest_file_name, seal, Manifest};

/// Options for an assembly run.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Guest OS type written to the descriptor.
    pub os_type: String,
    /// CIM operating system identifier written to the descriptor.
    pub os_definition: String,
    /// Parent directory for the staging directory (system temp dir if unset).
    pub staging_root: Option<PathBuf>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            os_type: DEFAULT_OS_TYPE.to_string(),
            os_definition: DEFAULT_OS_DEFINITION.to_string(),
            staging_root: None,
        }
    }
}

impl AssembleOptions {
    /// Stage intermediate files under `dir`.
    pub fn with_staging_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(dir.into());
        self
    }
}

/// Phase of the assembly run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblePhase {
    /// Querying image metadata.
    Inspecting,
    /// Expanding the descriptor template.
    Rendering,
    /// Digesting descriptor and image.
    Sealing,
    /// Writing the OVA archive.
    Packaging,
    /// Assembly complete.
    Complete,
}

impl std::fmt::Display for AssemblePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssemblePhase::Inspecting => write!(f, "Inspecting"),
            AssemblePhase::Rendering => write!(f, "Rendering"),
            AssemblePhase::Sealing => write!(f, "Sealing"),
            AssemblePhase::Packaging => write!(f, "Packaging"),
            AssemblePhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress information for an assembly run.
#[derive(Debug, Clone)]
pub struct AssembleProgress {
    /// Current phase.
    pub phase: AssemblePhase,
    /// Bytes hashed or archived in the current phase.
    pub bytes_processed: u64,
    /// Total bytes the current phase will touch.
    pub bytes_total: u64,
}

impl AssembleProgress {
    pub fn new(phase: AssemblePhase, bytes_total: u64) -> Self {
        Self {
            phase,
            bytes_processed: 0,
            bytes_total,
        }
    }

    /// Percentage of the current phase completed.
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total == 0 {
            return match self.phase {
                AssemblePhase::Complete => 100.0,
                _ => 0.0,
            };
        }
        (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(AssembleProgress) + Send>;

/// Result of a successful assembly run.
#[derive(Debug, Clone)]
pub struct AssembleReport {
    /// Path of the written OVA.
    pub archive_path: PathBuf,
    /// Entry name of the descriptor inside the archive.
    pub descriptor_name: String,
    /// Entry name of the manifest inside the archive.
    pub manifest_name: String,
    /// Digests recorded in the archive's manifest.
    pub manifest: Manifest,
    /// Properties the descriptor was rendered with.
    pub properties: ApplianceProperties,
}

/// Assemble a disk image and descriptor template into an OVA.
///
/// Input paths are validated before anything is written. Any failure aborts
/// the run; failures after rendering are wrapped in [`Error::Stage`] naming
/// the stage. The staging directory is removed on every exit path. If packaging
/// fails midway, the partial `.ova` stays on disk for inspection.
pub fn assemble_appliance(
    image_path: &Path,
    template_path: &Path,
    options: &AssembleOptions,
    inspector: &dyn ImageInspector,
    progress_callback: Option<ProgressCallback>,
) -> Result<AssembleReport> {
    let report_progress = |progress: AssembleProgress| {
        if let Some(ref callback) = progress_callback {
            callback(progress);
        }
    };

    // Configuration checks happen before any side effect.
    if !image_path.is_file() {
        return Err(Error::config(format!(
            "disk image '{}' does not exist",
            image_path.display()
        )));
    }
    let template = DescriptorTemplate::load(template_path)?;

    let image_name = file_name(image_path)?;
    let descriptor_name = descriptor_file_name(image_path)?;
    let manifest_name = manifest_file_name(image_path)?;
    let output_path = archive_path(image_path)?;
    if output_path.exists() && fs::canonicalize(&output_path).ok() == fs::canonicalize(image_path).ok() {
        return Err(Error::config(format!(
            "disk image '{}' would be overwritten by its own archive",
            image_path.display()
        )));
    }
    if image_name == descriptor_name || image_name == manifest_name {
        return Err(Error::config(format!(
            "disk image name '{}' collides with a generated archive entry",
            image_name
        )));
    }
    for name in [&image_name, &descriptor_name, &manifest_name] {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::config(format!(
                "archive entry name '{}' exceeds {} bytes",
                name, MAX_NAME_LEN
            )));
        }
    }

    // Phase 1: Inspecting
    report_progress(AssembleProgress::new(AssemblePhase::Inspecting, 0));
    let metadata = inspector.inspect(image_path)?;

    let properties = ApplianceProperties::builder(image_path)
        .image_metadata(metadata)
        .os_type(options.os_type.clone())
        .os_definition(options.os_definition.clone())
        .build()?;

    // Phase 2: Rendering
    report_progress(AssembleProgress::new(AssemblePhase::Rendering, 0));
    let descriptor = template.render(&properties)?;

    let mut staging = tempfile::Builder::new();
    staging.prefix("ovakit-");
    let staging = match &options.staging_root {
        Some(root) => staging.tempdir_in(root).map_err(|e| Error::io(e, root)),
        None => staging.tempdir().map_err(Error::io_simple),
    }
    .map_err(|e| Error::stage("staging", e))?;
    debug!(path = %staging.path().display(), "created staging directory");

    let descriptor_path = staging.path().join(&descriptor_name);
    let manifest_path = staging.path().join(&manifest_name);
    fs::write(&descriptor_path, descriptor.as_bytes())
        .map_err(|e| Error::stage("staging", Error::io(e, &descriptor_path)))?;

    // Phase 3: Sealing
    let image_size = fs::metadata(image_path)
        .map_err(|e| Error::stage("sealing", Error::io(e, image_path)))?
        .len();
    let mut progress = AssembleProgress::new(AssemblePhase::Sealing, image_size);
    report_progress(progress.clone());
    let manifest = seal(&descriptor_path, image_path, &manifest_path, |n| {
        progress.bytes_processed += n;
        report_progress(progress.clone());
    })
    .map_err(|e| Error::stage("sealing", e))?;

    // Phase 4: Packaging
    let archive_size = fs::metadata(&descriptor_path)
        .map_err(|e| Error::stage("packaging", Error::io(e, &descriptor_path)))?
        .len()
        + image_size;
    let mut progress = AssembleProgress::new(AssemblePhase::Packaging, archive_size);
    report_progress(progress.clone());
    let archive_path = package(
        &descriptor_path,
        image_path,
        &manifest_path,
        &manifest,
        &output_path,
        &mut |n: u64| {
            progress.bytes_processed += n;
            report_progress(progress.clone());
        },
    )
    .map_err(|e| Error::stage("packaging", e))?;

    // Phase 5: Complete
    let mut done = AssembleProgress::new(AssemblePhase::Complete, archive_size);
    done.bytes_processed = archive_size;
    report_progress(done);

    info!(
        archive = %archive_path.display(),
        image = %image_name,
        "assembled appliance"
    );

    Ok(AssembleReport {
        archive_path,
        descriptor_name,
        manifest_name,
        manifest,
        properties,
    })
}
