//! ovakit Core Library
//!
//! This crate turns an already-built virtual disk image into a sealed OVA
//! appliance.
//!
//! # Overview
//!
//! Assembly is a strictly sequential pipeline. The main entry point is
//! [`assemble_appliance`], which inspects the image, renders the descriptor
//! template, writes a SHA-256 manifest, and packages everything into an
//! uncompressed tar archive next to the image.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`inspect`] - Disk image introspection (`qemu-img info`)
//! - [`properties`] - Typed appliance properties for templates
//! - [`descriptor`] - Descriptor template rendering
//! - [`seal`] - SHA-256 digests and manifest files
//! - [`ova`] - OVA archive creation
//! - [`assemble`] - Orchestrator coordinating the full pipeline
//!
//! # Quick Start
//!
//! ```no_run
//! use ovakit_core::{assemble_appliance, AssembleOptions, QemuImgInspector};
//! use std::path::Path;
//!
//! let image = Path::new("/build/rootfs.vmdk");
//! let template = Path::new("/templates/vmware.ovf.template");
//!
//! assemble_appliance(image, template, &AssembleOptions::default(), &QemuImgInspector::default(), None).unwrap();
//! ```

pub mod assemble;
pub mod descriptor;
pub mod error;
pub mod inspect;
pub mod ova;
pub mod properties;
pub mod seal;

pub use error::{Error, Result};

// Re-export main assembly functionality for convenience
pub use assemble::{
    assemble_appliance, AssembleOptions, AssemblePhase, AssembleProgress, AssembleReport,
    ProgressCallback,
};
pub use inspect::{ImageInspector, ImageMetadata, QemuImgInspector};
pub use properties::ApplianceProperties;
pub use seal::Manifest;
