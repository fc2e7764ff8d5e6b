//! Error types for the ovakit core library.

use std::path::PathBuf;

/// The main error type for ovakit operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Invalid or missing input (image path, template file, template syntax).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The image introspection tool failed or produced unusable output.
    #[error("image inspection failed for '{}': {message}\n{output}", path.display())]
    Inspect {
        path: PathBuf,
        message: String,
        output: String,
    },

    /// Appliance properties could not be constructed.
    #[error("property error: {message}")]
    Properties { message: String },

    /// The descriptor template could not be rendered.
    #[error("render error: {message}")]
    Render { message: String },

    /// Digest computation or manifest handling failed.
    #[error("seal error: {message}")]
    Seal { message: String },

    /// Error creating OVA archive.
    #[error("OVA error: {message}")]
    Ova { message: String },

    /// A pipeline stage failed with an underlying error.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        source: Box<Error>,
    },
}

/// A specialized Result type for ovakit operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an inspection error carrying the tool's raw output.
    pub fn inspect(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::Inspect {
            path: path.into(),
            message: message.into(),
            output: output.into(),
        }
    }

    /// Create a property error.
    pub fn properties(message: impl Into<String>) -> Self {
        Self::Properties {
            message: message.into(),
        }
    }

    /// Create a render error.
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// Create a seal error.
    pub fn seal(message: impl Into<String>) -> Self {
        Self::Seal {
            message: message.into(),
        }
    }

    /// Create an OVA error.
    pub fn ova(message: impl Into<String>) -> Self {
        Self::Ova {
            message: message.into(),
        }
    }

    /// Attribute an error to the pipeline stage it occurred in.
    pub fn stage(stage: &'static str, source: Error) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/disk.vmdk");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/disk.vmdk"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_inspect_error_includes_tool_output() {
        let err = Error::inspect(
            "/images/rootfs.vmdk",
            "qemu-img exited with status 1",
            "qemu-img: Could not open '/images/rootfs.vmdk'",
        );
        let msg = err.to_string();
        assert!(msg.contains("/images/rootfs.vmdk"));
        assert!(msg.contains("exited with status 1"));
        assert!(msg.contains("qemu-img: Could not open"));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("template not found");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("template not found"));
    }

    #[test]
    fn test_render_error() {
        let err = Error::render("Variable `p.missing` not found");
        assert!(err.to_string().contains("render error"));
    }

    #[test]
    fn test_ova_error() {
        let err = Error::ova("entry name too long");
        assert!(err.to_string().contains("OVA error"));
    }

    #[test]
    fn test_stage_error_names_stage_and_cause() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::stage("packaging", Error::io(io_err, "/images/rootfs.ova"));
        let msg = err.to_string();
        assert!(msg.starts_with("packaging failed: I/O error"));
        assert!(msg.contains("/images/rootfs.ova"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
