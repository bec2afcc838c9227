//! Error types for the protoforge-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.
//!
//! Errors fall into four categories with different propagation policies:
//!
//! - **Load errors** (descriptor decode, pool registration): fatal, abort
//!   before any generation.
//! - **Configuration errors** (missing symbols, missing templates, invalid
//!   filter patterns): recoverable, the offending rule is skipped and the
//!   run continues. See [`Error::is_recoverable`].
//! - **Render errors**: fatal for the whole run, since partial schema output
//!   must not be left on disk.
//! - **Write errors** (formatter or I/O): isolated to a single output unit,
//!   collected and surfaced in the aggregate result.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protoforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all protoforge operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to decode a descriptor-set payload
    #[error("failed to decode descriptor set '{path}': {source}")]
    DescriptorDecode {
        /// Path of the offending payload
        path: PathBuf,
        /// Underlying protobuf decode error
        #[source]
        source: prost::DecodeError,
    },

    /// Failed to register the merged file descriptors into a pool
    #[error("descriptor registration into the {pool} pool failed (payloads: {payloads:?}): {message}")]
    PoolRegister {
        /// Which pool rejected the registration (`default` or `extended`)
        pool: &'static str,
        /// Descriptor-set payloads involved in the load
        payloads: Vec<PathBuf>,
        /// Registration error detail
        message: String,
    },

    /// A schema entity named by configuration does not exist in the database
    #[error("{kind} '{name}' not found in the loaded descriptor set")]
    SymbolNotFound {
        /// Entity kind (service, message, enum, file)
        kind: &'static str,
        /// The requested full name
        name: String,
    },

    /// A configured template file does not exist
    #[error("template file '{path}' not found")]
    TemplateMissing {
        /// The missing template path
        path: PathBuf,
    },

    /// An include/exclude filter pattern failed to compile
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Template evaluation failed
    #[error("failed to render template '{template}' for '{entity}': {source}")]
    Render {
        /// The template being rendered
        template: PathBuf,
        /// Full name of the entity bound as the current instance
        entity: String,
        /// Underlying template engine error
        #[source]
        source: tera::Error,
    },

    /// External code formatter failed for one output file
    #[error("formatter failed for '{path}': {message}")]
    Format {
        /// The output file being formatted
        path: PathBuf,
        /// Failure detail (spawn error, non-zero exit, ...)
        message: String,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new descriptor decode error
    pub fn descriptor_decode(path: impl Into<PathBuf>, source: prost::DecodeError) -> Self {
        Self::DescriptorDecode {
            path: path.into(),
            source,
        }
    }

    /// Creates a new pool registration error
    pub fn pool_register(
        pool: &'static str,
        payloads: Vec<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::PoolRegister {
            pool,
            payloads,
            message: message.into(),
        }
    }

    /// Creates a new missing-symbol error
    pub fn symbol_not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::SymbolNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a new missing-template error
    pub fn template_missing(path: impl Into<PathBuf>) -> Self {
        Self::TemplateMissing { path: path.into() }
    }

    /// Creates a new invalid-pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }

    /// Creates a new render error
    pub fn render(
        template: impl Into<PathBuf>,
        entity: impl Into<String>,
        source: tera::Error,
    ) -> Self {
        Self::Render {
            template: template.into(),
            entity: entity.into(),
            source,
        }
    }

    /// Creates a new formatter error
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a per-rule configuration error that should be
    /// skipped, letting the run continue with the next rule
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SymbolNotFound { .. } | Self::TemplateMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::symbol_not_found("service", "acme.Login");
        assert!(err.to_string().contains("service"));
        assert!(err.to_string().contains("acme.Login"));

        let err = Error::template_missing("/tmp/rpc.h.tera");
        assert!(err.to_string().contains("rpc.h.tera"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::symbol_not_found("message", "a.B").is_recoverable());
        assert!(Error::template_missing("x.tera").is_recoverable());
        assert!(!Error::internal("boom").is_recoverable());
        assert!(!Error::format("a.cc", "exit status 1").is_recoverable());
    }
}
