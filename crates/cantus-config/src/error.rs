//! Error types for configuration operations.

use std::path::PathBuf;

use cantus_core::GraphError;
use thiserror::Error;

/// Errors that can occur while loading, saving or applying an engine config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A value was rejected by the engine.
    #[error("validation failed: {0}")]
    Validation(#[from] GraphError),

    /// The output section is unusable.
    #[error("invalid output setting '{field}': {reason}")]
    InvalidOutput {
        /// Name of the offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }

    /// Create an output validation error.
    pub fn invalid_output(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidOutput {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn test_read_file_factory() {
        let err = ConfigError::read_file("/some/path", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/some/path"))
        );
        assert!(err.to_string().contains("/some/path"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_write_file_factory() {
        let err = ConfigError::write_file("/out/path", mock_io_err());
        assert!(matches!(err, ConfigError::WriteFile { .. }));
        assert!(err.to_string().starts_with("failed to write file"));
    }

    #[test]
    fn test_create_dir_factory() {
        let err = ConfigError::create_dir("/dir", mock_io_err());
        assert!(matches!(err, ConfigError::CreateDir { .. }));
    }

    #[test]
    fn test_graph_error_converts() {
        let err: ConfigError = GraphError::InvalidBlockSize(6).into();
        assert!(matches!(err, ConfigError::Validation(GraphError::InvalidBlockSize(6))));
        assert!(err.to_string().contains("block size 6"));
    }

    #[test]
    fn test_invalid_output_message() {
        let err = ConfigError::invalid_output("channels", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid output setting 'channels': must be at least 1"
        );
    }
}
