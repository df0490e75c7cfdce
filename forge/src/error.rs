use std::path::PathBuf;
use thiserror::Error;

/// Global error type for the Forge package builder.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// The generated-module directory is missing or holds no recognisable modules.
    #[error("Package discovery failed under {root}: {reason}")]
    DiscoveryError { root: PathBuf, reason: String },

    /// A file referenced by the package metadata (e.g. the long description) could not be read.
    #[error("Failed to read metadata file {path}: {source}")]
    MetadataReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Package metadata is structurally invalid.
    #[error("Invalid package metadata: {0}")]
    InvalidMetadata(String),

    /// A dependency constraint could not be parsed or is declared twice.
    #[error("Invalid dependency constraint '{spec}': {reason}")]
    InvalidConstraint { spec: String, reason: String },

    /// A pinned generator/runtime version falls outside the declared range.
    #[error("Dependency {name} requires {range} but the build pins {version}")]
    IncompatibleDependency {
        name: String,
        range: String,
        version: String,
    },

    /// The schema tree failed to compile into descriptors.
    #[error("Failed to compile schemas under {path}: {message}")]
    SchemaParse { path: PathBuf, message: String },

    /// A schema parsed but breaks a structural rule (duplicate field numbers etc).
    #[error("Invalid schema {path}: {message}")]
    InvalidSchema { path: PathBuf, message: String },

    /// The external code generator exited unsuccessfully.
    #[error("Code generator '{tool}' failed: {reason}")]
    GeneratorFailed { tool: String, reason: String },

    /// The output directory already holds an artifact and overwriting was not requested.
    #[error("Directory {0} already exists")]
    DirectoryExists(PathBuf),

    /// Underlying IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or modify TOML.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml_edit::TomlError),

    /// Failed to copy the generated tree.
    #[error("Copy error: {0}")]
    Copy(#[from] fs_extra::error::Error),

    /// Failed while walking a directory tree.
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// An include/exclude pattern could not be compiled.
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Failed to write the distribution archive.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Failed to load or merge configuration layers.
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Global logger configuration error.
    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),
}

impl ForgeError {
    pub(crate) fn discovery(root: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ForgeError::DiscoveryError {
            root: root.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for Forge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;
