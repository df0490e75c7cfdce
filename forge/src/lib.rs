//! # CQC Forge
//!
//! Turns the CQC (Crypto Quant Contracts) protobuf schemas into a distributable
//! package.
//!
//! ## Modules
//! - `schema`: `.proto` inventory and structural validation.
//! - `generator`: Language bindings via grpc_tools (Python) or tonic-build (Rust).
//! - `discovery`: Importable module paths in a generated tree.
//! - `dependency`: Dependency constraints and pinned-version compatibility.
//! - `artifact`: The immutable artifact descriptor.
//! - `manifest`: pyproject.toml / Cargo.toml / lib.rs rendering.
//! - `builder`: Staging, checksums, archive and the full pipeline.
//! - `config`: Layered `forge.toml` configuration.

pub mod args;
pub mod artifact;
pub mod builder;
pub mod config;
pub mod dependency;
pub mod discovery;
pub mod error;
pub mod generator;
pub mod language;
pub mod manifest;
pub mod metadata;
pub mod schema;

pub use artifact::{build_artifact, ArtifactDescriptor};
pub use dependency::DependencyConstraint;
pub use discovery::{discover_packages, discover_packages_filtered, PackageFilter};
pub use error::{ForgeError, Result};
pub use language::TargetLanguage;
pub use metadata::PackageMetadata;
