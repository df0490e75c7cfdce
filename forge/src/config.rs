use crate::dependency::{check_target_ranges, DependencyConstraint};
use crate::discovery::PackageFilter;
use crate::error::Result;
use crate::language::TargetLanguage;
use crate::metadata::PackageMetadata;
use config::{Config, Environment, File};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "forge.toml";

/// Where schemas, generated code and artifacts live.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LayoutConfig {
    /// Root of the `.proto` tree.
    pub schema_dir: PathBuf,
    /// Generated code goes to `<generated_dir>/<language>`.
    pub generated_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            schema_dir: PathBuf::from("proto"),
            generated_dir: PathBuf::from("gen"),
            output_dir: PathBuf::from("dist"),
        }
    }
}

/// `name<range>` specs declared by the artifact, one list per target.
///
/// The Python list feeds `pyproject.toml`, the Rust list feeds `Cargo.toml` and
/// must name the crates the tonic-build output compiles against.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TargetDependencies {
    pub python: Vec<String>,
    pub rust: Vec<String>,
}

impl Default for TargetDependencies {
    fn default() -> Self {
        Self {
            python: vec![
                "protobuf>=4.21.0,<5.0.0".to_string(),
                "grpcio>=1.50.0,<2.0.0".to_string(),
                "grpcio-tools>=1.50.0,<2.0.0".to_string(),
            ],
            rust: vec![
                "prost>=0.12.0,<0.13.0".to_string(),
                "tonic>=0.11.0,<0.12.0".to_string(),
            ],
        }
    }
}

impl TargetDependencies {
    pub fn for_target(&self, language: TargetLanguage) -> &[String] {
        match language {
            TargetLanguage::Python => &self.python,
            TargetLanguage::Rust => &self.rust,
        }
    }
}

/// Full build configuration.
///
/// Layers, lowest first: built-in CQC defaults, the config file, then
/// `CQC_`-prefixed environment variables using `__` for nesting
/// (`CQC_PACKAGE__VERSION=0.2.0`, `CQC_TARGET=rust`).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ForgeConfig {
    pub package: PackageMetadata,
    pub dependencies: TargetDependencies,
    /// Generator/runtime versions the schemas are compiled with.
    #[serde(default)]
    pub runtime_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub layout: LayoutConfig,
    pub target: TargetLanguage,
    #[serde(default)]
    pub discovery: PackageFilter,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            package: PackageMetadata::cqc(),
            dependencies: TargetDependencies::default(),
            runtime_versions: BTreeMap::new(),
            layout: LayoutConfig::default(),
            target: TargetLanguage::Python,
            discovery: PackageFilter::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl ForgeConfig {
    /// Loads the layered configuration.
    ///
    /// With `path == None` the default `forge.toml` is used if present.
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        debug!("Loading configuration from {} (required: {})", file.display(), required);

        let settings = Config::builder()
            .add_source(Config::try_from(&ForgeConfig::default())?)
            .add_source(File::from(file.as_path()).required(required))
            .add_source(
                Environment::with_prefix("CQC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: ForgeConfig = settings.try_deserialize()?;
        config.base_dir = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.resolve(&self.layout.schema_dir)
    }

    /// `<generated_dir>/<language>` for the configured target.
    pub fn generated_root(&self) -> PathBuf {
        self.resolve(&self.layout.generated_dir)
            .join(self.target.dir_name())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.layout.output_dir)
    }

    /// Package metadata with the long-description path resolved.
    pub fn metadata(&self) -> PackageMetadata {
        let mut metadata = self.package.clone();
        if let Some(long) = metadata.long_description.as_mut() {
            long.path = self.resolve(&long.path);
        }
        metadata
    }

    /// Parses the configured target's dependency specs, keeping their order.
    ///
    /// Ranges the target's package manager cannot read are rejected here,
    /// before anything is assembled.
    pub fn constraints(&self) -> Result<Vec<DependencyConstraint>> {
        let constraints = self
            .dependencies
            .for_target(self.target)
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<DependencyConstraint>>>()?;
        check_target_ranges(&constraints, self.target)?;
        Ok(constraints)
    }
}
