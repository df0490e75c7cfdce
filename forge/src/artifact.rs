use crate::dependency::DependencyConstraint;
use crate::error::{ForgeError, Result};
use crate::metadata::PackageMetadata;
use log::info;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Everything a distribution needs to declare about the package.
///
/// Built once per build and never modified; every manifest is rendered from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    metadata: PackageMetadata,
    packages: Vec<String>,
    dependencies: Vec<DependencyConstraint>,
    long_description: Option<String>,
}

impl ArtifactDescriptor {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Importable module paths, sorted.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Dependencies in declaration order, ranges untouched.
    pub fn dependencies(&self) -> &[DependencyConstraint] {
        &self.dependencies
    }

    pub fn long_description(&self) -> Option<&str> {
        self.long_description.as_deref()
    }

    /// File name the long description is shipped under, e.g. `README.md`.
    pub fn long_description_file(&self) -> Option<PathBuf> {
        let long = self.metadata.long_description.as_ref()?;
        long.path.file_name().map(PathBuf::from)
    }

    pub fn distribution_name(&self) -> String {
        self.metadata.distribution_name()
    }
}

/// Combines metadata, the discovered package set and dependency constraints
/// into an [`ArtifactDescriptor`].
///
/// # Errors
///
/// * `DiscoveryError` if `packages` is empty.
/// * `InvalidMetadata` if the name or version is unusable, or a package path is malformed.
/// * `InvalidConstraint` if a dependency is declared twice.
/// * `MetadataReadError` if the long description file cannot be read.
pub fn build_artifact(
    metadata: &PackageMetadata,
    packages: &BTreeSet<String>,
    constraints: &[DependencyConstraint],
) -> Result<ArtifactDescriptor> {
    metadata.validate()?;

    if packages.is_empty() {
        return Err(ForgeError::discovery(
            metadata.distribution_name(),
            "no packages to include in the artifact",
        ));
    }
    for package in packages {
        if package.split('.').any(|segment| segment.is_empty()) {
            return Err(ForgeError::InvalidMetadata(format!(
                "'{}' is not a valid module path",
                package
            )));
        }
    }

    let mut seen = HashSet::new();
    for constraint in constraints {
        if !seen.insert(constraint.normalized_name()) {
            return Err(ForgeError::InvalidConstraint {
                spec: constraint.to_string(),
                reason: "dependency declared more than once".to_string(),
            });
        }
    }

    // Relative paths resolve against the working directory; the config layer
    // has already made them absolute for CLI builds.
    let long_description = metadata.read_long_description(Path::new(""))?;

    info!(
        "Artifact {} declares {} package(s) and {} dependencies",
        metadata.distribution_name(),
        packages.len(),
        constraints.len()
    );

    Ok(ArtifactDescriptor {
        metadata: metadata.clone(),
        packages: packages.iter().cloned().collect(),
        dependencies: constraints.to_vec(),
        long_description,
    })
}
