use crate::dependency::parse_version;
use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_content_type() -> String {
    "text/markdown".to_string()
}

/// File whose content becomes the package's long description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongDescription {
    /// Path to the file, relative to the config file unless absolute.
    pub path: PathBuf,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

/// Descriptive metadata of the package artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: Option<LongDescription>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    /// Minimum language runtime, e.g. `>=3.8` for the Python binding.
    #[serde(default)]
    pub requires_runtime: Option<String>,
    #[serde(default)]
    pub classifiers: Vec<String>,
    #[serde(default)]
    pub zip_safe: bool,
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            long_description: None,
            author: None,
            homepage: None,
            requires_runtime: None,
            classifiers: Vec::new(),
            zip_safe: false,
        }
    }

    /// The CQC contracts package as it has always been published.
    pub fn cqc() -> Self {
        Self {
            description: "Protocol Buffer definitions for Crypto Quant trading platform"
                .to_string(),
            long_description: Some(LongDescription {
                path: PathBuf::from("README.md"),
                content_type: default_content_type(),
            }),
            author: Some("Combine Capital".to_string()),
            homepage: Some("https://github.com/Combine-Capital/cqc".to_string()),
            requires_runtime: Some(">=3.8".to_string()),
            classifiers: [
                "Development Status :: 3 - Alpha",
                "Intended Audience :: Developers",
                "Programming Language :: Python :: 3",
                "Programming Language :: Python :: 3.8",
                "Programming Language :: Python :: 3.9",
                "Programming Language :: Python :: 3.10",
                "Programming Language :: Python :: 3.11",
                "Programming Language :: Python :: 3.12",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ..Self::new("cqc", "0.1.0")
        }
    }

    pub fn with_long_description(mut self, path: impl Into<PathBuf>) -> Self {
        self.long_description = Some(LongDescription {
            path: path.into(),
            content_type: default_content_type(),
        });
        self
    }

    /// Checks the name and version are usable in a distribution file name.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ForgeError::InvalidMetadata("package name is empty".to_string()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ForgeError::InvalidMetadata(format!(
                "package name '{}' has illegal characters",
                self.name
            )));
        }
        if parse_version(&self.version).is_none() {
            return Err(ForgeError::InvalidMetadata(format!(
                "version '{}' is not a version number",
                self.version
            )));
        }
        Ok(())
    }

    /// Reads the long description file, if one is referenced.
    ///
    /// Relative paths are resolved against `base_dir`.
    pub fn read_long_description(&self, base_dir: &Path) -> Result<Option<String>> {
        let Some(long) = &self.long_description else {
            return Ok(None);
        };
        let path = base_dir.join(&long.path);
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| ForgeError::MetadataReadError { path, source })
    }

    /// `<name>-<version>`, the stem of every emitted artifact.
    pub fn distribution_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cqc_defaults() {
        let meta = PackageMetadata::cqc();
        assert_eq!(meta.name, "cqc");
        assert_eq!(meta.version, "0.1.0");
        assert_eq!(meta.requires_runtime.as_deref(), Some(">=3.8"));
        assert_eq!(meta.classifiers.len(), 8);
        assert!(!meta.zip_safe);
        assert!(meta.validate().is_ok());
        assert_eq!(meta.distribution_name(), "cqc-0.1.0");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PackageMetadata::new("", "0.1.0").validate().is_err());
        assert!(PackageMetadata::new("c q c", "0.1.0").validate().is_err());
        assert!(PackageMetadata::new("cqc", "latest").validate().is_err());
        assert!(PackageMetadata::new("cqc", "1.2").validate().is_ok());
    }

    #[test]
    fn test_missing_readme_is_metadata_read_error() {
        let dir = tempdir().unwrap();
        let meta = PackageMetadata::new("cqc", "0.1.0").with_long_description("README.md");
        let err = meta.read_long_description(dir.path()).unwrap_err();
        assert!(matches!(err, ForgeError::MetadataReadError { .. }));

        std::fs::write(dir.path().join("README.md"), "# CQC\n").unwrap();
        let text = meta.read_long_description(dir.path()).unwrap();
        assert_eq!(text.as_deref(), Some("# CQC\n"));
    }
}
