//! Code generators that turn the schema set into language bindings.
//!
//! This module handles the "Generate" phase of the Forge workflow. Each
//! generator owns its output directory: it is wiped and recreated on every
//! run so stale modules from renamed schemas never reach the artifact.

use crate::error::{ForgeError, Result};
use crate::language::TargetLanguage;
use crate::schema::SchemaDefinition;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Source emitted for one schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    pub language: TargetLanguage,
    /// Schema path relative to the schema root.
    pub schema: PathBuf,
    /// Emitted files relative to the generator output directory, sorted.
    pub files: Vec<PathBuf>,
}

/// A code generator for one target language.
pub trait CodeGenerator {
    fn language(&self) -> TargetLanguage;

    /// Name of the underlying tool, used in error messages.
    fn tool(&self) -> &str;

    /// Emits bindings for `schemas` (all located under `schema_root`) into `out_dir`.
    fn generate(
        &self,
        schema_root: &Path,
        schemas: &[SchemaDefinition],
        out_dir: &Path,
    ) -> Result<Vec<GeneratedModule>>;
}

/// Returns the default generator for `language`.
pub fn generator_for(language: TargetLanguage) -> Box<dyn CodeGenerator> {
    match language {
        TargetLanguage::Python => Box::new(PythonGrpcGenerator::default()),
        TargetLanguage::Rust => Box::new(TonicGenerator::default()),
    }
}

/// Runs `generator` after resetting `out_dir`.
pub fn generate_modules(
    generator: &dyn CodeGenerator,
    schema_root: &Path,
    schemas: &[SchemaDefinition],
    out_dir: &Path,
) -> Result<Vec<GeneratedModule>> {
    if out_dir.exists() {
        debug!("Clearing previous output at {}", out_dir.display());
        fs::remove_dir_all(out_dir)?;
    }
    fs::create_dir_all(out_dir)?;

    info!(
        "Generating {} bindings for {} schema(s) with {}",
        generator.language(),
        schemas.len(),
        generator.tool()
    );
    let mut modules = generator.generate(schema_root, schemas, out_dir)?;
    modules.sort_by(|a, b| a.schema.cmp(&b.schema));
    for module in &modules {
        if module.files.is_empty() {
            warn!("{} produced no files for {}", generator.tool(), module.schema.display());
        }
    }
    Ok(modules)
}

/// Python messages and gRPC stubs via `python -m grpc_tools.protoc`.
#[derive(Debug, Clone)]
pub struct PythonGrpcGenerator {
    interpreter: String,
}

impl Default for PythonGrpcGenerator {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl PythonGrpcGenerator {
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl CodeGenerator for PythonGrpcGenerator {
    fn language(&self) -> TargetLanguage {
        TargetLanguage::Python
    }

    fn tool(&self) -> &str {
        "grpc_tools.protoc"
    }

    fn generate(
        &self,
        schema_root: &Path,
        schemas: &[SchemaDefinition],
        out_dir: &Path,
    ) -> Result<Vec<GeneratedModule>> {
        let root = fs::canonicalize(schema_root)?;
        let out = fs::canonicalize(out_dir)?;

        let output = Command::new(&self.interpreter)
            .arg("-m")
            .arg("grpc_tools.protoc")
            .arg(format!("-I{}", root.display()))
            .arg(format!("--python_out={}", out.display()))
            .arg(format!("--grpc_python_out={}", out.display()))
            .args(schemas.iter().map(|s| root.join(&s.path)))
            .output()
            .map_err(|e| ForgeError::GeneratorFailed {
                tool: self.tool().to_string(),
                reason: format!("could not launch {}: {}", self.interpreter, e),
            })?;

        if !output.status.success() {
            return Err(ForgeError::GeneratorFailed {
                tool: self.tool().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut modules = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let stem = schema
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let parent = schema.path.parent().map(Path::to_path_buf).unwrap_or_default();
            let files: Vec<PathBuf> = [format!("{}_pb2.py", stem), format!("{}_pb2_grpc.py", stem)]
                .iter()
                .map(|name| parent.join(name))
                .filter(|rel| out.join(rel).is_file())
                .collect();
            ensure_package_markers(&out, &parent)?;
            modules.push(GeneratedModule {
                language: TargetLanguage::Python,
                schema: schema.path.clone(),
                files,
            });
        }
        Ok(modules)
    }
}

/// protoc does not write `__init__.py`; every directory leading to a module needs one
/// or the tree is not importable (and not discoverable).
fn ensure_package_markers(out: &Path, relative_dir: &Path) -> Result<()> {
    let mut current = out.to_path_buf();
    for component in relative_dir.components() {
        current.push(component);
        let marker = current.join("__init__.py");
        if !marker.exists() {
            debug!("Creating package marker {}", marker.display());
            fs::write(&marker, "")?;
        }
    }
    Ok(())
}

/// prost messages plus tonic client and server stubs.
#[derive(Debug, Clone)]
pub struct TonicGenerator {
    build_client: bool,
    build_server: bool,
}

impl Default for TonicGenerator {
    fn default() -> Self {
        Self {
            build_client: true,
            build_server: true,
        }
    }
}

impl TonicGenerator {
    pub fn new(build_client: bool, build_server: bool) -> Self {
        Self {
            build_client,
            build_server,
        }
    }
}

impl CodeGenerator for TonicGenerator {
    fn language(&self) -> TargetLanguage {
        TargetLanguage::Rust
    }

    fn tool(&self) -> &str {
        "tonic-build"
    }

    fn generate(
        &self,
        schema_root: &Path,
        schemas: &[SchemaDefinition],
        out_dir: &Path,
    ) -> Result<Vec<GeneratedModule>> {
        let protos: Vec<PathBuf> = schemas.iter().map(|s| schema_root.join(&s.path)).collect();

        tonic_build::configure()
            .build_client(self.build_client)
            .build_server(self.build_server)
            .emit_rerun_if_changed(false)
            .out_dir(out_dir)
            .compile(&protos, &[schema_root])
            .map_err(|e| ForgeError::GeneratorFailed {
                tool: self.tool().to_string(),
                reason: e.to_string(),
            })?;

        // prost writes one file per protobuf package, `_` for package-less schemas.
        let mut by_package: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut modules = Vec::with_capacity(schemas.len());
        for schema in schemas {
            let package = schema.package.clone().unwrap_or_else(|| "_".to_string());
            let file = by_package
                .entry(package.clone())
                .or_insert_with(|| PathBuf::from(format!("{}.rs", package)))
                .clone();
            let files = if out_dir.join(&file).is_file() {
                vec![file]
            } else {
                Vec::new()
            };
            modules.push(GeneratedModule {
                language: TargetLanguage::Rust,
                schema: schema.path.clone(),
                files,
            });
        }
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Writes a fixed file per schema, recording what it was asked to do.
    struct RecordingGenerator {
        calls: RefCell<usize>,
    }

    impl CodeGenerator for RecordingGenerator {
        fn language(&self) -> TargetLanguage {
            TargetLanguage::Python
        }

        fn tool(&self) -> &str {
            "recording"
        }

        fn generate(
            &self,
            _schema_root: &Path,
            schemas: &[SchemaDefinition],
            out_dir: &Path,
        ) -> Result<Vec<GeneratedModule>> {
            *self.calls.borrow_mut() += 1;
            let mut modules = Vec::new();
            for schema in schemas.iter().rev() {
                let parent = schema.path.parent().unwrap().to_path_buf();
                fs::create_dir_all(out_dir.join(&parent))?;
                let file = parent.join("stub_pb2.py");
                fs::write(out_dir.join(&file), "")?;
                ensure_package_markers(out_dir, &parent)?;
                modules.push(GeneratedModule {
                    language: TargetLanguage::Python,
                    schema: schema.path.clone(),
                    files: vec![file],
                });
            }
            Ok(modules)
        }
    }

    fn schema(path: &str) -> SchemaDefinition {
        SchemaDefinition {
            path: PathBuf::from(path),
            syntax: "proto3".to_string(),
            package: Some("cqc.v1".to_string()),
            imports: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
        }
    }

    #[test]
    fn test_generate_resets_output_and_sorts() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("gen/python");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale_pb2.py"), "").unwrap();

        let generator = RecordingGenerator {
            calls: RefCell::new(0),
        };
        let schemas = vec![schema("cqc/v1/a.proto"), schema("cqc/v2/b.proto")];
        let modules = generate_modules(&generator, dir.path(), &schemas, &out).unwrap();

        assert_eq!(*generator.calls.borrow(), 1);
        assert!(!out.join("stale_pb2.py").exists());
        assert_eq!(modules[0].schema, PathBuf::from("cqc/v1/a.proto"));
        assert_eq!(modules[1].schema, PathBuf::from("cqc/v2/b.proto"));
        assert!(out.join("cqc/__init__.py").is_file());
        assert!(out.join("cqc/v1/__init__.py").is_file());
        assert!(out.join("cqc/v2/__init__.py").is_file());
    }

    #[test]
    fn test_missing_interpreter_is_generator_error() {
        let dir = tempdir().unwrap();
        let generator = PythonGrpcGenerator::with_interpreter("definitely-not-a-python-binary");
        let err = generator
            .generate(dir.path(), &[schema("a.proto")], dir.path())
            .unwrap_err();
        assert!(matches!(err, ForgeError::GeneratorFailed { .. }));
    }

    #[test]
    fn test_generator_for_language() {
        assert_eq!(generator_for(TargetLanguage::Python).tool(), "grpc_tools.protoc");
        assert_eq!(generator_for(TargetLanguage::Rust).language(), TargetLanguage::Rust);
    }
}
