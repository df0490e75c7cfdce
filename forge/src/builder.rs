//! Builder for assembling the distributable package artifact.
//!
//! This module handles the "Assemble" phase of the Forge workflow.
//! It stages the generated tree, manifests and long description in a temporary
//! directory next to the output, checksums every file, and only then moves the
//! finished tree into place (optionally also packing it into a zip archive).

use crate::artifact::{build_artifact, ArtifactDescriptor};
use crate::config::ForgeConfig;
use crate::dependency::check_runtime_compatibility;
use crate::discovery::discover_packages_filtered;
use crate::error::{ForgeError, Result};
use crate::generator::{generate_modules, generator_for};
use crate::language::TargetLanguage;
use crate::manifest::{renderers_for, PYTHON_PACKAGE_DIR, RUST_SOURCE_DIR};
use crate::schema::load_schemas;
use fs_extra::dir::{copy, CopyOptions};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use toml_edit::{value, Array, Document, Item, Table};
use walkdir::WalkDir;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Name of the checksummed descriptor written into every artifact.
pub const DESCRIPTOR_FILE: &str = "artifact.toml";

/// Options for the assembly step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions {
    /// Also write `<name>-<version>.zip` next to the artifact directory.
    pub archive: bool,
    /// Replace an existing artifact with the same name and version.
    pub overwrite: bool,
}

/// Options for a full pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Package whatever is already in the generated directory.
    pub skip_generate: bool,
    pub assemble: AssembleOptions,
}

/// A file inside the artifact together with its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the artifact root, `/` separated.
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub artifact: ArtifactDescriptor,
    pub output_dir: PathBuf,
    pub archive: Option<PathBuf>,
    /// SHA-256 over every file record; equal inputs give equal digests.
    pub digest: String,
    pub files: Vec<FileRecord>,
}

/// Runs the whole pipeline described by `config`:
/// schemas → generator → discovery → artifact → assembly.
pub fn run_build(config: &ForgeConfig, options: &BuildOptions) -> Result<BuildReport> {
    let language = config.target;
    let generated_root = config.generated_root();

    if options.skip_generate {
        info!("Skipping generation, packaging {}", generated_root.display());
    } else {
        let schema_dir = config.schema_dir();
        let schemas = load_schemas(&schema_dir)?;
        let generator = generator_for(language);
        generate_modules(generator.as_ref(), &schema_dir, &schemas, &generated_root)?;
    }

    let packages = discover_packages_filtered(&generated_root, language, &config.discovery)?;
    let constraints = config.constraints()?;
    check_runtime_compatibility(&constraints, &config.runtime_versions)?;
    let artifact = build_artifact(&config.metadata(), &packages, &constraints)?;

    assemble(
        &artifact,
        language,
        &generated_root,
        &config.output_dir(),
        &options.assemble,
    )
}

/// Stages and writes the artifact for `language` into `output_dir/<name>-<version>`.
///
/// # Arguments
///
/// * `artifact` - The descriptor to materialise.
/// * `generated_root` - Root of the generated sources (`gen/<language>`).
/// * `output_dir` - Parent directory of the final artifact.
/// * `options` - Archive/overwrite switches.
pub fn assemble(
    artifact: &ArtifactDescriptor,
    language: TargetLanguage,
    generated_root: &Path,
    output_dir: &Path,
    options: &AssembleOptions,
) -> Result<BuildReport> {
    let dist_name = artifact.distribution_name();
    let final_dir = output_dir.join(&dist_name);
    let archive_path = output_dir.join(format!("{}.zip", dist_name));

    if !options.overwrite {
        if final_dir.exists() {
            return Err(ForgeError::DirectoryExists(final_dir));
        }
        if options.archive && archive_path.exists() {
            return Err(ForgeError::DirectoryExists(archive_path));
        }
    }
    if !generated_root.is_dir() {
        return Err(ForgeError::discovery(generated_root, "directory does not exist"));
    }

    fs::create_dir_all(output_dir)?;
    // Staging lives in the output directory so the final rename never crosses filesystems.
    let staging = tempfile::Builder::new()
        .prefix(".forge-staging-")
        .tempdir_in(output_dir)?;
    let stage = staging.path().join(&dist_name);

    // 1. Generated sources
    let source_dir = match language {
        TargetLanguage::Python => stage.join(PYTHON_PACKAGE_DIR),
        TargetLanguage::Rust => stage.join(RUST_SOURCE_DIR),
    };
    fs::create_dir_all(&source_dir)?;
    let mut options_copy = CopyOptions::new();
    options_copy.content_only = true;
    options_copy.overwrite = true;
    copy(generated_root, &source_dir, &options_copy)?;
    prune_bytecode(&source_dir)?;

    // 2. Long description
    if let (Some(file), Some(text)) = (artifact.long_description_file(), artifact.long_description())
    {
        fs::write(stage.join(file), text)?;
    }

    // 3. Manifests
    for renderer in renderers_for(language) {
        let target = stage.join(renderer.file_name());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("Rendering {}", renderer.file_name());
        fs::write(target, renderer.render(artifact))?;
    }

    // 4. Checksums + descriptor
    let files = record_files(&stage)?;
    let digest = digest_records(&files);
    fs::write(
        stage.join(DESCRIPTOR_FILE),
        render_descriptor(artifact, language, &files, &digest),
    )?;

    // 5. Move into place
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&stage, &final_dir)?;
    info!("Artifact written to {}", final_dir.display());

    let archive = if options.archive {
        write_archive(&final_dir, &dist_name, &archive_path)?;
        info!("Archive written to {}", archive_path.display());
        Some(archive_path)
    } else {
        // An archive from an earlier build no longer matches the directory.
        if options.overwrite && archive_path.exists() {
            fs::remove_file(&archive_path)?;
            info!("Removed stale archive {}", archive_path.display());
        }
        None
    };

    Ok(BuildReport {
        artifact: artifact.clone(),
        output_dir: final_dir,
        archive,
        digest,
        files,
    })
}

/// Interpreter caches are machine specific and must not end up in the artifact.
fn prune_bytecode(dir: &Path) -> Result<()> {
    let caches: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == "__pycache__")
        .map(|e| e.into_path())
        .collect();
    for cache in caches {
        debug!("Removing {}", cache.display());
        fs::remove_dir_all(cache)?;
    }
    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Checksums every regular file below `root`, sorted by relative path.
pub fn record_files(root: &Path) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = relative_slash_path(root, entry.path());
        if path == DESCRIPTOR_FILE {
            continue;
        }
        let bytes = fs::read(entry.path())?;
        records.push(FileRecord {
            path,
            sha256: hex::encode(Sha256::digest(&bytes)),
            size: bytes.len() as u64,
        });
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

/// Digest over `path\0sha256\n` lines, independent of file timestamps.
pub fn digest_records(records: &[FileRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.sha256.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Neutral descriptor: declared metadata plus the checksummed file list.
pub fn render_descriptor(
    artifact: &ArtifactDescriptor,
    language: TargetLanguage,
    files: &[FileRecord],
    digest: &str,
) -> String {
    let meta = artifact.metadata();
    let mut doc = Document::new();

    let mut package = Table::new();
    package.insert("name", value(meta.name.as_str()));
    package.insert("version", value(meta.version.as_str()));
    package.insert("language", value(language.dir_name()));
    if !meta.description.is_empty() {
        package.insert("description", value(meta.description.as_str()));
    }
    if let Some(author) = &meta.author {
        package.insert("author", value(author.as_str()));
    }
    if let Some(homepage) = &meta.homepage {
        package.insert("homepage", value(homepage.as_str()));
    }
    if let Some(runtime) = &meta.requires_runtime {
        package.insert("requires-runtime", value(runtime.as_str()));
    }
    let packages: Array = artifact.packages().iter().map(|p| p.as_str()).collect();
    package.insert("packages", value(packages));
    package.insert("digest", value(format!("sha256:{}", digest)));
    doc.insert("package", Item::Table(package));

    let mut dependencies = Table::new();
    for dep in artifact.dependencies() {
        dependencies.insert(dep.name(), value(dep.range()));
    }
    doc.insert("dependencies", Item::Table(dependencies));

    let mut table = Table::new();
    for record in files {
        table.insert(&record.path, value(record.sha256.as_str()));
    }
    doc.insert("files", Item::Table(table));

    doc.to_string()
}

fn archive_entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Zips `dir` with entries under `<prefix>/`, in sorted order and with fixed
/// timestamps so equal trees give byte-identical archives.
fn write_archive(dir: &Path, prefix: &str, archive_path: &Path) -> Result<()> {
    let file = fs::File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = format!("{}/{}", prefix, relative_slash_path(dir, entry.path()));
        zip.start_file(name, archive_entry_options())?;
        zip.write_all(&fs::read(entry.path())?)?;
    }
    zip.finish()?;
    Ok(())
}
