//! Ecosystem-native manifests rendered from an [`ArtifactDescriptor`].
//!
//! The artifact's dependency ranges are written exactly as declared, whatever
//! the target ecosystem. Output is built with `toml_edit` so key order is the
//! insertion order and rendering the same descriptor twice is byte-identical.

use crate::artifact::ArtifactDescriptor;
use crate::language::TargetLanguage;
use std::collections::BTreeMap;
use toml_edit::{value, Array, Document, InlineTable, Item, Table, Value};

/// Where the generated Python tree lives inside a staged artifact.
pub const PYTHON_PACKAGE_DIR: &str = "gen/python";
/// Where the generated Rust sources live inside a staged artifact.
pub const RUST_SOURCE_DIR: &str = "src";

/// Produces one manifest file for a staged artifact.
pub trait ManifestRenderer {
    /// Path of the manifest relative to the artifact root.
    fn file_name(&self) -> &'static str;

    fn render(&self, artifact: &ArtifactDescriptor) -> String;
}

/// Renderers needed to make the staged tree installable for `language`.
pub fn renderers_for(language: TargetLanguage) -> Vec<Box<dyn ManifestRenderer>> {
    match language {
        TargetLanguage::Python => vec![Box::new(PyProjectRenderer)],
        TargetLanguage::Rust => vec![Box::new(CargoRenderer), Box::new(RustLibRenderer)],
    }
}

fn string_array<I, S>(items: I) -> Array
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}

fn implicit_table() -> Table {
    let mut table = Table::new();
    table.set_implicit(true);
    table
}

/// PEP 621 `pyproject.toml` building with setuptools.
pub struct PyProjectRenderer;

impl ManifestRenderer for PyProjectRenderer {
    fn file_name(&self) -> &'static str {
        "pyproject.toml"
    }

    fn render(&self, artifact: &ArtifactDescriptor) -> String {
        let meta = artifact.metadata();
        let mut doc = Document::new();

        let mut build_system = Table::new();
        build_system.insert("requires", value(string_array(["setuptools>=61.0"])));
        build_system.insert("build-backend", value("setuptools.build_meta"));
        doc.insert("build-system", Item::Table(build_system));

        let mut project = Table::new();
        project.insert("name", value(meta.name.as_str()));
        project.insert("version", value(meta.version.as_str()));
        if !meta.description.is_empty() {
            project.insert("description", value(meta.description.as_str()));
        }
        if let (Some(file), Some(long)) =
            (artifact.long_description_file(), meta.long_description.as_ref())
        {
            let mut readme = InlineTable::new();
            readme.insert("file", Value::from(file.to_string_lossy().to_string()));
            readme.insert("content-type", Value::from(long.content_type.as_str()));
            project.insert("readme", value(readme));
        }
        if let Some(runtime) = &meta.requires_runtime {
            project.insert("requires-python", value(runtime.as_str()));
        }
        if let Some(author) = &meta.author {
            let mut entry = InlineTable::new();
            entry.insert("name", Value::from(author.as_str()));
            let mut authors = Array::new();
            authors.push(entry);
            project.insert("authors", value(authors));
        }
        if !meta.classifiers.is_empty() {
            project.insert("classifiers", value(string_array(&meta.classifiers)));
        }
        project.insert(
            "dependencies",
            value(string_array(artifact.dependencies().iter().map(|d| d.to_string()))),
        );
        if let Some(homepage) = &meta.homepage {
            let mut urls = Table::new();
            urls.insert("Homepage", value(homepage.as_str()));
            project.insert("urls", Item::Table(urls));
        }
        doc.insert("project", Item::Table(project));

        let mut setuptools = Table::new();
        setuptools.insert("zip-safe", value(meta.zip_safe));
        setuptools.insert("packages", value(string_array(artifact.packages())));
        let mut package_dir = Table::new();
        package_dir.insert("", value(PYTHON_PACKAGE_DIR));
        setuptools.insert("package-dir", Item::Table(package_dir));

        let mut tool = implicit_table();
        tool.insert("setuptools", Item::Table(setuptools));
        doc.insert("tool", Item::Table(tool));

        doc.to_string()
    }
}

/// `Cargo.toml` for the Rust binding crate.
pub struct CargoRenderer;

impl ManifestRenderer for CargoRenderer {
    fn file_name(&self) -> &'static str {
        "Cargo.toml"
    }

    fn render(&self, artifact: &ArtifactDescriptor) -> String {
        let meta = artifact.metadata();
        let mut doc = Document::new();

        let mut package = Table::new();
        package.insert("name", value(meta.name.as_str()));
        package.insert("version", value(meta.version.as_str()));
        package.insert("edition", value("2021"));
        if !meta.description.is_empty() {
            package.insert("description", value(meta.description.as_str()));
        }
        if let Some(author) = &meta.author {
            package.insert("authors", value(string_array([author])));
        }
        if let Some(homepage) = &meta.homepage {
            package.insert("homepage", value(homepage.as_str()));
        }
        if let Some(file) = artifact.long_description_file() {
            package.insert("readme", value(file.to_string_lossy().to_string()));
        }
        doc.insert("package", Item::Table(package));

        let mut lib = Table::new();
        lib.insert("path", value(format!("{}/lib.rs", RUST_SOURCE_DIR)));
        doc.insert("lib", Item::Table(lib));

        let mut dependencies = Table::new();
        for dep in artifact.dependencies() {
            let range = if dep.range().is_empty() { "*" } else { dep.range() };
            dependencies.insert(dep.name(), value(range));
        }
        doc.insert("dependencies", Item::Table(dependencies));

        doc.to_string()
    }
}

/// `src/lib.rs` nesting each prost `<package>.rs` file into its module path.
pub struct RustLibRenderer;

#[derive(Default)]
struct ModuleNode {
    include: Option<String>,
    children: BTreeMap<String, ModuleNode>,
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "static", "struct", "trait", "true", "type", "unsafe", "use", "where",
    "while", "abstract", "become", "box", "do", "final", "macro", "override", "priv", "try",
    "typeof", "unsized", "virtual", "yield",
];

fn module_ident(segment: &str) -> String {
    if RUST_KEYWORDS.contains(&segment) {
        format!("r#{}", segment)
    } else {
        segment.to_string()
    }
}

impl ModuleNode {
    fn write(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        if let Some(file) = &self.include {
            out.push_str(&format!("{}include!(\"{}\");\n", indent, file));
        }
        for (name, child) in &self.children {
            out.push_str(&format!("{}pub mod {} {{\n", indent, module_ident(name)));
            child.write(out, depth + 1);
            out.push_str(&format!("{}}}\n", indent));
        }
    }
}

impl ManifestRenderer for RustLibRenderer {
    fn file_name(&self) -> &'static str {
        "src/lib.rs"
    }

    fn render(&self, artifact: &ArtifactDescriptor) -> String {
        let mut root = ModuleNode::default();
        for package in artifact.packages() {
            let mut node = &mut root;
            for segment in package.split('.') {
                node = node.children.entry(segment.to_string()).or_default();
            }
            node.include = Some(format!("{}.rs", package));
        }

        let mut out = format!(
            "// Generated by cqc-forge for {}. Do not edit.\n\n",
            artifact.distribution_name()
        );
        root.write(&mut out, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::build_artifact;
    use crate::dependency::DependencyConstraint;
    use crate::metadata::PackageMetadata;
    use std::collections::BTreeSet;

    fn artifact(packages: &[&str]) -> ArtifactDescriptor {
        artifact_with(
            packages,
            &[
                "protobuf>=4.21.0,<5.0.0",
                "grpcio>=1.50.0,<2.0.0",
                "grpcio-tools>=1.50.0,<2.0.0",
            ],
        )
    }

    fn artifact_with(packages: &[&str], deps: &[&str]) -> ArtifactDescriptor {
        let mut metadata = PackageMetadata::cqc();
        metadata.long_description = None;
        let deps: Vec<DependencyConstraint> = deps.iter().map(|s| s.parse().unwrap()).collect();
        let packages: BTreeSet<String> = packages.iter().map(|s| s.to_string()).collect();
        build_artifact(&metadata, &packages, &deps).unwrap()
    }

    #[test]
    fn test_pyproject_declares_verbatim_ranges() {
        let text = PyProjectRenderer.render(&artifact(&["cqc", "cqc.v1"]));
        let doc: Document = text.parse().unwrap();

        assert_eq!(doc["project"]["name"].as_str(), Some("cqc"));
        assert_eq!(doc["project"]["version"].as_str(), Some("0.1.0"));
        assert_eq!(doc["project"]["requires-python"].as_str(), Some(">=3.8"));

        let deps: Vec<&str> = doc["project"]["dependencies"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(
            deps,
            vec![
                "protobuf>=4.21.0,<5.0.0",
                "grpcio>=1.50.0,<2.0.0",
                "grpcio-tools>=1.50.0,<2.0.0"
            ]
        );

        assert_eq!(doc["tool"]["setuptools"]["zip-safe"].as_bool(), Some(false));
        assert_eq!(doc["tool"]["setuptools"]["package-dir"][""].as_str(), Some("gen/python"));
        assert_eq!(
            doc["project"]["urls"]["Homepage"].as_str(),
            Some("https://github.com/Combine-Capital/cqc")
        );
        assert!(!text.contains("readme"));
        assert!(!text.contains("\n[tool]\n"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let a = artifact(&["cqc.v1"]);
        assert_eq!(PyProjectRenderer.render(&a), PyProjectRenderer.render(&a));
        assert_eq!(CargoRenderer.render(&a), CargoRenderer.render(&a));
    }

    #[test]
    fn test_cargo_manifest_dependencies() {
        let artifact = artifact_with(&["cqc.v1"], &["prost>=0.12.0,<0.13.0", "tonic>=0.11.0,<0.12.0", "bytes"]);
        let text = CargoRenderer.render(&artifact);
        let doc: Document = text.parse().unwrap();
        assert_eq!(doc["package"]["name"].as_str(), Some("cqc"));
        assert_eq!(doc["lib"]["path"].as_str(), Some("src/lib.rs"));
        assert_eq!(doc["dependencies"]["prost"].as_str(), Some(">=0.12.0,<0.13.0"));
        assert_eq!(doc["dependencies"]["tonic"].as_str(), Some(">=0.11.0,<0.12.0"));
        assert_eq!(doc["dependencies"]["bytes"].as_str(), Some("*"));
    }

    #[test]
    fn test_lib_rs_module_tree() {
        let text = RustLibRenderer.render(&artifact(&["cqc.markets.v1", "cqc.type.v1", "cqc.v1"]));
        let expected = "\
// Generated by cqc-forge for cqc-0.1.0. Do not edit.

pub mod cqc {
    pub mod markets {
        pub mod v1 {
            include!(\"cqc.markets.v1.rs\");
        }
    }
    pub mod r#type {
        pub mod v1 {
            include!(\"cqc.type.v1.rs\");
        }
    }
    pub mod v1 {
        include!(\"cqc.v1.rs\");
    }
}
";
        assert_eq!(text, expected);
    }
}
