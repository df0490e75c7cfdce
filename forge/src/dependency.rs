//! Dependency constraints declared by the package artifact.
//!
//! A constraint keeps its range exactly as written (`>=4.21.0,<5.0.0`); the
//! parsed [`VersionRange`] is only used to check pinned generator versions.

use crate::error::{ForgeError, Result};
use crate::language::TargetLanguage;
use log::warn;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const OPERATOR_CHARS: &[char] = &['<', '>', '=', '!', '~'];

/// A named external library plus an acceptable version range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConstraint {
    name: String,
    range: String,
}

impl DependencyConstraint {
    /// Creates a constraint after checking that both parts are well formed.
    ///
    /// The range is stored verbatim; an empty range means "any version".
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let range = range.into();
        let spec = format!("{}{}", name, range);

        if name.is_empty() {
            return Err(invalid(&spec, "missing dependency name"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(&spec, "dependency name has illegal characters"));
        }
        if !range.trim().is_empty() {
            VersionRange::parse(&range).map_err(|reason| invalid(&spec, &reason))?;
        }

        Ok(Self { name, range })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The range exactly as it was declared.
    pub fn range(&self) -> &str {
        &self.range
    }

    /// Name with separators normalised, for comparing `grpcio_tools` with `grpcio-tools`.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn requirement(&self) -> Result<VersionRange> {
        VersionRange::parse(&self.range).map_err(|reason| invalid(&self.to_string(), &reason))
    }

    /// Returns true if `version` lies inside the declared range.
    pub fn accepts(&self, version: &str) -> Result<bool> {
        let parsed = parse_version(version)
            .map(|(v, _)| v)
            .ok_or_else(|| invalid(version, "not a version number"))?;
        Ok(self.requirement()?.matches(&parsed))
    }
}

impl fmt::Display for DependencyConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.range)
    }
}

impl FromStr for DependencyConstraint {
    type Err = ForgeError;

    /// Parses `name<range>`, e.g. `grpcio>=1.50.0,<2.0.0`.
    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        if spec.contains(';') || spec.contains('[') {
            return Err(invalid(spec, "extras and environment markers are not supported"));
        }
        let split = spec
            .find(|c: char| OPERATOR_CHARS.contains(&c) || c.is_whitespace())
            .unwrap_or(spec.len());
        let (name, range) = spec.split_at(split);
        DependencyConstraint::new(name.trim(), range.trim())
    }
}

fn invalid(spec: &str, reason: &str) -> ForgeError {
    ForgeError::InvalidConstraint {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Ge(Version),
    Gt(Version),
    Le(Version),
    Lt(Version),
    Eq(Version),
    /// `==1.4.*`: the leading components must match.
    EqPrefix(Vec<u64>),
    Ne(Version),
    /// `~=1.4.2`: at least the version and sharing all but the last component.
    Compatible(Version, Vec<u64>),
}

impl Clause {
    fn matches(&self, v: &Version) -> bool {
        match self {
            Clause::Ge(bound) => v >= bound,
            Clause::Gt(bound) => v > bound,
            Clause::Le(bound) => v <= bound,
            Clause::Lt(bound) => v < bound,
            Clause::Eq(bound) => v == bound,
            Clause::Ne(bound) => v != bound,
            Clause::EqPrefix(prefix) => prefix_matches(v, prefix),
            Clause::Compatible(bound, prefix) => v >= bound && prefix_matches(v, prefix),
        }
    }
}

fn prefix_matches(v: &Version, prefix: &[u64]) -> bool {
    let parts = [v.major, v.minor, v.patch];
    prefix.iter().zip(parts.iter()).all(|(a, b)| a == b)
}

/// Interpreted form of a comma separated range such as `>=1.50.0,<2.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    clauses: Vec<Clause>,
}

impl VersionRange {
    pub fn parse(range: &str) -> std::result::Result<Self, String> {
        let mut clauses = Vec::new();
        for raw in range.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                if range.trim().is_empty() {
                    continue;
                }
                return Err("empty clause in version range".to_string());
            }
            clauses.push(parse_clause(raw)?);
        }
        Ok(Self { clauses })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(version))
    }

    /// True when the range places no restriction at all.
    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }
}

fn parse_clause(raw: &str) -> std::result::Result<Clause, String> {
    let op_len = raw
        .find(|c: char| !OPERATOR_CHARS.contains(&c))
        .ok_or_else(|| format!("clause '{}' has no version", raw))?;
    let (op, version) = raw.split_at(op_len);
    let version = version.trim();

    if op == "==" && version.ends_with(".*") {
        let prefix = version
            .trim_end_matches(".*")
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| format!("bad wildcard '{}'", version)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        return Ok(Clause::EqPrefix(prefix));
    }

    let (parsed, components) =
        parse_version(version).ok_or_else(|| format!("'{}' is not a version number", version))?;

    match op {
        ">=" => Ok(Clause::Ge(parsed)),
        ">" => Ok(Clause::Gt(parsed)),
        "<=" => Ok(Clause::Le(parsed)),
        "<" => Ok(Clause::Lt(parsed)),
        "==" | "=" => Ok(Clause::Eq(parsed)),
        "!=" => Ok(Clause::Ne(parsed)),
        "~=" => {
            if components < 2 {
                return Err(format!("'~={}' needs at least two components", version));
            }
            let all = [parsed.major, parsed.minor, parsed.patch];
            let prefix = all[..components - 1].to_vec();
            Ok(Clause::Compatible(parsed, prefix))
        }
        other => Err(format!("unknown operator '{}'", other)),
    }
}

/// Parses `1`, `1.50` or `1.50.3[-pre]` into a full semantic version.
///
/// Returns the version together with the number of numeric components written.
pub(crate) fn parse_version(s: &str) -> Option<(Version, usize)> {
    let s = s.trim().trim_start_matches('v');
    let (core, pre) = match s.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (s, None),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
        return None;
    }
    let mut padded = parts.clone();
    while padded.len() < 3 {
        padded.push("0");
    }
    let mut text = padded.join(".");
    if let Some(pre) = pre {
        text.push('-');
        text.push_str(pre);
    }
    Version::parse(&text).ok().map(|v| (v, parts.len()))
}

/// Rejects ranges the target's package manager cannot read.
///
/// Python accepts everything [`VersionRange`] understands. Cargo has no `~=`
/// or `==x.*`, so Rust ranges must also parse as a [`VersionReq`].
pub fn check_target_ranges(
    constraints: &[DependencyConstraint],
    language: TargetLanguage,
) -> Result<()> {
    if language != TargetLanguage::Rust {
        return Ok(());
    }
    for constraint in constraints.iter().filter(|c| !c.range().trim().is_empty()) {
        VersionReq::parse(constraint.range()).map_err(|e| {
            invalid(
                &constraint.to_string(),
                &format!("not a Cargo version requirement: {}", e),
            )
        })?;
    }
    Ok(())
}

/// Verifies that every pinned generator/runtime version satisfies its declared range.
///
/// Pins for libraries that are not declared as dependencies are reported and ignored.
pub fn check_runtime_compatibility(
    constraints: &[DependencyConstraint],
    runtime_versions: &BTreeMap<String, String>,
) -> Result<()> {
    for (name, version) in runtime_versions {
        let wanted = normalize_name(name);
        let Some(constraint) = constraints.iter().find(|c| c.normalized_name() == wanted) else {
            warn!("Pinned runtime {} {} is not a declared dependency", name, version);
            continue;
        };
        if !constraint.accepts(version)? {
            return Err(ForgeError::IncompatibleDependency {
                name: constraint.name().to_string(),
                range: constraint.range().to_string(),
                version: version.clone(),
            });
        }
    }
    Ok(())
}
