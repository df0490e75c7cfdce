use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language binding the schemas are generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    Python,
    Rust,
}

impl TargetLanguage {
    /// Directory name used below the generated-source root (`gen/python`, `gen/rust`).
    pub fn dir_name(&self) -> &'static str {
        match self {
            TargetLanguage::Python => "python",
            TargetLanguage::Rust => "rust",
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(TargetLanguage::Python),
            "rust" | "rs" => Ok(TargetLanguage::Rust),
            other => Err(format!("unsupported target language '{}'", other)),
        }
    }
}
