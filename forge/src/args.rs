use crate::language::TargetLanguage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Package builder for the CQC protobuf contracts.
#[derive(Parser, Debug)]
#[command(name = "cqc-forge", version)]
#[command(about = "Generates and packages the CQC trading contracts", long_about = None)]
pub struct Cli {
    /// Build configuration file (default: ./forge.toml if present).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured target language.
    #[arg(short, long, global = true)]
    pub target: Option<TargetLanguage>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the Forge tool.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile and validate every schema, then list them.
    Schemas {
        /// Print the inventory as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the code generator for the target language.
    Generate,
    /// List the importable packages in the generated tree.
    Discover {
        /// Print the package list as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Generate, discover and assemble the distributable artifact.
    Build {
        /// Package the existing generated tree without regenerating it.
        #[arg(long)]
        skip_generate: bool,

        /// Also write a zip archive of the artifact.
        #[arg(long)]
        archive: bool,

        /// Replace an existing artifact of the same version.
        #[arg(long)]
        overwrite: bool,
    },
}
