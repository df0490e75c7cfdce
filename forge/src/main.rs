use clap::Parser;
use cqc_forge::args::{Cli, Commands};
use cqc_forge::builder::{self, AssembleOptions, BuildOptions};
use cqc_forge::config::ForgeConfig;
use cqc_forge::error::ForgeError;
use cqc_forge::{discovery, generator, schema};
use log::{error, info};
use thiserror::Error;

// Define Main CLI Errors
#[derive(Error, Debug)]
enum CliError {
    #[error("Forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> Result<(), CliError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .map_err(ForgeError::from)?;

    let cli = Cli::parse();

    if let Err(e) = load_config(&cli).and_then(|config| run(&cli.command, &config)) {
        error!("{} failed: {}", command_name(&cli.command), e);
        return Err(e);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ForgeConfig, CliError> {
    let mut config = ForgeConfig::load(cli.config.as_deref())?;
    if let Some(target) = cli.target {
        config.target = target;
    }
    Ok(config)
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Schemas { .. } => "Schema check",
        Commands::Generate => "Generation",
        Commands::Discover { .. } => "Discovery",
        Commands::Build { .. } => "Build",
    }
}

fn run(command: &Commands, config: &ForgeConfig) -> Result<(), CliError> {
    match command {
        Commands::Schemas { json } => {
            let schemas = schema::load_schemas(&config.schema_dir())?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&schemas)?);
            } else {
                for s in &schemas {
                    let rpcs: usize = s.services.iter().map(|svc| svc.methods.len()).sum();
                    println!(
                        "{:<40} {:<8} {:>3} message(s) {:>3} service(s) {:>3} rpc(s)",
                        s.name(),
                        s.version().unwrap_or("-"),
                        s.messages.len(),
                        s.services.len(),
                        rpcs
                    );
                }
            }
        }
        Commands::Generate => {
            let schema_dir = config.schema_dir();
            let schemas = schema::load_schemas(&schema_dir)?;
            let generator = generator::generator_for(config.target);
            let modules = generator::generate_modules(
                generator.as_ref(),
                &schema_dir,
                &schemas,
                &config.generated_root(),
            )?;
            let files: usize = modules.iter().map(|m| m.files.len()).sum();
            info!(
                "Generated {} file(s) for {} schema(s) into {}",
                files,
                modules.len(),
                config.generated_root().display()
            );
        }
        Commands::Discover { json } => {
            let packages = discovery::discover_packages_filtered(
                &config.generated_root(),
                config.target,
                &config.discovery,
            )?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&packages)?);
            } else {
                for package in &packages {
                    println!("{}", package);
                }
            }
        }
        Commands::Build {
            skip_generate,
            archive,
            overwrite,
        } => {
            info!(
                "Building {} for {}...",
                config.package.distribution_name(),
                config.target
            );
            let options = BuildOptions {
                skip_generate: *skip_generate,
                assemble: AssembleOptions {
                    archive: *archive,
                    overwrite: *overwrite,
                },
            };
            let report = builder::run_build(config, &options)?;
            info!("Build complete!");
            info!("Artifact available at: {}", report.output_dir.display());
            if let Some(archive) = &report.archive {
                info!("Archive available at: {}", archive.display());
            }
            println!("sha256:{}", report.digest);
        }
    }
    Ok(())
}
