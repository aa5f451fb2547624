use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Deduplicated, cached and cancellable artifact generation",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Settings file (TOML); defaults to ~/.config/genorch/config.toml merged with ./genorch.toml
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Cache snapshot file, overriding the settings
    #[arg(long, global = true)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an artifact for a subject by running a generator program
    Generate(GenerateArgs),

    /// Show the status of a subject, optionally for one config
    Status {
        subject: String,

        /// Generation config (JSON file)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the cached artifact as well
        #[arg(long)]
        show: bool,
    },

    /// Inspect or clean the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print the default settings file
    InitConfig {
        /// Write it to ~/.config/genorch/config.toml instead of printing
        #[arg(long)]
        write: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct GenerateArgs {
    pub subject: String,

    /// Generation config (JSON file); an empty object when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Generator program; receives {"subject", "config"} on stdin, prints the artifact as JSON
    #[arg(long = "command", value_name = "PROGRAM")]
    pub generator: PathBuf,

    /// Argument passed to the generator (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub generator_args: Vec<String>,

    /// Ignore a cached artifact and regenerate
    #[arg(short, long)]
    pub force: bool,

    /// Deadline for the generator in seconds, overriding the settings
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Write the artifact here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only print the outcome, no progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show cache statistics and limits
    Stats,

    /// List cached artifacts
    List,

    /// Remove cached artifacts
    Clear {
        /// Only this subject
        #[arg(long)]
        subject: Option<String>,

        /// Only the artifact for this config (JSON file); requires --subject
        #[arg(short, long, requires = "subject")]
        config: Option<PathBuf>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove expired artifacts
    Purge,
}

pub fn validate_generate_args(args: &GenerateArgs) -> Result<()> {
    if args.subject.trim().is_empty() {
        return Err(anyhow!("Subject must not be empty"));
    }

    if let Some(config) = &args.config {
        if !config.exists() {
            return Err(anyhow!("Config file not found: {}", config.display()));
        }
    }

    if args.timeout == Some(0) {
        return Err(anyhow!("Timeout must be at least 1 second"));
    }

    Ok(())
}

/// Read a generation config from a JSON file; `{}` when no file is given
pub fn load_generation_config(path: Option<&Path>) -> Result<Value> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
            serde_json::from_str(&content)
                .map_err(|e| anyhow!("Invalid JSON in config {}: {}", path.display(), e))
        }
        None => Ok(Value::Object(Default::default())),
    }
}
