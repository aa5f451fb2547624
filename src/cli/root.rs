use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::args::{validate_generate_args, Args, Commands};
use crate::cli::commands::{handle_cache_command, run_generate_command, run_status_command};
use crate::config::GenorchConfig;

pub struct RootCommand;

impl RootCommand {
    pub async fn execute() -> Result<()> {
        let args = Args::parse();
        init_logging(args.verbosity);

        if let Commands::InitConfig { write } = &args.command {
            if *write {
                let path = GenorchConfig::ensure_user_config_exists()?;
                eprintln!("Config file: {}", path.display());
            } else {
                println!("{}", GenorchConfig::generate_default_config());
            }
            return Ok(());
        }

        let mut config = GenorchConfig::load(args.settings.as_deref())?;
        if let Some(cache_path) = &args.cache_path {
            config.cache.path = cache_path.clone();
        }

        match &args.command {
            Commands::Generate(generate_args) => {
                validate_generate_args(generate_args)?;
                run_generate_command(generate_args.clone(), &config).await
            }
            Commands::Status { subject, config: config_path, show } => {
                run_status_command(subject, config_path.as_deref(), *show, &config).await
            }
            Commands::Cache { action } => handle_cache_command(action, &config).await,
            Commands::InitConfig { .. } => Ok(()),
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the default level from warn
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init();
}
