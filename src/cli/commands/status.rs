//! Status command

use anyhow::Result;

use crate::cli::args::load_generation_config;
use crate::cli::commands::open_cache;
use crate::cli::ui::StatusPrinter;
use crate::config::GenorchConfig;
use crate::task::Status;

pub async fn run_status_command(
    subject: &str,
    config_path: Option<&std::path::Path>,
    show: bool,
    config: &GenorchConfig,
) -> Result<()> {
    let printer = StatusPrinter::new();
    let orchestrator = open_cache(config)?;

    let generation_config = match config_path {
        Some(path) => Some(load_generation_config(Some(path))?),
        None => None,
    };

    let status = orchestrator.status(subject, generation_config.as_ref())?;

    printer.section(subject);
    printer.kv("Status", &printer.status_label(status));
    if let Some(generation_config) = &generation_config {
        printer.kv("Fingerprint", &orchestrator.fingerprint(generation_config)?);
    }

    if show && status == Status::Cached {
        if let Some(artifact) = orchestrator.result(subject, generation_config.as_ref())? {
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
    }

    Ok(())
}
