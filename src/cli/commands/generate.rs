//! Generate command: one generation through the orchestrator

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cli::args::{load_generation_config, GenerateArgs};
use crate::cli::commands::open_orchestrator;
use crate::cli::event_ui::{ProgressDisplay, QuietDisplay};
use crate::cli::ui::StatusPrinter;
use crate::compute::CommandCompute;
use crate::config::GenorchConfig;
use crate::listener::{GenerationEvent, GenerationListener};
use crate::orchestrator::StartOutcome;
use crate::task::Status;

pub async fn run_generate_command(args: GenerateArgs, config: &GenorchConfig) -> Result<()> {
    let printer = StatusPrinter::new();
    let generation_config = load_generation_config(args.config.as_deref())?;

    let mut settings = config.to_orchestrator_settings()?;
    if let Some(timeout) = args.timeout {
        settings.generation_timeout = Some(Duration::from_secs(timeout));
    }

    let compute = CommandCompute::new(&args.generator).with_args(args.generator_args.iter().cloned());
    let orchestrator = open_orchestrator(config, compute, settings)?;
    let fingerprint = orchestrator.fingerprint(&generation_config)?;

    let display = if args.quiet {
        orchestrator.subscribe(QuietDisplay::new());
        None
    } else {
        let display = Arc::new(ProgressDisplay::new(&args.subject));
        let listener = display.clone();
        orchestrator.subscribe(move |event: &GenerationEvent<Value>| listener.on_event(event));
        Some(display)
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subject = args.subject.clone();
    let wanted = fingerprint.clone();
    orchestrator.subscribe(move |event: &GenerationEvent<Value>| {
        if event.subject_id() == subject && event.fingerprint() == wanted {
            let _ = tx.send(event.clone());
        }
    });

    let started = Instant::now();
    let outcome = orchestrator.start_generation(&args.subject, generation_config.clone(), args.force)?;

    let artifact = match outcome {
        StartOutcome::Cached => orchestrator
            .result(&args.subject, Some(&generation_config))
            .map_err(anyhow::Error::from)
            .and_then(|artifact| {
                artifact.ok_or_else(|| anyhow!("Cached artifact for {} disappeared", args.subject))
            }),
        StartOutcome::Started | StartOutcome::AlreadyRunning => wait_for_outcome(&mut rx).await,
    };
    if let Some(display) = &display {
        display.finish();
    }
    let artifact = artifact?;

    if !args.quiet {
        printer.info(
            "Finished",
            &format!("{} in {:.2}s (fingerprint {})", args.subject, started.elapsed().as_secs_f64(), fingerprint),
        );
    }

    let rendered = serde_json::to_string_pretty(&artifact)?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, rendered)?;
            printer.status("Wrote", &path.display().to_string());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Wait for the terminal status of the generation the CLI started
async fn wait_for_outcome(rx: &mut mpsc::UnboundedReceiver<GenerationEvent<Value>>) -> Result<Value> {
    while let Some(event) = rx.recv().await {
        if let GenerationEvent::StatusChanged {
            status, result, error, ..
        } = event
        {
            match status {
                Status::Completed => {
                    return result.ok_or_else(|| anyhow!("Generation completed without an artifact"));
                }
                Status::Failed => {
                    let error = error.map_or_else(|| "unknown error".to_string(), |e| e.to_string());
                    return Err(anyhow!("Generation failed: {}", error));
                }
                _ => {}
            }
        }
    }

    Err(anyhow!("Orchestrator stopped before the generation finished"))
}
