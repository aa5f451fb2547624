pub mod cache;
pub mod generate;
pub mod status;

pub use cache::handle_cache_command;
pub use generate::run_generate_command;
pub use status::run_status_command;

use anyhow::{bail, Result};
use async_trait::async_trait;
use genorch_cache::FilePersistence;
use serde_json::Value;

use crate::compute::{ComputeFunction, ProgressReporter};
use crate::config::GenorchConfig;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};

/// Orchestrator over JSON configs and JSON artifacts, as the CLI uses it
pub type CliOrchestrator = Orchestrator<Value, Value>;

/// Compute for commands that only read or clean the cache
struct NoGenerator;

#[async_trait]
impl ComputeFunction<Value, Value> for NoGenerator {
    async fn compute(&self, subject_id: &str, _config: &Value, _progress: ProgressReporter) -> Result<Value> {
        bail!("No generator configured for {}", subject_id)
    }
}

/// Build an orchestrator backed by the configured cache file
pub fn open_orchestrator<F>(config: &GenorchConfig, compute: F, settings: OrchestratorSettings) -> Result<CliOrchestrator>
where
    F: ComputeFunction<Value, Value> + 'static,
{
    Ok(Orchestrator::builder(compute)
        .persistence(FilePersistence::new(&config.cache.path))
        .settings(settings)
        .fingerprinter(config.to_fingerprinter()?)
        .build())
}

/// Orchestrator for status and cache maintenance commands
pub fn open_cache(config: &GenorchConfig) -> Result<CliOrchestrator> {
    open_orchestrator(config, NoGenerator, config.to_orchestrator_settings()?)
}
