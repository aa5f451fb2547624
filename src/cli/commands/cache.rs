//! Cache management commands

use anyhow::Result;
use serde_json::Value;
use std::io::{self, Write};

use crate::cli::args::{load_generation_config, CacheAction};
use crate::cli::commands::open_cache;
use crate::cli::ui::{terminal_width, truncate_display, StatusPrinter};
use crate::config::GenorchConfig;

/// Execute cache command
pub async fn handle_cache_command(action: &CacheAction, config: &GenorchConfig) -> Result<()> {
    let printer = StatusPrinter::new();
    let cache_path = &config.cache.path;

    match action {
        CacheAction::Stats => {
            let orchestrator = open_cache(config)?;
            let stats = orchestrator.cache_stats();

            printer.section("Cache statistics");
            printer.kv("File", &cache_path.display().to_string());
            printer.kv("Entries", &stats.total_cached.to_string());
            printer.kv("Size", &format!("{} bytes", stats.total_size_bytes));
            if let Some(oldest) = stats.oldest_cache {
                printer.kv("Oldest", &oldest.to_rfc3339());
            }
            if let Some(newest) = stats.newest_cache {
                printer.kv("Newest", &newest.to_rfc3339());
            }

            printer.section("Configuration");
            printer.kv("TTL", &format!("{}s", config.cache.ttl_secs));
            printer.kv("Max entries", &config.cache.max_entries.to_string());
            printer.kv("Fingerprint", &config.fingerprint.algorithm);

            if stats.total_cached == 0 {
                printer.dim("Cache is empty");
            } else if config.cache.max_entries > 0 {
                let usage_pct = stats.total_cached as f64 / config.cache.max_entries as f64 * 100.0;
                printer.info("Usage", &format!("{:.1}% of limit", usage_pct));
                if usage_pct >= 100.0 {
                    printer.warning("Full", "the oldest artifact is evicted on the next store");
                }
            }
        }

        CacheAction::List => {
            let entries = open_cache(config)?.cache_entries();
            if entries.is_empty() {
                printer.dim("Cache is empty");
            }

            let subject_width = terminal_width().saturating_sub(60).clamp(16, 48);
            for entry in entries {
                let size = entry
                    .metadata
                    .get("size_bytes")
                    .and_then(Value::as_u64)
                    .map_or_else(String::new, |size| format!(" {} bytes", size));
                println!(
                    "{:<width$} {:<16} expires {}{}",
                    truncate_display(&entry.subject_id, subject_width),
                    entry.fingerprint,
                    entry.expires_at.to_rfc3339(),
                    size,
                    width = subject_width
                );
            }
        }

        CacheAction::Clear { subject, config: config_path, yes } => {
            let orchestrator = open_cache(config)?;
            let stats = orchestrator.cache_stats();

            let scope = match subject {
                Some(subject) => format!("cached artifacts of {}", subject),
                None => format!("ALL {} cached artifacts", stats.total_cached),
            };
            printer.warning("Clear", &format!("This will delete {}", scope));

            if !yes {
                eprint!("   Continue? [y/N]: ");
                io::stderr().flush()?;

                let mut input = String::new();
                io::stdin().read_line(&mut input)?;

                if !input.trim().eq_ignore_ascii_case("y") {
                    printer.dim("Aborted");
                    return Ok(());
                }
            }

            let removed = match subject {
                Some(subject) => {
                    let generation_config = config_path
                        .as_deref()
                        .map(|path| load_generation_config(Some(path)))
                        .transpose()?;
                    orchestrator.clear_cache(subject, generation_config.as_ref())?
                }
                None => orchestrator.clear_all_cache(),
            };
            printer.success("Removed", &format!("{} entries", removed));
        }

        CacheAction::Purge => {
            let orchestrator = open_cache(config)?;
            let removed = orchestrator.purge_expired();
            printer.success("Purged", &format!("{} expired entries", removed));
        }
    }

    Ok(())
}
