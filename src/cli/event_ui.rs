//! Listener implementations that render orchestrator events in the terminal

use indicatif::ProgressBar;

use crate::cli::ui::{progress, truncate_display, StatusPrinter};
use crate::listener::{GenerationEvent, GenerationListener};
use crate::task::Status;

/// Percent bar plus status lines for one CLI run
pub struct ProgressDisplay {
    printer: StatusPrinter,
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new(subject_id: &str) -> Self {
        Self {
            printer: StatusPrinter::new(),
            bar: progress::create_percent_bar(&truncate_display(subject_id, 40)),
        }
    }

    /// Remove the bar if it is still drawing (e.g. on interrupt)
    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl<A> GenerationListener<A> for ProgressDisplay {
    fn on_event(&self, event: &GenerationEvent<A>) {
        match event {
            GenerationEvent::Progress { progress, stage, .. } => {
                self.bar.set_position(u64::from(*progress));
                if let Some(stage) = stage {
                    self.bar.set_message(stage.clone());
                }
            }
            GenerationEvent::CacheHit { subject_id, fingerprint, .. } => {
                self.printer
                    .info("Cached", &format!("{} ({})", subject_id, fingerprint));
            }
            GenerationEvent::StatusChanged {
                subject_id,
                fingerprint,
                status,
                error,
                ..
            } => match status {
                Status::Generating => {
                    self.bar.reset();
                    self.printer
                        .status("Generating", &format!("{} ({})", subject_id, fingerprint));
                }
                Status::Completed => {
                    self.bar.finish_and_clear();
                    self.printer.success("Generated", subject_id);
                }
                Status::Failed => {
                    self.bar.abandon();
                    let reason = error
                        .as_ref()
                        .map_or_else(|| "unknown error".to_string(), ToString::to_string);
                    self.printer
                        .error("Failed", &format!("{}: {}", subject_id, reason));
                }
                Status::Idle => self.printer.dim(&format!("{} reset", subject_id)),
                Status::Cached => {}
            },
        }
    }
}

/// Spinner-free display that prints only terminal outcomes
pub struct QuietDisplay {
    printer: StatusPrinter,
}

impl QuietDisplay {
    pub fn new() -> Self {
        Self {
            printer: StatusPrinter::new(),
        }
    }
}

impl Default for QuietDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> GenerationListener<A> for QuietDisplay {
    fn on_event(&self, event: &GenerationEvent<A>) {
        if let GenerationEvent::StatusChanged {
            subject_id,
            status: Status::Failed,
            error: Some(error),
            ..
        } = event
        {
            self.printer.error("Failed", &format!("{}: {}", subject_id, error));
        }
    }
}
