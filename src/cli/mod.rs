pub mod args;
pub mod commands;
pub mod event_ui;
pub mod root;
pub mod ui;

pub use args::{validate_generate_args, Args, CacheAction, Commands, GenerateArgs};
pub use event_ui::{ProgressDisplay, QuietDisplay};
pub use root::RootCommand;
