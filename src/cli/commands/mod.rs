pub mod records;
pub mod tui;

// Re-export record commands
pub use records::{AddArgs, add_command, export_command, list_command};

// Re-export TUI command
pub use tui::tui_command;
