use std::io::{self, Stdout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use crossterm::{
    cursor,
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use super::Stage;
use crate::lifecycle::UiTeardown;

pub type RosterTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Terminal-side teardown: restores the tty and closes the stage
pub struct TerminalUi {
    stage: Arc<Stage>,
    restored: AtomicBool,
}

impl TerminalUi {
    pub fn new(stage: Arc<Stage>) -> Self {
        Self {
            stage,
            restored: AtomicBool::new(false),
        }
    }

    /// Switch to raw mode and the alternate screen
    pub fn enter(&self) -> Result<RosterTerminal> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)
            .context("Failed to enter alternate screen")?;
        self.restored.store(false, Ordering::SeqCst);

        Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")
    }

    /// Leave raw mode and the alternate screen; later calls do nothing
    pub fn restore(&self) -> Result<()> {
        if self.restored.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        disable_raw_mode().context("Failed to disable raw mode")?;
        execute!(io::stdout(), LeaveAlternateScreen, cursor::Show)
            .context("Failed to leave alternate screen")?;
        log::debug!(target: "roster::tui", "Terminal restored");
        Ok(())
    }
}

impl UiTeardown for TerminalUi {
    fn release_ui(&self) -> Result<()> {
        self.restore()
    }

    fn close_main_window(&self) -> Result<()> {
        self.stage.close();
        Ok(())
    }
}
