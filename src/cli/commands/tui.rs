use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent};
use ratatui::{Terminal, backend::Backend};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::lifecycle::{StdProcessExit, UiDispatcher, UiQueue, UiQueueReceiver};
use crate::records::{CsvStore, Roster};
use crate::tui::{self, AppOptions, RosterController, Stage, TerminalUi, keys};

const FRAME: Duration = Duration::from_millis(16);

pub async fn tui_command(config: &Config) -> Result<()> {
    let roster = Arc::new(Roster::open(CsvStore::new(config.data_path()?))?);
    let stage = Arc::new(Stage::new());
    let terminal_ui = Arc::new(TerminalUi::new(stage.clone()));

    let (queue, mut jobs) = UiQueue::new();
    let ui: Arc<dyn UiDispatcher> = Arc::new(queue);

    let controller = Arc::new(tui::assemble(
        roster,
        stage.clone(),
        ui.clone(),
        terminal_ui.clone(),
        Arc::new(StdProcessExit),
        AppOptions {
            mode: config.view_mode(),
            exit_on_complete: config.shutdown.exit_on_complete,
        },
    )?);

    // SIGINT outside raw mode (e.g. from `kill -INT`) takes the same path as 'q'
    let signal_controller = Arc::clone(&controller);
    let signal_ui = ui.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ui.run_on_ui_thread(Box::new(move || signal_controller.dispatch("quit", Value::Null)));
        }
    });

    let mut terminal = terminal_ui.enter()?;
    controller.dispatch(tui::initial_event(config.views.initial), Value::Null);

    let result = run_tui(&mut terminal, &controller, &stage, &mut jobs).await;

    terminal_ui.restore()?;
    if let Err(err) = &result {
        log::error!(target: "roster::tui", "Terminal loop failed: {:#}", err);
        controller.shutdown().initiate(Some("terminal loop failed"));
    }
    result
}

async fn run_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    controller: &RosterController,
    stage: &Stage,
    jobs: &mut UiQueueReceiver,
) -> Result<()> {
    // Windows terminals can send duplicate Tab events within milliseconds
    let mut last_key_event: Option<(KeyEvent, Instant)> = None;
    const DEDUP_WINDOW_MS: u128 = 10;

    loop {
        let frame_start = Instant::now();

        // Input first for minimal latency
        while event::poll(Duration::from_millis(0))? {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if !keys::is_press(&key) {
                continue;
            }

            // Don't deduplicate Char events, that breaks paste
            if !matches!(key.code, KeyCode::Char(_)) {
                if let Some((last_key, last_time)) = last_key_event {
                    let elapsed = frame_start.duration_since(last_time).as_millis();
                    if elapsed < DEDUP_WINDOW_MS && last_key.code == key.code && last_key.modifiers == key.modifiers {
                        log::debug!(target: "roster::tui", "Skipping duplicate key event: {:?} ({}ms since last)", key.code, elapsed);
                        continue;
                    }
                }
            }
            last_key_event = Some((key, frame_start));

            if keys::is_force_quit(&key) {
                controller.dispatch("quit", Value::Null);
                continue;
            }

            if let Some((_, view)) = stage.visible() {
                if let Some(intent) = view.handle_key(&key) {
                    controller.dispatch(intent.event, intent.payload);
                }
            }
        }

        // Work marshalled from background tasks
        jobs.drain();

        if stage.is_closed() || controller.shutdown().is_completed() {
            log::info!(target: "roster::tui", "Main window closed, leaving terminal loop");
            break;
        }

        terminal.draw(|frame| tui::draw(frame, stage))?;

        // Sleep for remainder of 16ms frame (60 FPS)
        if let Some(remaining) = FRAME.checked_sub(frame_start.elapsed()) {
            tokio::time::sleep(remaining).await;
        }
    }

    Ok(())
}
