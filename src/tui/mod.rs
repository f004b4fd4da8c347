//! Terminal view layer for the roster
//!
//! Owns the screen kinds, the view factory handed to the
//! [`ScreenCoordinator`], and the [`Stage`] the terminal loop paints from.

pub mod handlers;
pub mod keys;
pub mod terminal;
pub mod views;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use serde::{Deserialize, Serialize};

use crate::lifecycle::{
    HandlerContext, LifecycleController, ProcessExit, ResourceRegistry, ScreenCoordinator, ScreenKind,
    ShutdownOrchestrator, TaskRegistry, UiDispatcher, UiTeardown, ViewFactory, ViewMode,
};
use crate::records::Roster;

pub use terminal::TerminalUi;
pub use views::{DetailView, FormMode, FormView, Intent, ListView, RosterView};

/// The roster's screens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    List,
    Detail,
    Add,
    Edit,
}

impl ScreenKind for Screen {
    fn all() -> &'static [Self] {
        &[Screen::List, Screen::Detail, Screen::Add, Screen::Edit]
    }
}

pub type RosterScreens = ScreenCoordinator<Screen, RosterViews>;
pub type RosterController = LifecycleController<Screen, RosterViews>;
pub type RosterContext = HandlerContext<Screen, RosterViews>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// What the terminal currently shows
#[derive(Default)]
pub struct Stage {
    visible: Mutex<Option<(Screen, Arc<RosterView>)>>,
    status: Mutex<Option<(StatusLevel, String)>>,
    status_generation: AtomicU64,
    closed: AtomicBool,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, kind: Screen, view: Arc<RosterView>) {
        *lock(&self.visible) = Some((kind, view));
    }

    pub fn visible(&self) -> Option<(Screen, Arc<RosterView>)> {
        lock(&self.visible).clone()
    }

    /// Set the status line, returning its generation for [`Stage::clear_status`]
    pub fn set_status(&self, level: StatusLevel, message: impl Into<String>) -> u64 {
        let mut status = lock(&self.status);
        *status = Some((level, message.into()));
        self.status_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Clear the status line unless a newer message replaced it
    pub fn clear_status(&self, generation: u64) {
        let mut status = lock(&self.status);
        if self.status_generation.load(Ordering::SeqCst) == generation {
            *status = None;
        }
    }

    pub fn status(&self) -> Option<(StatusLevel, String)> {
        lock(&self.status).clone()
    }

    /// Marks the main window closed; the terminal loop exits on its next frame
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds roster views and puts them on the stage
pub struct RosterViews {
    roster: Arc<Roster>,
    stage: Arc<Stage>,
}

impl RosterViews {
    pub fn new(roster: Arc<Roster>, stage: Arc<Stage>) -> Self {
        Self { roster, stage }
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn stage(&self) -> &Arc<Stage> {
        &self.stage
    }
}

impl ViewFactory<Screen> for RosterViews {
    type View = RosterView;

    fn construct(&self, kind: Screen) -> Result<RosterView> {
        Ok(match kind {
            Screen::List => RosterView::List(ListView::new(self.roster.filter(""))),
            Screen::Detail => RosterView::Detail(DetailView::new()),
            Screen::Add => RosterView::Form(FormView::new(FormMode::Add)),
            Screen::Edit => RosterView::Form(FormView::new(FormMode::Edit)),
        })
    }

    fn display(&self, kind: Screen, view: &Arc<RosterView>) -> Result<()> {
        self.stage.show(kind, Arc::clone(view));
        Ok(())
    }
}

/// How the app is put together
#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    pub mode: ViewMode,
    pub exit_on_complete: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            mode: ViewMode::Lazy,
            exit_on_complete: true,
        }
    }
}

/// Wire the registry, coordinator, orchestrator and handlers together
///
/// Must be called from inside a tokio runtime. The roster is registered as a
/// managed resource so shutdown flushes unsaved edits.
pub fn assemble(
    roster: Arc<Roster>,
    stage: Arc<Stage>,
    ui: Arc<dyn UiDispatcher>,
    teardown: Arc<dyn UiTeardown>,
    process: Arc<dyn ProcessExit>,
    options: AppOptions,
) -> Result<RosterController> {
    let tasks = Arc::new(TaskRegistry::current()?);

    let resources = Arc::new(ResourceRegistry::new());
    resources.register(roster.clone());

    let screens = ScreenCoordinator::new(RosterViews::new(roster, stage), ui.clone(), options.mode);
    let shutdown = Arc::new(
        ShutdownOrchestrator::new(tasks.clone(), teardown, resources, process)
            .exit_on_complete(options.exit_on_complete),
    );

    let mut controller = LifecycleController::new(tasks, screens, shutdown, ui);
    handlers::register(&mut controller);
    log::info!(
        target: "roster::tui",
        "Assembled roster app ({:?} views, {} record(s))",
        options.mode,
        controller.screens().factory().roster().len()
    );
    Ok(controller)
}

/// Event that opens `screen` at startup; screens needing a record fall back
/// to the list
pub fn initial_event(screen: Screen) -> &'static str {
    match screen {
        Screen::Add => "show_add",
        Screen::List => "show_list",
        Screen::Detail | Screen::Edit => {
            log::warn!(target: "roster::tui", "Cannot open {:?} without a record, starting on the list", screen);
            "show_list"
        }
    }
}

/// Paint the stage: title bar, visible view, status or key hints
pub fn draw(frame: &mut Frame, stage: &Stage) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let visible = stage.visible();
    let title = visible.as_ref().map(|(_, view)| view.title()).unwrap_or("Loading");
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(" roster ", Style::default().fg(Color::Black).bg(Color::Cyan).bold()),
            Span::raw(" "),
            Span::raw(title),
        ])),
        header,
    );

    if let Some((_, view)) = &visible {
        view.render(frame, body);
    }

    let footer_line = match stage.status() {
        Some((StatusLevel::Error, message)) => Line::from(Span::styled(message, Style::default().fg(Color::Red))),
        Some((StatusLevel::Info, message)) => Line::from(Span::styled(message, Style::default().fg(Color::Green))),
        None => Line::from(Span::styled(
            visible.map(|(_, view)| view.hints()).unwrap_or_default(),
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(footer_line), footer);
}
