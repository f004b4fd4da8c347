//! Screen views
//!
//! Each view keeps its state behind a mutex so the coordinator can share it
//! as `Arc<RosterView>`. Views never act on input themselves: `handle_key`
//! turns a key into an [`Intent`] that the terminal loop dispatches through
//! the controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style, Stylize};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Row, Table, TableState, Wrap};
use serde_json::{Value, json};
use uuid::Uuid;

use super::keys::{self, KeyBinding};
use crate::records::{Person, PersonDraft};

/// An event the view wants dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub event: &'static str,
    pub payload: Value,
}

impl Intent {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            payload: Value::Null,
        }
    }

    pub fn with(event: &'static str, payload: Value) -> Self {
        Self { event, payload }
    }

    fn for_record(event: &'static str, id: Uuid) -> Self {
        Self::with(event, json!({ "id": id.to_string() }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One of the roster's screens
pub enum RosterView {
    List(ListView),
    Detail(DetailView),
    Form(FormView),
}

impl RosterView {
    pub fn title(&self) -> &'static str {
        match self {
            RosterView::List(_) => "People",
            RosterView::Detail(_) => "Details",
            RosterView::Form(form) => match form.mode {
                FormMode::Add => "New person",
                FormMode::Edit => "Edit person",
            },
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        match self {
            RosterView::List(view) => view.render(frame, area),
            RosterView::Detail(view) => view.render(frame, area),
            RosterView::Form(view) => view.render(frame, area),
        }
    }

    pub fn handle_key(&self, key: &KeyEvent) -> Option<Intent> {
        match self {
            RosterView::List(view) => view.handle_key(key),
            RosterView::Detail(view) => view.handle_key(key),
            RosterView::Form(view) => view.handle_key(key),
        }
    }

    pub fn hints(&self) -> String {
        match self {
            RosterView::List(view) if view.is_filtering() => {
                keys::hints(&[(keys::OPEN, "apply"), (keys::BACK, "clear")])
            }
            RosterView::List(_) => keys::hints(&[
                (keys::OPEN, "open"),
                (keys::ADD, "add"),
                (keys::EDIT, "edit"),
                (keys::DELETE, "delete"),
                (keys::FILTER, "filter"),
                (keys::RELOAD, "reload"),
                (keys::EXPORT, "export"),
                (keys::QUIT, "quit"),
            ]),
            RosterView::Detail(_) => keys::hints(&[
                (keys::BACK, "back"),
                (keys::EDIT, "edit"),
                (keys::DELETE, "delete"),
                (keys::QUIT, "quit"),
            ]),
            RosterView::Form(_) => keys::hints(&[
                (KeyBinding::new(KeyCode::Tab), "next field"),
                (keys::SAVE, "save"),
                (keys::BACK, "cancel"),
            ]),
        }
    }

    pub fn as_list(&self) -> Option<&ListView> {
        match self {
            RosterView::List(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_detail(&self) -> Option<&DetailView> {
        match self {
            RosterView::Detail(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormView> {
        match self {
            RosterView::Form(view) => Some(view),
            _ => None,
        }
    }
}

struct ListState {
    people: Vec<Person>,
    table: TableState,
    query: String,
    filtering: bool,
}

/// Table of people with an inline fuzzy filter
pub struct ListView {
    state: Mutex<ListState>,
}

impl ListView {
    pub fn new(people: Vec<Person>) -> Self {
        let view = Self {
            state: Mutex::new(ListState {
                people: Vec::new(),
                table: TableState::default(),
                query: String::new(),
                filtering: false,
            }),
        };
        view.set_people(people);
        view
    }

    /// Replace the rows, keeping the selection in range
    pub fn set_people(&self, people: Vec<Person>) {
        let mut state = lock(&self.state);
        let selected = match (state.table.selected(), people.len()) {
            (_, 0) => None,
            (Some(index), len) => Some(index.min(len - 1)),
            (None, _) => Some(0),
        };
        state.people = people;
        state.table.select(selected);
    }

    pub fn set_query(&self, query: &str) {
        lock(&self.state).query = query.to_string();
    }

    pub fn query(&self) -> String {
        lock(&self.state).query.clone()
    }

    pub fn is_filtering(&self) -> bool {
        lock(&self.state).filtering
    }

    pub fn len(&self) -> usize {
        lock(&self.state).people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn selected(&self) -> Option<Person> {
        let state = lock(&self.state);
        state.table.selected().and_then(|index| state.people.get(index).cloned())
    }

    fn handle_key(&self, key: &KeyEvent) -> Option<Intent> {
        if self.is_filtering() {
            return self.handle_filter_key(key);
        }

        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                None
            }
            _ if keys::OPEN.matches(key) => {
                self.selected().map(|person| Intent::for_record("show_detail", person.id))
            }
            _ if keys::EDIT.matches(key) => {
                self.selected().map(|person| Intent::for_record("show_edit", person.id))
            }
            _ if keys::DELETE.matches(key) => {
                self.selected().map(|person| Intent::for_record("delete_record", person.id))
            }
            _ if keys::ADD.matches(key) => Some(Intent::new("show_add")),
            _ if keys::FILTER.matches(key) => {
                lock(&self.state).filtering = true;
                None
            }
            _ if keys::RELOAD.matches(key) => Some(Intent::new("reload")),
            _ if keys::EXPORT.matches(key) => Some(Intent::new("export")),
            _ if keys::CLEAR_CACHE.matches(key) => Some(Intent::new("clear_cache")),
            _ if keys::QUIT.matches(key) => Some(Intent::new("quit")),
            _ => None,
        }
    }

    fn handle_filter_key(&self, key: &KeyEvent) -> Option<Intent> {
        let mut state = lock(&self.state);
        match key.code {
            KeyCode::Enter => {
                state.filtering = false;
                None
            }
            KeyCode::Esc => {
                state.filtering = false;
                state.query.clear();
                Some(Intent::with("filter", json!({ "query": "" })))
            }
            KeyCode::Backspace => {
                state.query.pop();
                Some(Intent::with("filter", json!({ "query": state.query })))
            }
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                state.query.push(c);
                Some(Intent::with("filter", json!({ "query": state.query })))
            }
            _ => None,
        }
    }

    fn move_selection(&self, delta: isize) {
        let mut state = lock(&self.state);
        let len = state.people.len();
        if len == 0 {
            return;
        }
        let current = state.table.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1) as usize;
        state.table.select(Some(next));
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let mut state = lock(&self.state);
        let [filter_area, table_area] =
            Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(area);

        let filter_style = if state.filtering {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let filter_text = if state.filtering {
            format!("/{}_", state.query)
        } else if state.query.is_empty() {
            "press / to filter".to_string()
        } else {
            format!("/{}", state.query)
        };
        frame.render_widget(
            Paragraph::new(filter_text)
                .style(filter_style)
                .block(Block::bordered().title("Filter")),
            filter_area,
        );

        let block = Block::bordered().title(format!("People ({})", state.people.len()));
        if state.people.is_empty() {
            let message = if state.query.is_empty() {
                "No records yet. Press a to add one."
            } else {
                "Nobody matches the filter."
            };
            frame.render_widget(
                Paragraph::new(message).style(Style::default().fg(Color::DarkGray)).block(block),
                table_area,
            );
            return;
        }

        let header = Row::new(["Name", "Department", "Title", "Email"])
            .style(Style::default().fg(Color::Yellow).bold());
        let rows: Vec<Row> = state
            .people
            .iter()
            .map(|person| {
                Row::new([
                    person.full_name(),
                    person.department.clone(),
                    person.title.clone(),
                    person.email.clone(),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Percentage(25),
                Constraint::Percentage(20),
                Constraint::Percentage(25),
                Constraint::Percentage(30),
            ],
        )
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().bg(Color::DarkGray).bold())
        .highlight_symbol("> ");

        frame.render_stateful_widget(table, table_area, &mut state.table);
    }
}

/// Read-only view of one person
#[derive(Default)]
pub struct DetailView {
    person: Mutex<Option<Person>>,
}

impl DetailView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, person: Person) {
        *lock(&self.person) = Some(person);
    }

    pub fn person(&self) -> Option<Person> {
        lock(&self.person).clone()
    }

    fn handle_key(&self, key: &KeyEvent) -> Option<Intent> {
        let person = self.person();
        match key.code {
            _ if keys::BACK.matches(key) => Some(Intent::new("show_list")),
            KeyCode::Backspace => Some(Intent::new("show_list")),
            _ if keys::EDIT.matches(key) => person.map(|p| Intent::for_record("show_edit", p.id)),
            _ if keys::DELETE.matches(key) => person.map(|p| Intent::for_record("delete_record", p.id)),
            _ if keys::QUIT.matches(key) => Some(Intent::new("quit")),
            _ => None,
        }
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title("Details");
        let Some(person) = self.person() else {
            frame.render_widget(Paragraph::new("Nothing selected").block(block), area);
            return;
        };

        let label = Style::default().fg(Color::Cyan).bold();
        let field = |name: &'static str, value: String| {
            Line::from(vec![Span::styled(format!("{:<12}", name), label), Span::raw(value)])
        };

        let lines = vec![
            Line::from(person.full_name()).bold(),
            Line::default(),
            field("Email", person.email.clone()),
            field("Department", person.department.clone()),
            field("Title", person.title.clone()),
            field("Phone", person.phone.clone().unwrap_or_else(|| "-".to_string())),
            field("Hired", person.hired_on.format("%Y-%m-%d").to_string()),
            Line::default(),
            Line::from(Span::styled(person.id.to_string(), Style::default().fg(Color::DarkGray))),
        ];

        frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
    }
}

/// Whether a form creates a record or edits one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Add,
    Edit,
}

const FIELD_LABELS: [&str; 7] = [
    "First name",
    "Last name",
    "Email",
    "Department",
    "Title",
    "Phone",
    "Hired on",
];

#[derive(Default)]
struct FormState {
    id: Option<Uuid>,
    fields: [String; 7],
    focus: usize,
    error: Option<String>,
}

/// Editable person form, shared by the add and edit screens
pub struct FormView {
    mode: FormMode,
    state: Mutex<FormState>,
}

impl FormView {
    pub fn new(mode: FormMode) -> Self {
        let view = Self {
            mode,
            state: Mutex::new(FormState::default()),
        };
        view.reset();
        view
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    /// Blank form with today's date as the hire date
    pub fn reset(&self) {
        self.load(PersonDraft {
            hired_on: Local::now().date_naive().format("%Y-%m-%d").to_string(),
            ..PersonDraft::default()
        });
    }

    pub fn load(&self, draft: PersonDraft) {
        *lock(&self.state) = FormState {
            id: draft.id,
            fields: [
                draft.first_name,
                draft.last_name,
                draft.email,
                draft.department,
                draft.title,
                draft.phone,
                draft.hired_on,
            ],
            focus: 0,
            error: None,
        };
    }

    pub fn draft(&self) -> PersonDraft {
        let state = lock(&self.state);
        let [first_name, last_name, email, department, title, phone, hired_on] = state.fields.clone();
        PersonDraft {
            id: state.id,
            first_name,
            last_name,
            email,
            department,
            title,
            phone,
            hired_on,
        }
    }

    pub fn set_error(&self, error: Option<String>) {
        lock(&self.state).error = error;
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    fn handle_key(&self, key: &KeyEvent) -> Option<Intent> {
        if keys::SAVE.matches(key) || key.code == KeyCode::Enter {
            return Some(Intent::with("save_record", json!({ "person": self.draft() })));
        }
        if keys::BACK.matches(key) {
            return Some(match lock(&self.state).id {
                Some(id) => Intent::for_record("show_detail", id),
                None => Intent::new("show_list"),
            });
        }

        let mut state = lock(&self.state);
        let count = state.fields.len();
        match key.code {
            KeyCode::Tab | KeyCode::Down => state.focus = (state.focus + 1) % count,
            KeyCode::BackTab | KeyCode::Up => state.focus = (state.focus + count - 1) % count,
            KeyCode::Backspace => {
                let focus = state.focus;
                state.fields[focus].pop();
            }
            KeyCode::Char(c) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                let focus = state.focus;
                state.fields[focus].push(c);
            }
            _ => {}
        }
        None
    }

    fn render(&self, frame: &mut Frame, area: Rect) {
        let state = lock(&self.state);
        let title = match self.mode {
            FormMode::Add => "New person",
            FormMode::Edit => "Edit person",
        };

        let mut lines: Vec<Line> = FIELD_LABELS
            .iter()
            .zip(state.fields.iter())
            .enumerate()
            .map(|(index, (label, value))| {
                let focused = index == state.focus;
                let marker = if focused { "> " } else { "  " };
                let value_style = if focused {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                };
                let cursor = if focused { "_" } else { "" };
                Line::from(vec![
                    Span::raw(marker),
                    Span::styled(format!("{:<12}", label), Style::default().fg(Color::Cyan)),
                    Span::styled(format!("{}{}", value, cursor), value_style),
                ])
            })
            .collect();

        if let Some(error) = &state.error {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red).bold())));
        }

        frame.render_widget(Paragraph::new(lines).block(Block::bordered().title(title)), area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn person(first: &str) -> Person {
        Person {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: "Hopper".to_string(),
            email: "grace@example.org".to_string(),
            department: "Research".to_string(),
            title: "Admiral".to_string(),
            phone: None,
            hired_on: NaiveDate::from_ymd_opt(1943, 12, 9).unwrap(),
        }
    }

    #[test]
    fn test_list_selection_stays_in_range() {
        let view = ListView::new(vec![person("Grace"), person("Ada")]);
        view.handle_key(&key(KeyCode::Down));
        view.handle_key(&key(KeyCode::Down));
        assert_eq!(view.selected().unwrap().first_name, "Ada");

        view.set_people(vec![person("Edsger")]);
        assert_eq!(view.selected().unwrap().first_name, "Edsger");

        view.set_people(Vec::new());
        assert!(view.selected().is_none());
        assert!(view.handle_key(&key(KeyCode::Enter)).is_none());
    }

    #[test]
    fn test_list_enter_opens_selected_record() {
        let grace = person("Grace");
        let view = ListView::new(vec![grace.clone()]);
        let intent = view.handle_key(&key(KeyCode::Enter)).unwrap();
        assert_eq!(intent.event, "show_detail");
        assert_eq!(intent.payload["id"], grace.id.to_string());
    }

    #[test]
    fn test_filter_mode_captures_typing() {
        let view = ListView::new(vec![person("Grace")]);
        assert!(view.handle_key(&key(KeyCode::Char('/'))).is_none());
        assert!(view.is_filtering());

        // 'q' is text while filtering, not quit
        let intent = view.handle_key(&key(KeyCode::Char('q'))).unwrap();
        assert_eq!(intent, Intent::with("filter", json!({ "query": "q" })));

        let intent = view.handle_key(&key(KeyCode::Esc)).unwrap();
        assert_eq!(intent.payload["query"], "");
        assert!(!view.is_filtering());
        assert_eq!(view.handle_key(&key(KeyCode::Char('q'))).unwrap().event, "quit");
    }

    #[test]
    fn test_form_edits_focused_field_and_saves() {
        let form = FormView::new(FormMode::Add);
        for c in "Ada".chars() {
            form.handle_key(&key(KeyCode::Char(c)));
        }
        form.handle_key(&key(KeyCode::Tab));
        form.handle_key(&key(KeyCode::Char('L')));

        let intent = form.handle_key(&KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL)).unwrap();
        assert_eq!(intent.event, "save_record");
        let draft = PersonDraft::from_payload(&intent.payload).unwrap();
        assert_eq!(draft.first_name, "Ada");
        assert_eq!(draft.last_name, "L");
        assert_eq!(draft.id, None);
    }

    #[test]
    fn test_form_escape_returns_to_origin() {
        let grace = person("Grace");
        let form = FormView::new(FormMode::Edit);
        form.load(PersonDraft::from_person(&grace));
        form.set_error(Some("Email is invalid".to_string()));

        let intent = form.handle_key(&key(KeyCode::Esc)).unwrap();
        assert_eq!(intent.event, "show_detail");

        form.reset();
        assert!(form.error().is_none());
        assert_eq!(form.handle_key(&key(KeyCode::Esc)).unwrap().event, "show_list");
    }
}
