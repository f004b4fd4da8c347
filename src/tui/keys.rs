use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// A keyboard key with optional modifiers (Ctrl, Alt, Shift)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyBinding {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyBinding {
    pub const fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::NONE,
        }
    }

    pub const fn ctrl(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::CONTROL,
        }
    }

    /// Match code and modifiers; Shift is ignored for characters since the
    /// case already carries it
    pub fn matches(&self, event: &KeyEvent) -> bool {
        if self.code != event.code {
            return false;
        }
        match event.code {
            KeyCode::Char(_) => {
                self.modifiers == event.modifiers.difference(KeyModifiers::SHIFT)
            }
            _ => self.modifiers == event.modifiers,
        }
    }

    /// Short label for the footer hint line
    pub fn label(&self) -> String {
        let key = match self.code {
            KeyCode::Char(' ') => "Space".to_string(),
            KeyCode::Char(c) => c.to_string(),
            KeyCode::Enter => "Enter".to_string(),
            KeyCode::Esc => "Esc".to_string(),
            KeyCode::Tab => "Tab".to_string(),
            KeyCode::BackTab => "S-Tab".to_string(),
            KeyCode::Up => "↑".to_string(),
            KeyCode::Down => "↓".to_string(),
            other => format!("{:?}", other),
        };
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            format!("^{}", key.to_uppercase())
        } else {
            key
        }
    }
}

impl From<KeyCode> for KeyBinding {
    fn from(code: KeyCode) -> Self {
        Self::new(code)
    }
}

pub const QUIT: KeyBinding = KeyBinding::new(KeyCode::Char('q'));
pub const FORCE_QUIT: KeyBinding = KeyBinding::ctrl(KeyCode::Char('c'));
pub const FORCE_QUIT_ALT: KeyBinding = KeyBinding::ctrl(KeyCode::Char('q'));
pub const BACK: KeyBinding = KeyBinding::new(KeyCode::Esc);
pub const OPEN: KeyBinding = KeyBinding::new(KeyCode::Enter);
pub const ADD: KeyBinding = KeyBinding::new(KeyCode::Char('a'));
pub const EDIT: KeyBinding = KeyBinding::new(KeyCode::Char('e'));
pub const DELETE: KeyBinding = KeyBinding::new(KeyCode::Char('d'));
pub const FILTER: KeyBinding = KeyBinding::new(KeyCode::Char('/'));
pub const RELOAD: KeyBinding = KeyBinding::new(KeyCode::Char('r'));
pub const EXPORT: KeyBinding = KeyBinding::new(KeyCode::Char('x'));
pub const CLEAR_CACHE: KeyBinding = KeyBinding::new(KeyCode::Char('c'));
pub const SAVE: KeyBinding = KeyBinding::ctrl(KeyCode::Char('s'));

/// Quit keys that work on every screen, even while typing
pub fn is_force_quit(event: &KeyEvent) -> bool {
    FORCE_QUIT.matches(event) || FORCE_QUIT_ALT.matches(event)
}

/// Release and repeat events from terminals with enhanced key reporting
/// are not input
pub fn is_press(event: &KeyEvent) -> bool {
    event.kind == KeyEventKind::Press
}

/// Footer hint text for a set of bindings
pub fn hints(bindings: &[(KeyBinding, &str)]) -> String {
    bindings
        .iter()
        .map(|(binding, description)| format!("{} {}", binding.label(), description))
        .collect::<Vec<_>>()
        .join("  ")
}
