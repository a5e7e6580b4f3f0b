use std::fmt;

use crate::activity::SharedLog;
use crate::consts::DEFAULT_HOTKEY;
use crate::store::Store;

const MODIFIERS: &[&str] = &["ctrl", "control", "alt", "shift", "cmd", "command", "win"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("No hotkey provided")]
    Empty,
    #[error("Invalid hotkey format: '{0}'. Use format like 'Ctrl+F' or 'Alt+Shift+G'")]
    Invalid(String),
}

/// A validated combination such as `Ctrl+Shift+G`. Keeps the user's spelling
/// for display and persistence; comparison uses the lowercased tokens.
#[derive(Debug, Clone)]
pub struct HotkeyBinding {
    raw: String,
    modifiers: Vec<String>,
    key: String,
}

impl PartialEq for HotkeyBinding {
    fn eq(&self, other: &Self) -> bool {
        self.modifiers == other.modifiers && self.key == other.key
    }
}

impl Eq for HotkeyBinding {}

fn is_modifier(token: &str) -> bool {
    MODIFIERS.contains(&token) || token == "windows"
}

impl HotkeyBinding {
    pub fn parse(input: &str) -> Result<Self, HotkeyError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(HotkeyError::Empty);
        }
        let mut tokens: Vec<String> = raw.split('+').map(|t| t.trim().to_lowercase()).collect();
        let key = tokens.pop().unwrap_or_default();

        let key_ok = key.chars().count() == 1
            || (!key.is_empty() && key.chars().all(char::is_alphanumeric))
            || is_modifier(&key);
        if !key_ok || !tokens.iter().all(|m| is_modifier(m)) {
            return Err(HotkeyError::Invalid(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            modifiers: tokens,
            key,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn modifiers(&self) -> &[String] {
        &self.modifiers
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Default for HotkeyBinding {
    fn default() -> Self {
        Self {
            raw: DEFAULT_HOTKEY.to_string(),
            modifiers: vec!["ctrl".to_string()],
            key: "f".to_string(),
        }
    }
}

impl fmt::Display for HotkeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// OS-level hook. Implementations fire the toggle action when the
/// registered combination is pressed.
pub trait HotkeyRegistrar: Send {
    fn register(&mut self, binding: &HotkeyBinding) -> anyhow::Result<()>;
    fn unregister_all(&mut self);
}

/// Accepts every binding and only records it. Used where no global keyboard
/// hook is available; the shell's `toggle` command stands in for the key.
#[derive(Debug, Default)]
pub struct LoggingRegistrar {
    active: Option<String>,
}

impl LoggingRegistrar {
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

impl HotkeyRegistrar for LoggingRegistrar {
    fn register(&mut self, binding: &HotkeyBinding) -> anyhow::Result<()> {
        log::debug!("hotkey: registered {}", binding);
        self.active = Some(binding.to_string());
        Ok(())
    }

    fn unregister_all(&mut self) {
        self.active = None;
    }
}

pub struct HotkeyManager {
    store: Store,
    registrar: Box<dyn HotkeyRegistrar>,
    current: HotkeyBinding,
    log: SharedLog,
}

impl HotkeyManager {
    /// Loads the persisted binding. A corrupt file falls back to `default`,
    /// and an invalid `default` to `Ctrl+F`.
    pub fn new(
        store: Store,
        default: &str,
        registrar: Box<dyn HotkeyRegistrar>,
        log: SharedLog,
    ) -> Self {
        let saved = store.load_hotkey(default);
        let current = HotkeyBinding::parse(&saved)
            .or_else(|e| {
                log::warn!("hotkey: persisted value rejected ({}), using default", e);
                HotkeyBinding::parse(default)
            })
            .unwrap_or_default();
        Self {
            store,
            registrar,
            current,
            log,
        }
    }

    pub fn current(&self) -> &HotkeyBinding {
        &self.current
    }

    pub fn register_current(&mut self) -> bool {
        let binding = self.current.clone();
        self.register(&binding)
    }

    fn register(&mut self, binding: &HotkeyBinding) -> bool {
        self.registrar.unregister_all();
        match self.registrar.register(binding) {
            Ok(()) => {
                self.log.info(&format!("Hotkey '{}' registered", binding));
                true
            }
            Err(e) => {
                self.log
                    .error(&format!("Failed to register hotkey '{}': {}", binding, e));
                false
            }
        }
    }

    /// Validates, re-registers and persists `input`. On any failure the
    /// previous binding stays active.
    pub fn update_hotkey(&mut self, input: &str) -> bool {
        let binding = match HotkeyBinding::parse(input) {
            Ok(b) => b,
            Err(e) => {
                self.log.error(&e.to_string());
                return false;
            }
        };

        self.registrar.unregister_all();
        if let Err(e) = self.registrar.register(&binding) {
            self.log
                .error(&format!("Failed to set hotkey '{}': {}", binding, e));
            self.register_current();
            return false;
        }

        self.store.save_hotkey(binding.as_str());
        self.current = binding;
        self.log
            .success(&format!("Hotkey updated to '{}'", self.current));
        true
    }

    pub fn unregister(&mut self) {
        self.registrar.unregister_all();
    }
}
