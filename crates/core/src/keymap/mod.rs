//! Static key lookup tables.
//!
//! Key codes follow the web `KeyboardEvent.code` naming (`KeyA`, `Digit1`,
//! `Space`, ...). Each row of the main keyboard cycles through a pentatonic
//! scale left to right so spatial position maps to pitch and colour.

use std::collections::HashMap;

use rand::Rng;

use crate::{ColorRgb, GridCell, ScreenPosition};

/// Read-only mapping from a key code to its effect parameters.
pub trait KeyLookup: Send + Sync {
    fn color_for(&self, code: &str) -> Option<ColorRgb>;
    fn grid_cell_for(&self, code: &str) -> Option<GridCell>;
    fn screen_position_for(&self, code: &str) -> Option<ScreenPosition>;
    /// Note identifier handed to the tone sink, e.g. `"C4"`.
    fn note_for(&self, code: &str) -> Option<String>;
    /// Text that pops up on screen; may be empty or several characters long.
    fn glyph_for(&self, code: &str) -> String {
        glyph_text(code)
    }
}

const PENTATONIC: [char; 5] = ['C', 'D', 'E', 'G', 'A'];

const KEY_ROWS: [&[&str]; 5] = [
    &[
        "Backquote", "Digit1", "Digit2", "Digit3", "Digit4", "Digit5", "Digit6", "Digit7",
        "Digit8", "Digit9", "Digit0", "Minus", "Equal", "Backspace",
    ],
    &[
        "Tab", "KeyQ", "KeyW", "KeyE", "KeyR", "KeyT", "KeyY", "KeyU", "KeyI", "KeyO", "KeyP",
        "BracketLeft", "BracketRight", "Backslash",
    ],
    &[
        "CapsLock", "KeyA", "KeyS", "KeyD", "KeyF", "KeyG", "KeyH", "KeyJ", "KeyK", "KeyL",
        "Semicolon", "Quote", "Enter",
    ],
    &[
        "ShiftLeft", "KeyZ", "KeyX", "KeyC", "KeyV", "KeyB", "KeyN", "KeyM", "Comma", "Period",
        "Slash", "ShiftRight",
    ],
    &[
        "ControlLeft", "MetaLeft", "AltLeft", "Space", "AltRight", "MetaRight", "ControlRight",
    ],
];

const ROW_OCTAVES: [u8; 5] = [3, 4, 4, 5, 4];

const EXTRA_KEYS: [&str; 19] = [
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "Escape",
    "Delete", "Insert", "Home", "End", "PageUp", "PageDown",
];

const EXTRA_OCTAVE: u8 = 5;

/// Keyboard grid positions on the 6x22 lighting surface.
const GRID_POSITIONS: &[(&str, usize, usize)] = &[
    ("Escape", 0, 1),
    ("F1", 0, 3),
    ("F2", 0, 4),
    ("F3", 0, 5),
    ("F4", 0, 6),
    ("F5", 0, 8),
    ("F6", 0, 9),
    ("F7", 0, 10),
    ("F8", 0, 11),
    ("F9", 0, 13),
    ("F10", 0, 14),
    ("F11", 0, 15),
    ("F12", 0, 16),
    ("Backquote", 1, 1),
    ("Digit1", 1, 2),
    ("Digit2", 1, 3),
    ("Digit3", 1, 4),
    ("Digit4", 1, 5),
    ("Digit5", 1, 6),
    ("Digit6", 1, 7),
    ("Digit7", 1, 8),
    ("Digit8", 1, 9),
    ("Digit9", 1, 10),
    ("Digit0", 1, 11),
    ("Minus", 1, 12),
    ("Equal", 1, 13),
    ("Backspace", 1, 14),
    ("Tab", 2, 1),
    ("KeyQ", 2, 2),
    ("KeyW", 2, 3),
    ("KeyE", 2, 4),
    ("KeyR", 2, 5),
    ("KeyT", 2, 6),
    ("KeyY", 2, 7),
    ("KeyU", 2, 8),
    ("KeyI", 2, 9),
    ("KeyO", 2, 10),
    ("KeyP", 2, 11),
    ("BracketLeft", 2, 12),
    ("BracketRight", 2, 13),
    ("Backslash", 2, 14),
    ("CapsLock", 3, 1),
    ("KeyA", 3, 2),
    ("KeyS", 3, 3),
    ("KeyD", 3, 4),
    ("KeyF", 3, 5),
    ("KeyG", 3, 6),
    ("KeyH", 3, 7),
    ("KeyJ", 3, 8),
    ("KeyK", 3, 9),
    ("KeyL", 3, 10),
    ("Semicolon", 3, 11),
    ("Quote", 3, 12),
    ("Enter", 3, 14),
    ("ShiftLeft", 4, 1),
    ("KeyZ", 4, 2),
    ("KeyX", 4, 3),
    ("KeyC", 4, 4),
    ("KeyV", 4, 5),
    ("KeyB", 4, 6),
    ("KeyN", 4, 7),
    ("KeyM", 4, 8),
    ("Comma", 4, 9),
    ("Period", 4, 10),
    ("Slash", 4, 11),
    ("ShiftRight", 4, 14),
    ("ControlLeft", 5, 1),
    ("MetaLeft", 5, 2),
    ("AltLeft", 5, 3),
    ("Space", 5, 7),
    ("AltRight", 5, 11),
    ("MetaRight", 5, 12),
    ("ControlRight", 5, 14),
];

/// Colour assigned to each pentatonic degree.
pub fn degree_color(degree: char) -> ColorRgb {
    match degree {
        'C' => ColorRgb::new(255, 50, 50),
        'D' => ColorRgb::new(255, 165, 0),
        'E' => ColorRgb::new(255, 255, 50),
        'G' => ColorRgb::new(50, 220, 50),
        _ => ColorRgb::new(80, 120, 255),
    }
}

#[derive(Debug, Clone)]
struct KeyEntry {
    color: ColorRgb,
    note: String,
    position: ScreenPosition,
}

/// The built-in keyboard layout.
#[derive(Debug, Clone)]
pub struct StaticKeymap {
    entries: HashMap<&'static str, KeyEntry>,
    grid: HashMap<&'static str, GridCell>,
}

impl StaticKeymap {
    /// Builds the tables. Extra keys get a random screen position, fixed for
    /// the lifetime of the map.
    pub fn new() -> Self {
        Self::with_rng(&mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng>(rng: &mut R) -> Self {
        let mut entries = HashMap::new();

        for (row, keys) in KEY_ROWS.iter().enumerate() {
            for (col, code) in keys.iter().enumerate() {
                let degree = PENTATONIC[col % PENTATONIC.len()];
                entries.insert(
                    *code,
                    KeyEntry {
                        color: degree_color(degree),
                        note: format!("{degree}{}", ROW_OCTAVES[row]),
                        position: ScreenPosition::new(
                            (col as f32 + 0.5) / keys.len() as f32,
                            (row as f32 + 0.5) / KEY_ROWS.len() as f32,
                        ),
                    },
                );
            }
        }

        for (index, code) in EXTRA_KEYS.iter().enumerate() {
            let degree = PENTATONIC[index % PENTATONIC.len()];
            entries.insert(
                *code,
                KeyEntry {
                    color: degree_color(degree),
                    note: format!("{degree}{EXTRA_OCTAVE}"),
                    position: ScreenPosition::new(rng.gen(), rng.gen()),
                },
            );
        }

        let grid = GRID_POSITIONS
            .iter()
            .filter_map(|(code, row, col)| GridCell::new(*row, *col).map(|cell| (*code, cell)))
            .collect();

        Self { entries, grid }
    }
}

impl Default for StaticKeymap {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLookup for StaticKeymap {
    fn color_for(&self, code: &str) -> Option<ColorRgb> {
        self.entries.get(code).map(|entry| entry.color)
    }

    fn grid_cell_for(&self, code: &str) -> Option<GridCell> {
        self.grid.get(code).copied()
    }

    fn screen_position_for(&self, code: &str) -> Option<ScreenPosition> {
        self.entries.get(code).map(|entry| entry.position)
    }

    fn note_for(&self, code: &str) -> Option<String> {
        self.entries.get(code).map(|entry| entry.note.clone())
    }
}

/// Text shown for a key press: the letter or digit itself, a symbol for a
/// few editing keys, the name of function keys, nothing otherwise.
pub fn glyph_text(code: &str) -> String {
    if let Some(letter) = code.strip_prefix("Key") {
        return letter.to_string();
    }
    if let Some(digit) = code.strip_prefix("Digit") {
        return digit.to_string();
    }
    match code {
        "Space" => " ".to_string(),
        "Enter" => "\u{23CE}".to_string(),
        "Backspace" => "\u{232B}".to_string(),
        "Tab" => "\u{21B9}".to_string(),
        _ if is_function_key(code) => code.to_string(),
        _ => String::new(),
    }
}

fn is_function_key(code: &str) -> bool {
    code.strip_prefix('F')
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
