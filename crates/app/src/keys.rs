use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode};

/// How long Ctrl+Shift+Q has to be held before the app quits.
pub const PARENT_EXIT_HOLD: Duration = Duration::from_millis(3000);

/// Longest silence between autorepeats that still counts as one hold. Covers
/// the initial repeat delay of common keyboards.
const REPEAT_GAP: Duration = Duration::from_millis(700);

/// Tracks the parent exit chord, Ctrl+Shift+Q held for [`PARENT_EXIT_HOLD`].
///
/// Terminals report a held key as repeated presses, so the hold is measured
/// from the first chord event to the latest one. A release, any other key,
/// or a gap longer than [`REPEAT_GAP`] starts over.
#[derive(Debug)]
pub struct QuitChord {
    shift_reported: bool,
    held: Option<(Instant, Instant)>,
}

impl QuitChord {
    /// Legacy terminals fold Ctrl+Shift+Q into Ctrl+Q, so Shift is only
    /// required when the terminal reports it.
    pub fn new(shift_reported: bool) -> Self {
        Self {
            shift_reported,
            held: None,
        }
    }

    /// Whether the event belongs to the chord. Such events are never
    /// dispatched as key presses.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        let shift = !self.shift_reported || event.modifiers.contains(KeyModifiers::SHIFT);
        event.modifiers.contains(KeyModifiers::CONTROL)
            && shift
            && matches!(event.code, KeyCode::Char('q') | KeyCode::Char('Q'))
    }

    /// Feeds one key event; true once the chord has been held long enough.
    pub fn observe(&mut self, event: &KeyEvent, now: Instant) -> bool {
        if !self.matches(event) || event.kind == KeyEventKind::Release {
            self.held = None;
            return false;
        }
        let started = match self.held {
            Some((started, last)) if now.saturating_duration_since(last) <= REPEAT_GAP => started,
            _ => now,
        };
        self.held = Some((started, now));
        now.saturating_duration_since(started) >= PARENT_EXIT_HOLD
    }
}

/// Physical key code, web style (`KeyA`, `Digit1`, `ShiftLeft`, ...), for a
/// terminal key. Shifted symbols map back to their unshifted key on a US
/// layout.
pub fn web_code(code: KeyCode) -> Option<String> {
    let named = match code {
        KeyCode::Char(c) => return char_code(c),
        KeyCode::F(n) => return Some(format!("F{n}")),
        KeyCode::Enter => "Enter",
        KeyCode::Backspace => "Backspace",
        KeyCode::Tab | KeyCode::BackTab => "Tab",
        KeyCode::Esc => "Escape",
        KeyCode::Delete => "Delete",
        KeyCode::Insert => "Insert",
        KeyCode::Home => "Home",
        KeyCode::End => "End",
        KeyCode::PageUp => "PageUp",
        KeyCode::PageDown => "PageDown",
        KeyCode::Up => "ArrowUp",
        KeyCode::Down => "ArrowDown",
        KeyCode::Left => "ArrowLeft",
        KeyCode::Right => "ArrowRight",
        KeyCode::CapsLock => "CapsLock",
        KeyCode::Modifier(modifier) => modifier_code(modifier)?,
        _ => return None,
    };
    Some(named.to_string())
}

fn modifier_code(modifier: ModifierKeyCode) -> Option<&'static str> {
    Some(match modifier {
        ModifierKeyCode::LeftShift => "ShiftLeft",
        ModifierKeyCode::RightShift => "ShiftRight",
        ModifierKeyCode::LeftControl => "ControlLeft",
        ModifierKeyCode::RightControl => "ControlRight",
        ModifierKeyCode::LeftAlt => "AltLeft",
        ModifierKeyCode::RightAlt => "AltRight",
        ModifierKeyCode::LeftSuper | ModifierKeyCode::LeftMeta => "MetaLeft",
        ModifierKeyCode::RightSuper | ModifierKeyCode::RightMeta => "MetaRight",
        _ => return None,
    })
}

fn char_code(c: char) -> Option<String> {
    if c.is_ascii_alphabetic() {
        return Some(format!("Key{}", c.to_ascii_uppercase()));
    }
    if c.is_ascii_digit() {
        return Some(format!("Digit{c}"));
    }
    let named = match c {
        ' ' => "Space",
        '`' | '~' => "Backquote",
        '!' => "Digit1",
        '@' => "Digit2",
        '#' => "Digit3",
        '$' => "Digit4",
        '%' => "Digit5",
        '^' => "Digit6",
        '&' => "Digit7",
        '*' => "Digit8",
        '(' => "Digit9",
        ')' => "Digit0",
        '-' | '_' => "Minus",
        '=' | '+' => "Equal",
        '[' | '{' => "BracketLeft",
        ']' | '}' => "BracketRight",
        '\\' | '|' => "Backslash",
        ';' | ':' => "Semicolon",
        '\'' | '"' => "Quote",
        ',' | '<' => "Comma",
        '.' | '>' => "Period",
        '/' | '?' => "Slash",
        _ => return None,
    };
    Some(named.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_digits_and_symbols() {
        assert_eq!(web_code(KeyCode::Char('a')).as_deref(), Some("KeyA"));
        assert_eq!(web_code(KeyCode::Char('A')).as_deref(), Some("KeyA"));
        assert_eq!(web_code(KeyCode::Char('7')).as_deref(), Some("Digit7"));
        assert_eq!(web_code(KeyCode::Char('&')).as_deref(), Some("Digit7"));
        assert_eq!(web_code(KeyCode::Char('?')).as_deref(), Some("Slash"));
        assert_eq!(web_code(KeyCode::Char(' ')).as_deref(), Some("Space"));
        assert_eq!(web_code(KeyCode::Char('é')), None);
    }

    #[test]
    fn named_keys() {
        assert_eq!(web_code(KeyCode::F(11)).as_deref(), Some("F11"));
        assert_eq!(web_code(KeyCode::Esc).as_deref(), Some("Escape"));
        assert_eq!(web_code(KeyCode::BackTab).as_deref(), Some("Tab"));
        assert_eq!(
            web_code(KeyCode::Modifier(ModifierKeyCode::RightControl)).as_deref(),
            Some("ControlRight")
        );
        assert_eq!(web_code(KeyCode::Null), None);
    }

    const CHORD: KeyModifiers = KeyModifiers::CONTROL.union(KeyModifiers::SHIFT);

    fn chord(kind: KeyEventKind) -> KeyEvent {
        KeyEvent::new_with_kind(KeyCode::Char('Q'), CHORD, kind)
    }

    /// Feeds a hold of `ms` milliseconds as autorepeats every 30 ms.
    fn hold(quit: &mut QuitChord, start: Instant, ms: u64) -> bool {
        let mut quits = quit.observe(&chord(KeyEventKind::Press), start);
        for at in (30..=ms).step_by(30) {
            quits = quit.observe(&chord(KeyEventKind::Repeat), start + Duration::from_millis(at));
        }
        quits
    }

    #[test]
    fn bare_ctrl_q_never_quits() {
        let mut quit = QuitChord::new(true);
        let ctrl_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        let start = Instant::now();
        for at in (0..=5_000).step_by(30) {
            assert!(!quit.observe(&ctrl_q, start + Duration::from_millis(at)));
        }
        assert!(!quit.matches(&ctrl_q));
        assert!(!quit.matches(&KeyEvent::new(KeyCode::Char('Q'), KeyModifiers::SHIFT)));
    }

    #[test]
    fn short_hold_does_not_quit() {
        let mut quit = QuitChord::new(true);
        assert!(!hold(&mut quit, Instant::now(), 2_900));
    }

    #[test]
    fn three_second_hold_quits() {
        let mut quit = QuitChord::new(true);
        let start = Instant::now();
        assert!(hold(&mut quit, start, 3_000));
    }

    #[test]
    fn release_starts_the_hold_over() {
        let mut quit = QuitChord::new(true);
        let start = Instant::now();
        assert!(!hold(&mut quit, start, 2_000));
        let released = start + Duration::from_millis(2_010);
        assert!(!quit.observe(&chord(KeyEventKind::Release), released));

        let again = released + Duration::from_millis(20);
        assert!(!hold(&mut quit, again, 2_000));
        assert!(hold(&mut quit, again, 3_000));
    }

    #[test]
    fn other_keys_and_long_gaps_start_the_hold_over() {
        let mut quit = QuitChord::new(true);
        let start = Instant::now();
        assert!(!hold(&mut quit, start, 2_000));
        let smash = KeyEvent::new(KeyCode::Char('j'), KeyModifiers::NONE);
        assert!(!quit.observe(&smash, start + Duration::from_millis(2_010)));
        assert!(!quit.observe(&chord(KeyEventKind::Press), start + Duration::from_millis(3_100)));

        let mut quit = QuitChord::new(true);
        assert!(!quit.observe(&chord(KeyEventKind::Press), start));
        assert!(!quit.observe(&chord(KeyEventKind::Press), start + Duration::from_millis(1_500)));
        assert!(!quit.observe(&chord(KeyEventKind::Press), start + Duration::from_millis(3_000)));
    }

    #[test]
    fn legacy_terminals_accept_ctrl_q_held() {
        let mut quit = QuitChord::new(false);
        let ctrl_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert!(quit.matches(&ctrl_q));
        let start = Instant::now();
        assert!(!quit.observe(&ctrl_q, start));
        assert!(!quit.observe(&ctrl_q, start + Duration::from_millis(600)));
        let mut at = 600;
        while at < 3_000 {
            at += 30;
            quit.observe(&ctrl_q, start + Duration::from_millis(at));
        }
        assert!(quit.observe(&ctrl_q, start + Duration::from_millis(at)));
    }
}
