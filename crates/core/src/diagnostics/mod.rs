use std::collections::VecDeque;

use crate::{visuals::Surface, ColorRgb, Result};

const OVERLAY_COLOR: ColorRgb = ColorRgb::new(255, 0, 0);

/// On-screen error overlay. Keeps the most recent messages so a blank screen
/// can still tell someone what went wrong.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(8)
    }
}

impl Diagnostics {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Logs `message` and pins it to the overlay, evicting the oldest line
    /// when full.
    pub fn report(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "diagnostic");
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(message);
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self, surface: &mut dyn Surface) -> Result<()> {
        for (line, text) in self.lines.iter().enumerate() {
            surface.draw_overlay_line(line, text, OVERLAY_COLOR)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_latest_lines() {
        let mut diagnostics = Diagnostics::with_capacity(2);
        diagnostics.report("one");
        diagnostics.report("two");
        diagnostics.report("three");

        assert_eq!(diagnostics.lines().collect::<Vec<_>>(), vec!["two", "three"]);
    }
}
