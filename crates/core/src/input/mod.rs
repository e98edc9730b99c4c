use std::collections::HashSet;

/// Turns a raw stream of key downs and ups into one activation per physical
/// press. Held keys that auto-repeat do not activate again until released.
#[derive(Debug, Default, Clone)]
pub struct KeyDebouncer {
    held: HashSet<String>,
}

impl KeyDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `code` was not already held.
    pub fn on_press(&mut self, code: &str) -> bool {
        if self.held.contains(code) {
            return false;
        }
        self.held.insert(code.to_string())
    }

    pub fn on_release(&mut self, code: &str) {
        self.held.remove(code);
    }

    /// Forgets every held key, e.g. after focus loss swallowed the releases.
    pub fn reset(&mut self) {
        self.held.clear();
    }

    pub fn is_held(&self, code: &str) -> bool {
        self.held.contains(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_is_suppressed_until_release() {
        let mut keys = KeyDebouncer::new();
        assert!(keys.on_press("KeyA"));
        assert!(!keys.on_press("KeyA"));
        assert!(keys.on_press("KeyS"));

        keys.on_release("KeyA");
        assert!(!keys.is_held("KeyA"));
        assert!(keys.on_press("KeyA"));
    }

    #[test]
    fn reset_rearms_everything() {
        let mut keys = KeyDebouncer::new();
        keys.on_press("Space");
        keys.reset();
        assert!(keys.on_press("Space"));
    }
}
