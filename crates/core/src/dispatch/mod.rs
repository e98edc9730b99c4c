//! Key press fan-out.
//!
//! Every press goes to the visual engine, the tone sink, the lighting engine
//! and the accessory sink. Each path is isolated: an error or panic in one is
//! logged and never reaches the others or the caller. Nothing here waits on a
//! sink; asynchronous work is spawned and its result discarded.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

use crate::{
    accessory::AccessorySink, fault, keymap::KeyLookup, tone::ToneSink, ColorRgb, LightingEngine,
    ScreenPosition, VisualEngine,
};

pub struct Dispatcher {
    lookup: Arc<dyn KeyLookup>,
    visuals: Arc<Mutex<VisualEngine>>,
    tone: Arc<dyn ToneSink>,
    lighting: Option<LightingEngine>,
    accessory: Option<Arc<AccessorySink>>,
    runtime: Handle,
}

impl Dispatcher {
    pub fn new(
        lookup: Arc<dyn KeyLookup>,
        visuals: Arc<Mutex<VisualEngine>>,
        tone: Arc<dyn ToneSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            lookup,
            visuals,
            tone,
            lighting: None,
            accessory: None,
            runtime,
        }
    }

    pub fn with_lighting(mut self, lighting: LightingEngine) -> Self {
        self.lighting = Some(lighting);
        self
    }

    pub fn with_accessory(mut self, accessory: Arc<AccessorySink>) -> Self {
        self.accessory = Some(accessory);
        self
    }

    /// Routes one key press to every sink.
    pub fn dispatch(&self, code: &str) {
        let color = self.lookup.color_for(code);
        tracing::trace!(code, ?color, "dispatch");

        self.burst(code, color);
        self.tone(code);
        if let Some(color) = color {
            self.light(code, color);
        }
    }

    fn burst(&self, code: &str, color: Option<ColorRgb>) {
        let (color, position) = match color {
            Some(color) => (
                color,
                self.lookup
                    .screen_position_for(code)
                    .unwrap_or(ScreenPosition::CENTER),
            ),
            None => (ColorRgb::WHITE, ScreenPosition::CENTER),
        };
        let glyph = self.lookup.glyph_for(code);

        fault::isolate("visuals", || {
            // A panic elsewhere must not take the animation down with it.
            let mut visuals = self.visuals.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(visuals.burst(position, color, Some(glyph.as_str())))
        });
    }

    fn tone(&self, code: &str) {
        let Some(note) = self.lookup.note_for(code) else {
            return;
        };
        let tone = Arc::clone(&self.tone);
        self.runtime.spawn(async move {
            if let Err(err) = tone.ensure_started().await {
                tracing::warn!(%err, "tone sink failed to start");
                return;
            }
            fault::isolate("tone", || tone.play_tone(&note));
        });
    }

    fn light(&self, code: &str, color: ColorRgb) {
        if let Some(lighting) = &self.lighting {
            let cell = self.lookup.grid_cell_for(code);
            fault::isolate("lighting", || {
                lighting.on_key_press(cell, color);
                Ok(())
            });
        }

        if let Some(accessory) = &self.accessory {
            let accessory = Arc::clone(accessory);
            self.runtime.spawn(async move { accessory.set_color(color).await });
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("lighting", &self.lighting.is_some())
            .field("accessory", &self.accessory.is_some())
            .finish()
    }
}
