//! Core library for the KeySmash effects engine.
//!
//! A key press is resolved to a colour, a screen position and a lighting grid
//! cell, then fanned out to independent sinks: a particle/ring animation, a
//! tone voice, a per-key lighting grid with ripples, and an optional RGB
//! accessory. Sinks fail independently; none of them can stall or break the
//! others.

use std::{future::Future, pin::Pin};

pub mod accessory;
pub mod color;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod input;
pub mod keymap;
pub mod lighting;
pub mod session;
pub mod tone;
pub mod visuals;

pub use accessory::{AccessoryClient, AccessorySink, DeviceInfo, OpenRgbClient};
pub use color::{ColorRgb, ColorRgba};
pub use config::{AccessoryConfig, AppConfig, LightingConfig, ToneConfig, VisualConfig};
pub use diagnostics::Diagnostics;
pub use dispatch::Dispatcher;
pub use error::{KeysmashError, Result};
pub use input::KeyDebouncer;
pub use keymap::{KeyLookup, StaticKeymap};
pub use lighting::{GridCell, GridFrame, LightingEngine, LightingGrid, LightingTimings};
pub use session::{AppMetadata, ChromaRestEndpoint, LightingEndpoint};
pub use tone::{ToneSink, TracingToneSink};
pub use visuals::{Point, RadialGradient, ScreenPosition, Surface, VisualEngine};

/// Boxed future returned by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
