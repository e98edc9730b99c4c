//! Visual animation engine: particle bursts, expanding rings and glyph pops
//! over a slowly hue-shifting background.
//!
//! All motion constants are per frame and expressed in surface pixels. The
//! engine never talks to a display directly; it draws through [`Surface`].

use std::f32::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{diagnostics::Diagnostics, fault, ColorRgb, ColorRgba, Result};

/// Live particle budget shared by every burst.
pub const MAX_PARTICLES: usize = 500;

const HUE_STEP: f32 = 15.0;
const BURST_MIN: usize = 15;
const BURST_MAX: usize = 25;
const ANGLE_JITTER: f32 = 0.25;
const SPEED_MIN: f32 = 2.0;
const SPEED_MAX: f32 = 7.0;
const SIZE_MIN: f32 = 3.0;
const SIZE_MAX: f32 = 11.0;
const DECAY_MIN: f32 = 0.015;
const DECAY_MAX: f32 = 0.035;

const FRICTION: f32 = 0.98;
const GRAVITY: f32 = 0.05;

const RING_START_RADIUS: f32 = 10.0;
const RING_START_WIDTH: f32 = 4.0;
const RING_GROWTH: f32 = 4.0;
const RING_THINNING: f32 = 0.97;
const RING_FADE: f32 = 0.02;

const GLYPH_GROWTH: f32 = 0.08;
const GLYPH_RISE: f32 = 1.0;
const GLYPH_FADE: f32 = 0.025;

/// Normalised position on screen, both axes in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPosition {
    pub x: f32,
    pub y: f32,
}

impl ScreenPosition {
    pub const CENTER: Self = Self { x: 0.5, y: 0.5 };

    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }
}

/// Point in surface pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Point,
    pub velocity: Point,
    pub color: ColorRgb,
    pub alpha: f32,
    pub size: f32,
    pub decay_rate: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    pub center: Point,
    pub color: ColorRgb,
    pub radius: f32,
    pub alpha: f32,
    pub line_width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub position: Point,
    pub color: ColorRgb,
    pub character: char,
    pub alpha: f32,
    pub scale: f32,
}

/// Background fill from `inner` at `center` to `outer` at `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialGradient {
    pub center: Point,
    pub radius: f32,
    pub inner: ColorRgb,
    pub outer: ColorRgb,
}

impl RadialGradient {
    /// Colour at `point`, linear in distance from the centre.
    pub fn color_at(&self, point: Point) -> ColorRgb {
        let dx = point.x - self.center.x;
        let dy = point.y - self.center.y;
        let t = if self.radius > 0.0 {
            (dx * dx + dy * dy).sqrt() / self.radius
        } else {
            1.0
        };
        self.inner.mix(self.outer, t)
    }
}

/// Drawing target for one frame.
pub trait Surface {
    /// Drawable area in pixels.
    fn size(&self) -> (f32, f32);
    fn fill_background(&mut self, gradient: &RadialGradient) -> Result<()>;
    fn stroke_circle(
        &mut self,
        center: Point,
        radius: f32,
        line_width: f32,
        color: ColorRgba,
    ) -> Result<()>;
    fn fill_circle(&mut self, center: Point, radius: f32, color: ColorRgba) -> Result<()>;
    fn draw_glyph(&mut self, at: Point, character: char, scale: f32, color: ColorRgba)
        -> Result<()>;
    /// Diagnostic text pinned to the top-left corner, one entry per line.
    fn draw_overlay_line(&mut self, line: usize, text: &str, color: ColorRgb) -> Result<()>;
    /// Makes everything drawn since the last call visible.
    fn present(&mut self) -> Result<()>;
}

/// What a single [`VisualEngine::burst`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    pub requested: usize,
    pub spawned: usize,
    pub glyph: bool,
}

pub struct VisualEngine {
    particles: Vec<Particle>,
    rings: Vec<Ring>,
    glyphs: Vec<Glyph>,
    hue: f32,
    width: f32,
    height: f32,
    max_particles: usize,
    rng: StdRng,
}

impl VisualEngine {
    pub fn new(width: f32, height: f32) -> Self {
        Self::with_rng(width, height, StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible runs.
    pub fn seeded(width: f32, height: f32, seed: u64) -> Self {
        Self::with_rng(width, height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: f32, height: f32, rng: StdRng) -> Self {
        Self {
            particles: Vec::new(),
            rings: Vec::new(),
            glyphs: Vec::new(),
            hue: 0.0,
            width,
            height,
            max_particles: MAX_PARTICLES,
            rng,
        }
    }

    pub fn with_max_particles(mut self, max_particles: usize) -> Self {
        self.max_particles = max_particles;
        self
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn hue(&self) -> f32 {
        self.hue
    }

    pub fn to_pixels(&self, position: ScreenPosition) -> Point {
        Point::new(position.x * self.width, position.y * self.height)
    }

    /// Spawns a ring, a spray of particles and, for single-character text, a
    /// glyph at `position`. Particles beyond the live cap are silently dropped.
    pub fn burst(
        &mut self,
        position: ScreenPosition,
        color: ColorRgb,
        glyph: Option<&str>,
    ) -> BurstReport {
        self.hue = (self.hue + HUE_STEP) % 360.0;
        let origin = self.to_pixels(position);

        let requested = self.rng.gen_range(BURST_MIN..=BURST_MAX);
        let mut spawned = 0;
        for i in 0..requested {
            if self.particles.len() >= self.max_particles {
                break;
            }
            let angle = TAU * i as f32 / requested as f32
                + self.rng.gen_range(-ANGLE_JITTER..ANGLE_JITTER);
            let speed = self.rng.gen_range(SPEED_MIN..SPEED_MAX);
            self.particles.push(Particle {
                position: origin,
                velocity: Point::new(angle.cos() * speed, angle.sin() * speed),
                color,
                alpha: 1.0,
                size: self.rng.gen_range(SIZE_MIN..SIZE_MAX),
                decay_rate: self.rng.gen_range(DECAY_MIN..DECAY_MAX),
            });
            spawned += 1;
        }

        self.rings.push(Ring {
            center: origin,
            color,
            radius: RING_START_RADIUS,
            alpha: 1.0,
            line_width: RING_START_WIDTH,
        });

        let character = glyph.and_then(single_printable);
        if let Some(character) = character {
            self.glyphs.push(Glyph {
                position: origin,
                color,
                character,
                alpha: 1.0,
                scale: 1.0,
            });
        }

        BurstReport {
            requested,
            spawned,
            glyph: character.is_some(),
        }
    }

    /// Steps every live entity by one frame and drops the faded ones.
    pub fn advance(&mut self) {
        self.particles.retain_mut(|p| {
            p.position.x += p.velocity.x;
            p.position.y += p.velocity.y;
            p.velocity.x *= FRICTION;
            p.velocity.y *= FRICTION;
            p.velocity.y += GRAVITY;
            p.alpha -= p.decay_rate;
            p.alpha > 0.0
        });

        self.rings.retain_mut(|ring| {
            ring.radius += RING_GROWTH;
            ring.alpha -= RING_FADE;
            ring.line_width *= RING_THINNING;
            ring.alpha > 0.0
        });

        self.glyphs.retain_mut(|glyph| {
            glyph.scale += GLYPH_GROWTH;
            glyph.alpha -= GLYPH_FADE;
            glyph.position.y -= GLYPH_RISE;
            glyph.alpha > 0.0
        });
    }

    pub fn background(&self) -> RadialGradient {
        RadialGradient {
            center: Point::new(self.width / 2.0, self.height / 2.0),
            radius: self.width.max(self.height) * 0.7,
            inner: ColorRgb::from_hsl(self.hue, 0.30, 0.08),
            outer: ColorRgb::from_hsl((self.hue + 60.0) % 360.0, 0.20, 0.02),
        }
    }

    /// Draws background, rings, particles and glyphs, in that order.
    pub fn render(&self, surface: &mut dyn Surface) -> Result<()> {
        surface.fill_background(&self.background())?;

        for ring in &self.rings {
            surface.stroke_circle(
                ring.center,
                ring.radius,
                ring.line_width,
                ColorRgba::new(ring.color, ring.alpha),
            )?;
        }
        for p in &self.particles {
            surface.fill_circle(p.position, p.size, ColorRgba::new(p.color, p.alpha))?;
        }
        for glyph in &self.glyphs {
            surface.draw_glyph(
                glyph.position,
                glyph.character,
                glyph.scale,
                ColorRgba::new(glyph.color, glyph.alpha),
            )?;
        }
        Ok(())
    }

    /// One iteration of the frame loop. Whatever goes wrong while drawing,
    /// including a panicking surface, ends up in `diagnostics`; the next frame
    /// runs regardless.
    pub fn frame(&mut self, surface: &mut dyn Surface, diagnostics: &mut Diagnostics) {
        self.advance();

        let (width, height) = surface.size();
        if (width, height) != (self.width, self.height) {
            self.resize(width, height);
        }

        let drawn = fault::contain(|| {
            self.render(surface)?;
            diagnostics.render(surface)?;
            surface.present()
        });
        if let Err(failure) = drawn {
            diagnostics.report(format!("render failed: {failure}"));
        }
    }
}

impl std::fmt::Debug for VisualEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualEngine")
            .field("particles", &self.particles.len())
            .field("rings", &self.rings.len())
            .field("glyphs", &self.glyphs.len())
            .field("hue", &self.hue)
            .field("size", &(self.width, self.height))
            .finish()
    }
}

/// The upper-cased character when `text` is exactly one printable character.
fn single_printable(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = chars.next()?;
    if chars.next().is_some() || c.is_control() {
        return None;
    }
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => Some(u),
        _ => Some(c),
    }
}
