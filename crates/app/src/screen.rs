//! Truecolor terminal backend for the visual engine.
//!
//! The engine works in pixels; every terminal cell stands for a block of
//! `CELL_WIDTH x CELL_HEIGHT` virtual pixels so per-frame motion keeps its
//! on-screen proportions. Frames are composed in a back buffer and only the
//! cells that changed since the last present are written out.

use std::io::Write;

use crossterm::{
    cursor, queue,
    style::{
        Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor,
    },
    terminal::{BeginSynchronizedUpdate, EndSynchronizedUpdate},
};
use keysmash_core::{
    visuals::{Point, RadialGradient, Surface},
    ColorRgb, ColorRgba, Result,
};

pub const CELL_WIDTH: f32 = 8.0;
pub const CELL_HEIGHT: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cell {
    ch: char,
    fg: ColorRgb,
    bg: ColorRgb,
    bold: bool,
}

impl Cell {
    fn blank(bg: ColorRgb) -> Self {
        Self {
            ch: ' ',
            fg: bg,
            bg,
            bold: false,
        }
    }
}

pub struct TerminalSurface<W: Write> {
    out: W,
    cols: u16,
    rows: u16,
    back: Vec<Cell>,
    front: Vec<Option<Cell>>,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W, cols: u16, rows: u16) -> Self {
        let n = cols as usize * rows as usize;
        Self {
            out,
            cols,
            rows,
            back: vec![Cell::blank(ColorRgb::BLACK); n],
            front: vec![None; n],
        }
    }

    /// Follows a terminal resize. The next present repaints every cell.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let n = cols as usize * rows as usize;
        self.cols = cols;
        self.rows = rows;
        self.back = vec![Cell::blank(ColorRgb::BLACK); n];
        self.front = vec![None; n];
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    fn index(&self, col: i64, row: i64) -> Option<usize> {
        if col < 0 || row < 0 || col >= i64::from(self.cols) || row >= i64::from(self.rows) {
            return None;
        }
        Some(row as usize * self.cols as usize + col as usize)
    }

    fn cell_of(point: Point) -> (i64, i64) {
        (
            (point.x / CELL_WIDTH).floor() as i64,
            (point.y / CELL_HEIGHT).floor() as i64,
        )
    }

    fn cell_center(col: i64, row: i64) -> Point {
        Point::new(
            (col as f32 + 0.5) * CELL_WIDTH,
            (row as f32 + 0.5) * CELL_HEIGHT,
        )
    }

    /// Blends `color` into the background of every cell whose centre passes
    /// `hit`, within the bounding box `center +/- reach`.
    fn blend_where(
        &mut self,
        center: Point,
        reach: f32,
        color: ColorRgba,
        hit: impl Fn(f32) -> bool,
    ) {
        let (c0, r0) = Self::cell_of(Point::new(center.x - reach, center.y - reach));
        let (c1, r1) = Self::cell_of(Point::new(center.x + reach, center.y + reach));
        for row in r0..=r1 {
            for col in c0..=c1 {
                let Some(i) = self.index(col, row) else {
                    continue;
                };
                let p = Self::cell_center(col, row);
                let d = ((p.x - center.x).powi(2) + (p.y - center.y).powi(2)).sqrt();
                if hit(d) {
                    self.blend(i, color);
                }
            }
        }
    }

    fn blend(&mut self, i: usize, color: ColorRgba) {
        let cell = &mut self.back[i];
        cell.bg = color.over(cell.bg);
        if cell.ch == ' ' {
            cell.fg = cell.bg;
        }
    }
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn size(&self) -> (f32, f32) {
        (
            f32::from(self.cols) * CELL_WIDTH,
            f32::from(self.rows) * CELL_HEIGHT,
        )
    }

    fn fill_background(&mut self, gradient: &RadialGradient) -> Result<()> {
        let cols = i64::from(self.cols);
        for (i, cell) in self.back.iter_mut().enumerate() {
            let (col, row) = (i as i64 % cols, i as i64 / cols);
            *cell = Cell::blank(gradient.color_at(Self::cell_center(col, row)));
        }
        Ok(())
    }

    fn stroke_circle(
        &mut self,
        center: Point,
        radius: f32,
        line_width: f32,
        color: ColorRgba,
    ) -> Result<()> {
        // A cell is as tall as the thickest ring, so thinner strokes are widened
        // to half a cell to stay unbroken.
        let half = (line_width / 2.0).max(CELL_HEIGHT / 2.0);
        self.blend_where(center, radius + half, color, |d| (d - radius).abs() <= half);
        Ok(())
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: ColorRgba) -> Result<()> {
        // Particles smaller than a cell still mark the cell they sit in.
        let (col, row) = Self::cell_of(center);
        let own = Self::cell_center(col, row);
        let own_distance = ((own.x - center.x).powi(2) + (own.y - center.y).powi(2)).sqrt();
        if own_distance > radius {
            if let Some(i) = self.index(col, row) {
                self.blend(i, color);
            }
        }
        self.blend_where(center, radius, color, |d| d <= radius);
        Ok(())
    }

    fn draw_glyph(&mut self, at: Point, character: char, _scale: f32, color: ColorRgba) -> Result<()> {
        let (col, row) = Self::cell_of(at);
        if let Some(i) = self.index(col, row) {
            let cell = &mut self.back[i];
            cell.ch = character;
            cell.fg = color.over(cell.bg);
            cell.bold = true;
        }
        Ok(())
    }

    fn draw_overlay_line(&mut self, line: usize, text: &str, color: ColorRgb) -> Result<()> {
        let row = line as i64;
        for (col, ch) in text.chars().enumerate() {
            let Some(i) = self.index(col as i64, row) else {
                break;
            };
            self.back[i] = Cell {
                ch,
                fg: color,
                bg: ColorRgb::BLACK,
                bold: false,
            };
        }
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        queue!(self.out, BeginSynchronizedUpdate)?;
        let mut last: Option<Cell> = None;
        let cols = self.cols as usize;

        for (i, cell) in self.back.iter().enumerate() {
            if self.front[i] == Some(*cell) {
                last = None;
                continue;
            }
            if last.is_none() {
                queue!(self.out, cursor::MoveTo((i % cols) as u16, (i / cols) as u16))?;
            }
            if last.map(|l| l.bold) != Some(cell.bold) {
                let attr = if cell.bold {
                    Attribute::Bold
                } else {
                    Attribute::NormalIntensity
                };
                queue!(self.out, SetAttribute(attr))?;
            }
            if last.map(|l| l.bg) != Some(cell.bg) {
                queue!(self.out, SetBackgroundColor(rgb(cell.bg)))?;
            }
            if last.map(|l| l.fg) != Some(cell.fg) {
                queue!(self.out, SetForegroundColor(rgb(cell.fg)))?;
            }
            queue!(self.out, Print(cell.ch))?;
            // Printing in the last column leaves the cursor in place; force a move.
            last = if (i + 1) % cols == 0 { None } else { Some(*cell) };
            self.front[i] = Some(*cell);
        }

        queue!(
            self.out,
            SetAttribute(Attribute::Reset),
            ResetColor,
            EndSynchronizedUpdate
        )?;
        self.out.flush()?;
        Ok(())
    }
}

fn rgb(c: ColorRgb) -> Color {
    Color::Rgb {
        r: c.r,
        g: c.g,
        b: c.b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> TerminalSurface<Vec<u8>> {
        TerminalSurface::new(Vec::new(), 10, 4)
    }

    fn flat(color: ColorRgb) -> RadialGradient {
        RadialGradient {
            center: Point::new(40.0, 32.0),
            radius: 100.0,
            inner: color,
            outer: color,
        }
    }

    #[test]
    fn size_is_in_virtual_pixels() {
        assert_eq!(surface().size(), (80.0, 64.0));
    }

    #[test]
    fn particles_always_mark_their_own_cell() {
        let mut s = surface();
        s.fill_background(&flat(ColorRgb::BLACK)).unwrap();
        s.fill_circle(Point::new(13.0, 20.0), 2.0, ColorRgba::new(ColorRgb::WHITE, 1.0))
            .unwrap();

        let i = s.index(1, 1).unwrap();
        assert_eq!(s.back[i].bg, ColorRgb::WHITE);
        let lit = s.back.iter().filter(|c| c.bg != ColorRgb::BLACK).count();
        assert_eq!(lit, 1);
    }

    #[test]
    fn rings_leave_their_centre_alone() {
        let mut s = TerminalSurface::new(Vec::new(), 20, 10);
        s.fill_background(&flat(ColorRgb::BLACK)).unwrap();
        let center = TerminalSurface::<Vec<u8>>::cell_center(10, 5);
        s.stroke_circle(center, 40.0, 4.0, ColorRgba::new(ColorRgb::WHITE, 1.0))
            .unwrap();

        assert_eq!(s.back[s.index(10, 5).unwrap()].bg, ColorRgb::BLACK);
        assert_eq!(s.back[s.index(15, 5).unwrap()].bg, ColorRgb::WHITE);
    }

    #[test]
    fn present_only_rewrites_changed_cells() {
        let mut s = surface();
        s.fill_background(&flat(ColorRgb::new(10, 10, 10))).unwrap();
        s.present().unwrap();
        let first = s.writer().len();
        assert!(first > 0);

        s.writer().clear();
        s.fill_background(&flat(ColorRgb::new(10, 10, 10))).unwrap();
        s.draw_glyph(Point::new(4.0, 8.0), 'A', 1.0, ColorRgba::new(ColorRgb::WHITE, 1.0))
            .unwrap();
        s.present().unwrap();

        let second = String::from_utf8_lossy(s.writer()).into_owned();
        assert!(second.contains('A'));
        assert!(second.len() < first);
    }
}
