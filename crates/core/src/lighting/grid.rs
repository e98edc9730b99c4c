use serde::Serialize;

use crate::ColorRgb;

pub const ROWS: usize = 6;
pub const COLS: usize = 22;

/// Multiplier applied to every lit cell on each flush.
pub const AMBIENT_DECAY: f64 = 0.9;

/// Address of one key on the lighting surface. Always in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    row: usize,
    col: usize,
}

impl GridCell {
    /// Returns `None` when the address falls outside the `ROWS x COLS` grid.
    pub fn new(row: usize, col: usize) -> Option<Self> {
        (row < ROWS && col < COLS).then_some(Self { row, col })
    }

    pub fn row(self) -> usize {
        self.row
    }

    pub fn col(self) -> usize {
        self.col
    }

    fn offset(self, d_row: isize, d_col: isize) -> Option<Self> {
        let row = self.row.checked_add_signed(d_row)?;
        let col = self.col.checked_add_signed(d_col)?;
        Self::new(row, col)
    }

    pub fn chebyshev_distance(self, other: Self) -> usize {
        self.row.abs_diff(other.row).max(self.col.abs_diff(other.col))
    }
}

/// Cells on the border of the `(2d+1) x (2d+1)` square centred on `origin`,
/// clipped to the grid.
pub fn square_ring(origin: GridCell, distance: usize) -> impl Iterator<Item = GridCell> {
    let d = distance as isize;
    (-d..=d).flat_map(move |d_row| {
        (-d..=d).filter_map(move |d_col| {
            if d_row.abs() != d && d_col.abs() != d {
                return None;
            }
            origin.offset(d_row, d_col)
        })
    })
}

/// Wire representation of the grid: one packed `0xBBGGRR` value per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GridFrame(pub [[u32; COLS]; ROWS]);

impl GridFrame {
    pub fn at(&self, cell: GridCell) -> u32 {
        self.0[cell.row][cell.col]
    }
}

/// Persistent colour state of every key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingGrid {
    cells: [[ColorRgb; COLS]; ROWS],
}

impl Default for LightingGrid {
    fn default() -> Self {
        Self {
            cells: [[ColorRgb::BLACK; COLS]; ROWS],
        }
    }
}

impl LightingGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cell: GridCell) -> ColorRgb {
        self.cells[cell.row][cell.col]
    }

    pub fn set(&mut self, cell: GridCell, color: ColorRgb) {
        self.cells[cell.row][cell.col] = color;
    }

    pub fn is_dark(&self) -> bool {
        self.cells.iter().flatten().all(|c| c.is_off())
    }

    pub fn lit_cells(&self) -> impl Iterator<Item = (GridCell, ColorRgb)> + '_ {
        self.cells.iter().enumerate().flat_map(|(row, cols)| {
            cols.iter()
                .enumerate()
                .filter(|(_, color)| !color.is_off())
                .map(move |(col, color)| (GridCell { row, col }, *color))
        })
    }

    pub fn to_frame(&self) -> GridFrame {
        let mut frame = [[0u32; COLS]; ROWS];
        for (row, cols) in self.cells.iter().enumerate() {
            for (col, color) in cols.iter().enumerate() {
                frame[row][col] = color.to_bgr();
            }
        }
        GridFrame(frame)
    }

    /// Fades every lit cell by `factor`, snapping cells that become too dim
    /// to off. Returns whether anything is still lit.
    pub fn decay(&mut self, factor: f64) -> bool {
        let mut lit = false;
        for color in self.cells.iter_mut().flatten() {
            if color.is_off() {
                continue;
            }
            let faded = color.scaled(factor);
            *color = if faded.is_below_visible() {
                ColorRgb::BLACK
            } else {
                faded
            };
            lit |= !color.is_off();
        }
        lit
    }
}

/// Outcome of one ripple tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RippleStep {
    /// Painted the ring at `distance` with `color`.
    Painted { distance: usize, color: ColorRgb },
    /// The ripple has run its course and should be dropped.
    Finished,
}

/// An expanding, fading pulse anchored at one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Ripple {
    origin: GridCell,
    base_color: ColorRgb,
    step: u32,
    max_steps: u32,
    decay_factor: f64,
}

impl Ripple {
    pub fn new(origin: GridCell, base_color: ColorRgb, max_steps: u32, decay_factor: f64) -> Self {
        Self {
            origin,
            base_color,
            step: 0,
            max_steps,
            decay_factor,
        }
    }

    pub fn origin(&self) -> GridCell {
        self.origin
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step >= self.max_steps
    }

    /// Moves the ripple one ring outward and paints it, last writer wins.
    pub fn advance(&mut self, grid: &mut LightingGrid) -> RippleStep {
        if self.is_finished() {
            return RippleStep::Finished;
        }
        self.step += 1;

        let brightness = self.decay_factor.powi(self.step as i32);
        let color = self.base_color.scaled(brightness);
        let distance = self.step as usize;
        for cell in square_ring(self.origin, distance) {
            grid.set(cell, color);
        }

        RippleStep::Painted { distance, color }
    }
}
