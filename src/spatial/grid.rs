use crate::simulation::geometry::{Location, Rect};
use crate::simulation::types::{RadioId, RadioProperties};

use super::{Cells, SpatialError, TransmitVisitor, check_bounds, in_range, slot_index};

/// Uniform `divisions × divisions` grid of cells.
///
/// Transmissions are served by walking square rings of cells outwards from
/// the cell nearest to the source. The walk stops after the first ring in
/// which no cell is within range: every cell further out is at least as far
/// from the source along both axes as some cell of that ring.
#[derive(Debug, Clone)]
pub struct Grid {
    bounds: Rect,
    divisions: usize,
    cell_width: f64,
    cell_height: f64,
    pub(crate) cells: Cells,
}

impl Grid {
    pub fn new(bounds: Rect, divisions: usize) -> Self {
        let n = divisions.max(1);
        let cell_width = bounds.width() / n as f64;
        let cell_height = bounds.height() / n as f64;
        let rects = (0..n * n).map(|k| {
            let (i, j) = (k % n, k / n);
            let x0 = bounds.min_x + i as f64 * cell_width;
            let y0 = bounds.min_y + j as f64 * cell_height;
            // last row/column ends exactly on the outer edge
            let x1 = if i + 1 == n { bounds.max_x } else { x0 + cell_width };
            let y1 = if j + 1 == n { bounds.max_y } else { y0 + cell_height };
            Rect::new(x0, y0, x1, y1)
        });
        Grid {
            bounds,
            divisions: n,
            cell_width,
            cell_height,
            cells: Cells::new(rects),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    fn column(&self, x: f64) -> usize {
        slot_index(x, self.bounds.min_x, self.cell_width, self.divisions)
    }

    fn row(&self, y: f64) -> usize {
        slot_index(y, self.bounds.min_y, self.cell_height, self.divisions)
    }

    fn cell_index(&self, i: usize, j: usize) -> usize {
        j * self.divisions + i
    }

    fn locate(&self, loc: &Location) -> usize {
        self.cell_index(self.column(loc.x), self.row(loc.y))
    }

    pub fn add(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds, id, loc)?;
        let cell = self.locate(loc);
        self.cells.insert(cell, id)
    }

    pub fn remove(&mut self, id: RadioId) -> Result<(), SpatialError> {
        self.cells.remove(id).map(|_| ())
    }

    pub fn move_to(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds, id, loc)?;
        let cell = self.locate(loc);
        self.cells.relocate(id, cell).map(|_| ())
    }

    pub fn visit_transmit(&self, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> usize {
        // clamped, so sources outside the grid start from the nearest edge cell
        let ci = self.column(src_loc.x) as isize;
        let cj = self.row(src_loc.y) as isize;
        let n = self.divisions as isize;
        let mut count = 0;
        let mut ring = 0isize;
        loop {
            let mut any_in_range = false;
            let mut any_in_grid = false;
            for j in (cj - ring)..=(cj + ring) {
                if j < 0 || j >= n {
                    continue;
                }
                let on_edge_row = j == cj - ring || j == cj + ring;
                let mut i = ci - ring;
                while i <= ci + ring {
                    if i >= 0 && i < n {
                        any_in_grid = true;
                        let cell = self.cell_index(i as usize, j as usize);
                        if in_range(&self.cells.cell(cell).bounds, visitor, src, src_loc, limit) {
                            any_in_range = true;
                            count += self.cells.visit_cell(cell, visitor, src, src_loc);
                        }
                    }
                    // interior rows only contribute their two ends
                    i += if on_edge_row || ring == 0 { 1 } else { 2 * ring };
                }
            }
            if !any_in_grid || !any_in_range {
                break;
            }
            ring += 1;
        }
        count
    }
}
