use crate::simulation::geometry::{Location, Rect};
use crate::simulation::types::{RadioId, RadioProperties};

use super::{Cells, SpatialError, TransmitVisitor, check_bounds};

/// Single cell holding every radio. Transmissions visit all of them.
#[derive(Debug, Clone)]
pub struct LinearList {
    pub(crate) cells: Cells,
}

impl LinearList {
    pub fn new(bounds: Rect) -> Self {
        LinearList { cells: Cells::new([bounds]) }
    }

    pub fn bounds(&self) -> Rect {
        self.cells.cell(0).bounds
    }

    pub fn add(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds(), id, loc)?;
        self.cells.insert(0, id)
    }

    pub fn remove(&mut self, id: RadioId) -> Result<(), SpatialError> {
        self.cells.remove(id).map(|_| ())
    }

    pub fn move_to(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds(), id, loc)?;
        self.cells.relocate(id, 0).map(|_| ())
    }

    pub fn visit_transmit(&self, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location) -> usize {
        self.cells.visit_cell(0, visitor, src, src_loc)
    }
}
