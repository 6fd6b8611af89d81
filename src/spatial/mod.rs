//! Spatial index over radio locations.
//!
//! Answers "which radios could hear a transmission from here" without
//! scanning every radio. Bins only store radio ids; locations and radio
//! properties stay in the field registry and are resolved by the visitor.
//!
//! ## Variants
//!
//! - `LinearList`: one cell, exhaustive scan
//! - `Grid`: uniform cells, searched ring by ring outwards from the source
//! - `HierGrid`: quadtree, prunes whole subtrees out of range
//! - `TiledWraparound`: wraps another index into a torus with 9 shifted queries
//!
//! ## Pruning
//!
//! A cell or subtree is skipped when the visitor's `compute_signal` at the
//! nearest point of its rectangle is already below the propagation limit.
//! `compute_signal` must be an upper bound of any real signal so that no
//! receiver above the limit is ever skipped.

mod grid;
mod hier;
mod linear;
mod wraparound;

pub use grid::Grid;
pub use hier::HierGrid;
pub use linear::LinearList;
pub use wraparound::TiledWraparound;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simulation::geometry::{Location, Rect};
use crate::simulation::types::{ConfigError, RadioId, RadioProperties};

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("{id} at {loc} lies outside the spatial bounds {bounds}")]
    OutOfBounds { id: RadioId, loc: Location, bounds: Rect },

    #[error("{0} is already indexed")]
    Duplicate(RadioId),

    #[error("{0} is not indexed")]
    Unknown(RadioId),
}

/// Callbacks used while a transmission query walks the index.
pub trait TransmitVisitor {
    /// Upper bound (dBm) of the signal a receiver standing at `point` could get
    /// from a source at `src_loc`. Used for pruning only.
    fn compute_signal(&self, src: &RadioProperties, src_loc: &Location, point: &Location) -> f64;

    /// Called once per candidate receiver. `src_loc` may be a shifted image of
    /// the real source location when the index wraps around.
    fn visit_transmit(&mut self, src: &RadioProperties, src_loc: &Location, dst: RadioId);
}

/// Which index to build over the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpatialConfig {
    Linear,
    Grid { divisions: usize },
    HierGrid { height: u32 },
}

impl Default for SpatialConfig {
    fn default() -> Self {
        SpatialConfig::HierGrid { height: 5 }
    }
}

/// A spatial index variant.
#[derive(Debug, Clone)]
pub enum Spatial {
    Linear(LinearList),
    Grid(Grid),
    HierGrid(HierGrid),
    Wraparound(TiledWraparound),
}

impl Spatial {
    pub fn build(bounds: Rect, config: &SpatialConfig, wrap: bool) -> Result<Spatial, ConfigError> {
        if !(bounds.area() > 0.0) {
            return Err(ConfigError::Field(format!("spatial bounds {bounds} have no area")));
        }
        let inner = match config {
            SpatialConfig::Linear => Spatial::Linear(LinearList::new(bounds)),
            SpatialConfig::Grid { divisions } => {
                if *divisions == 0 {
                    return Err(ConfigError::Field("grid needs at least one division".to_string()));
                }
                Spatial::Grid(Grid::new(bounds, *divisions))
            }
            SpatialConfig::HierGrid { height } => {
                if *height == 0 || *height > 12 {
                    return Err(ConfigError::Field(format!("quadtree height {height} must be within 1..=12")));
                }
                Spatial::HierGrid(HierGrid::new(bounds, *height))
            }
        };
        Ok(if wrap { Spatial::Wraparound(TiledWraparound::new(inner)) } else { inner })
    }

    pub fn add(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        match self {
            Spatial::Linear(s) => s.add(id, loc),
            Spatial::Grid(s) => s.add(id, loc),
            Spatial::HierGrid(s) => s.add(id, loc),
            Spatial::Wraparound(s) => s.add(id, loc),
        }
    }

    pub fn remove(&mut self, id: RadioId) -> Result<(), SpatialError> {
        match self {
            Spatial::Linear(s) => s.remove(id),
            Spatial::Grid(s) => s.remove(id),
            Spatial::HierGrid(s) => s.remove(id),
            Spatial::Wraparound(s) => s.remove(id),
        }
    }

    /// Update the index after `id` moved to `loc`, re-binning it when it left its cell.
    pub fn move_to(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        match self {
            Spatial::Linear(s) => s.move_to(id, loc),
            Spatial::Grid(s) => s.move_to(id, loc),
            Spatial::HierGrid(s) => s.move_to(id, loc),
            Spatial::Wraparound(s) => s.move_to(id, loc),
        }
    }

    /// Offer every radio that might hear `src` to the visitor. Returns the
    /// number of candidates visited.
    pub fn visit_transmit(&self, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> usize {
        match self {
            Spatial::Linear(s) => s.visit_transmit(visitor, src, src_loc),
            Spatial::Grid(s) => s.visit_transmit(visitor, src, src_loc, limit),
            Spatial::HierGrid(s) => s.visit_transmit(visitor, src, src_loc, limit),
            Spatial::Wraparound(s) => s.visit_transmit(visitor, src, src_loc, limit),
        }
    }

    /// Call `f` for every indexed radio.
    pub fn visit(&self, f: &mut dyn FnMut(RadioId)) -> usize {
        match self {
            Spatial::Linear(s) => s.cells.visit(f),
            Spatial::Grid(s) => s.cells.visit(f),
            Spatial::HierGrid(s) => s.cells.visit(f),
            Spatial::Wraparound(s) => s.inner().visit(f),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Spatial::Linear(s) => s.cells.size(),
            Spatial::Grid(s) => s.cells.size(),
            Spatial::HierGrid(s) => s.size(),
            Spatial::Wraparound(s) => s.inner().size(),
        }
    }

    pub fn bounds(&self) -> Rect {
        match self {
            Spatial::Linear(s) => s.bounds(),
            Spatial::Grid(s) => s.bounds(),
            Spatial::HierGrid(s) => s.bounds(),
            Spatial::Wraparound(s) => s.inner().bounds(),
        }
    }

    pub fn area(&self) -> f64 {
        self.bounds().area()
    }

    /// Nearest point of the indexed region as seen from `p`; `None` if `p`
    /// is inside or on the edge.
    pub fn nearest_boundary_point(&self, p: &Location) -> Option<Location> {
        self.bounds().nearest_point(p)
    }

    /// Rectangle of the leaf cell currently holding `id`.
    pub fn leaf_bounds_of(&self, id: RadioId) -> Option<Rect> {
        match self {
            Spatial::Linear(s) => s.cells.bounds_of(id),
            Spatial::Grid(s) => s.cells.bounds_of(id),
            Spatial::HierGrid(s) => s.cells.bounds_of(id),
            Spatial::Wraparound(s) => s.inner().leaf_bounds_of(id),
        }
    }
}

/// Leaf cell: a rectangle and the radios currently in it.
#[derive(Debug, Clone)]
pub(crate) struct Cell {
    pub(crate) bounds: Rect,
    pub(crate) radios: Vec<RadioId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Membership {
    cell: usize,
    slot: usize,
}

/// All leaf cells of an index plus the `radio → (cell, slot)` membership
/// table, so removal and re-binning are O(1) swaps.
#[derive(Debug, Clone)]
pub(crate) struct Cells {
    cells: Vec<Cell>,
    members: Vec<Option<Membership>>,
    size: usize,
}

impl Cells {
    pub(crate) fn new(bounds: impl IntoIterator<Item = Rect>) -> Self {
        Cells {
            cells: bounds.into_iter().map(|bounds| Cell { bounds, radios: Vec::new() }).collect(),
            members: Vec::new(),
            size: 0,
        }
    }

    pub(crate) fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn cell_of(&self, id: RadioId) -> Option<usize> {
        self.members.get(id.index()).copied().flatten().map(|m| m.cell)
    }

    fn bounds_of(&self, id: RadioId) -> Option<Rect> {
        self.cell_of(id).map(|c| self.cells[c].bounds)
    }

    pub(crate) fn insert(&mut self, cell: usize, id: RadioId) -> Result<(), SpatialError> {
        let idx = id.index();
        if idx >= self.members.len() {
            let grown = (idx + 1).max(self.members.len() * 2);
            self.members.resize(grown, None);
        }
        if self.members[idx].is_some() {
            return Err(SpatialError::Duplicate(id));
        }
        let radios = &mut self.cells[cell].radios;
        radios.push(id);
        self.members[idx] = Some(Membership { cell, slot: radios.len() - 1 });
        self.size += 1;
        Ok(())
    }

    /// Remove `id`, returning the cell it was in.
    pub(crate) fn remove(&mut self, id: RadioId) -> Result<usize, SpatialError> {
        let m = self
            .members
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(SpatialError::Unknown(id))?;
        let radios = &mut self.cells[m.cell].radios;
        radios.swap_remove(m.slot);
        if let Some(&moved) = radios.get(m.slot) {
            if let Some(Some(entry)) = self.members.get_mut(moved.index()) {
                entry.slot = m.slot;
            }
        }
        self.size -= 1;
        Ok(m.cell)
    }

    /// Move `id` into `cell`. Returns the previous cell when it changed.
    pub(crate) fn relocate(&mut self, id: RadioId, cell: usize) -> Result<Option<usize>, SpatialError> {
        let current = self.cell_of(id).ok_or(SpatialError::Unknown(id))?;
        if current == cell {
            return Ok(None);
        }
        self.remove(id)?;
        self.insert(cell, id)?;
        Ok(Some(current))
    }

    pub(crate) fn visit(&self, f: &mut dyn FnMut(RadioId)) -> usize {
        let mut count = 0;
        for cell in &self.cells {
            for &id in &cell.radios {
                f(id);
                count += 1;
            }
        }
        count
    }

    /// Offer every radio of one cell, unconditionally.
    pub(crate) fn visit_cell(&self, cell: usize, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location) -> usize {
        let radios = &self.cells[cell].radios;
        for &id in radios {
            visitor.visit_transmit(src, src_loc, id);
        }
        radios.len()
    }
}

/// Whether a bin with these bounds may hold a receiver above `limit`.
pub(crate) fn in_range(bounds: &Rect, visitor: &dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> bool {
    match bounds.nearest_point(src_loc) {
        None => true,
        Some(point) => visitor.compute_signal(src, src_loc, &point) >= limit,
    }
}

/// Reject locations outside the index bounds.
pub(crate) fn check_bounds(bounds: &Rect, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
    if bounds.contains(loc) {
        Ok(())
    } else {
        Err(SpatialError::OutOfBounds { id, loc: *loc, bounds: *bounds })
    }
}

/// Index of the half-open interval of width `step` starting at `origin`
/// holding `v`, clamped to `0..n`. The far edge belongs to the last interval.
pub(crate) fn slot_index(v: f64, origin: f64, step: f64, n: usize) -> usize {
    let raw = ((v - origin) / step).floor();
    if raw < 0.0 || raw.is_nan() {
        0
    } else {
        (raw as usize).min(n - 1)
    }
}
