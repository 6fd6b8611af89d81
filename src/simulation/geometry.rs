//! Planar geometry for radio placement and spatial bins.
//!
//! Contains helper functions for:
//! - Locations with antenna height (used by two-ray ground reflection)
//! - Axis-aligned rectangles (spatial bins) and their containment tests
//! - The nearest point of a rectangle as seen from an outside location
//! - Distance calculations (squared distance to avoid sqrt in hot paths)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use super::types::ANTENNA_HEIGHT_DEFAULT;

fn default_height() -> f64 {
    ANTENNA_HEIGHT_DEFAULT
}

/// Radio location in meters. `height` is the antenna height above ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_height")]
    pub height: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Location {
            x,
            y,
            height: ANTENNA_HEIGHT_DEFAULT,
        }
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn distance(&self, other: &Location) -> f64 {
        distance2(self, other).sqrt()
    }

    /// Offset applied towards `target` when the remaining path is split into `steps` equal parts.
    pub fn step_towards(&self, target: &Location, steps: u32) -> Location {
        let n = f64::from(steps.max(1));
        Location {
            x: (target.x - self.x) / n,
            y: (target.y - self.y) / n,
            height: 0.0,
        }
    }
}

/// Translation keeps the antenna height of the left-hand location.
impl Add for Location {
    type Output = Location;

    fn add(self, rhs: Location) -> Location {
        Location {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            height: self.height,
        }
    }
}

impl Sub for Location {
    type Output = Location;

    fn sub(self, rhs: Location) -> Location {
        Location {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            height: self.height,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Squared Euclidean distance in meters (avoids a sqrt in hot paths).
pub fn distance2(a: &Location, b: &Location) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Axis-aligned rectangle given by its bottom-left and top-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Rect {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Rectangle anchored at the origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Rect::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn mid_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn mid_y(&self) -> f64 {
        (self.min_y + self.max_y) / 2.0
    }

    /// Inclusive point-in-rectangle test.
    pub fn contains(&self, p: &Location) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Point of this rectangle closest to `p`, or `None` when `p` lies
    /// inside (boundary included).
    ///
    /// Nine regions around the rectangle: the four corners when `p` is
    /// diagonal to it, the projection onto an edge when `p` is beside it.
    /// The returned point keeps `p`'s antenna height.
    pub fn nearest_point(&self, p: &Location) -> Option<Location> {
        let at = |x: f64, y: f64| Some(Location { x, y, height: p.height });
        if p.x < self.min_x {
            if p.y < self.min_y {
                at(self.min_x, self.min_y)
            } else if p.y > self.max_y {
                at(self.min_x, self.max_y)
            } else {
                at(self.min_x, p.y)
            }
        } else if p.x > self.max_x {
            if p.y < self.min_y {
                at(self.max_x, self.min_y)
            } else if p.y > self.max_y {
                at(self.max_x, self.max_y)
            } else {
                at(self.max_x, p.y)
            }
        } else if p.y < self.min_y {
            at(p.x, self.min_y)
        } else if p.y > self.max_y {
            at(p.x, self.max_y)
        } else {
            None
        }
    }

}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[({}, {}) - ({}, {})]", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}
