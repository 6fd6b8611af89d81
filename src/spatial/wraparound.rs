use crate::simulation::geometry::{Location, Rect};
use crate::simulation::types::{RadioId, RadioProperties};

use super::{Spatial, SpatialError, TransmitVisitor};

/// Toroidal field: the wrapped index is conceptually tiled 3×3 and every
/// transmission is issued once from each of the 9 shifted source images.
#[derive(Debug, Clone)]
pub struct TiledWraparound {
    inner: Box<Spatial>,
    offsets: [(f64, f64); 9],
}

impl TiledWraparound {
    pub fn new(inner: Spatial) -> Self {
        let b = inner.bounds();
        let (w, h) = (b.width(), b.height());
        let mut offsets = [(0.0, 0.0); 9];
        for (k, slot) in offsets.iter_mut().enumerate() {
            let dx = (k % 3) as f64 - 1.0;
            let dy = (k / 3) as f64 - 1.0;
            *slot = (dx * w, dy * h);
        }
        TiledWraparound { inner: Box::new(inner), offsets }
    }

    pub(crate) fn inner(&self) -> &Spatial {
        &self.inner
    }

    pub fn bounds(&self) -> Rect {
        self.inner.bounds()
    }

    pub fn add(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        self.inner.add(id, loc)
    }

    pub fn remove(&mut self, id: RadioId) -> Result<(), SpatialError> {
        self.inner.remove(id)
    }

    pub fn move_to(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        self.inner.move_to(id, loc)
    }

    pub fn visit_transmit(&self, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> usize {
        self.offsets
            .iter()
            .map(|&(dx, dy)| {
                let image = Location {
                    x: src_loc.x + dx,
                    y: src_loc.y + dy,
                    height: src_loc.height,
                };
                self.inner.visit_transmit(visitor, src, &image, limit)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::SpatialConfig;
    use crate::spatial::tests::RangeVisitor;
    use std::collections::BTreeSet;

    #[test]
    fn radios_across_the_edge_hear_each_other() {
        let bounds = Rect::sized(1000.0, 1000.0);
        let locations = vec![Location::new(5.0, 500.0), Location::new(995.0, 500.0), Location::new(500.0, 500.0)];
        let props = RadioProperties::default();
        for config in [SpatialConfig::Linear, SpatialConfig::Grid { divisions: 5 }, SpatialConfig::HierGrid { height: 3 }] {
            let mut flat = Spatial::build(bounds, &config, false).unwrap();
            let mut torus = Spatial::build(bounds, &config, true).unwrap();
            for (k, loc) in locations.iter().enumerate() {
                flat.add(RadioId(k as u32), loc).unwrap();
                torus.add(RadioId(k as u32), loc).unwrap();
            }
            // -60 dBm reaches about 56 m: only the wrapped neighbour 10 m away
            let mut v = RangeVisitor::new(&locations, RadioId(0), -60.0);
            flat.visit_transmit(&mut v, &props, &locations[0], -60.0);
            assert!(v.heard.is_empty());

            let mut v = RangeVisitor::new(&locations, RadioId(0), -60.0);
            torus.visit_transmit(&mut v, &props, &locations[0], -60.0);
            assert_eq!(v.heard, BTreeSet::from([RadioId(1)]));
            assert_eq!(torus.size(), 3);
            assert_eq!(torus.area(), 1_000_000.0);
        }
    }
}
