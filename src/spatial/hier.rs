use crate::simulation::geometry::{Location, Rect};
use crate::simulation::types::{RadioId, RadioProperties};

use super::{Cells, SpatialError, TransmitVisitor, check_bounds, in_range};

#[derive(Debug, Clone, Copy)]
enum Child {
    Node(usize),
    Leaf(usize),
}

#[derive(Debug, Clone)]
struct QuadNode {
    bounds: Rect,
    parent: Option<usize>,
    children: [Child; 4],
    count: usize,
}

/// Quadtree of fixed height. Interior nodes keep a live count of the radios
/// below them so empty subtrees are skipped without descending.
#[derive(Debug, Clone)]
pub struct HierGrid {
    nodes: Vec<QuadNode>,
    leaf_parent: Vec<usize>,
    pub(crate) cells: Cells,
}

/// Quadrant of `bounds` holding `loc`: bit 0 set for the right half, bit 1
/// for the top half. The split line belongs to the right/top half.
fn quadrant(bounds: &Rect, loc: &Location) -> usize {
    usize::from(loc.x >= bounds.mid_x()) | (usize::from(loc.y >= bounds.mid_y()) << 1)
}

fn quadrants(b: &Rect) -> [Rect; 4] {
    let (mx, my) = (b.mid_x(), b.mid_y());
    [
        Rect::new(b.min_x, b.min_y, mx, my),
        Rect::new(mx, b.min_y, b.max_x, my),
        Rect::new(b.min_x, my, mx, b.max_y),
        Rect::new(mx, my, b.max_x, b.max_y),
    ]
}

impl HierGrid {
    /// Build a tree whose leaves sit `height` levels below the root (4^height leaves).
    pub fn new(bounds: Rect, height: u32) -> Self {
        let mut nodes = Vec::new();
        let mut leaf_parent = Vec::new();
        let mut leaf_bounds = Vec::new();
        Self::build(&mut nodes, &mut leaf_parent, &mut leaf_bounds, bounds, height.max(1), None);
        HierGrid {
            nodes,
            leaf_parent,
            cells: Cells::new(leaf_bounds),
        }
    }

    fn build(
        nodes: &mut Vec<QuadNode>,
        leaf_parent: &mut Vec<usize>,
        leaf_bounds: &mut Vec<Rect>,
        bounds: Rect,
        height: u32,
        parent: Option<usize>,
    ) -> usize {
        let idx = nodes.len();
        nodes.push(QuadNode {
            bounds,
            parent,
            children: [Child::Leaf(0); 4],
            count: 0,
        });
        for (q, quad) in quadrants(&bounds).into_iter().enumerate() {
            let child = if height == 1 {
                leaf_parent.push(idx);
                leaf_bounds.push(quad);
                Child::Leaf(leaf_bounds.len() - 1)
            } else {
                Child::Node(Self::build(nodes, leaf_parent, leaf_bounds, quad, height - 1, Some(idx)))
            };
            nodes[idx].children[q] = child;
        }
        idx
    }

    pub fn bounds(&self) -> Rect {
        self.nodes[0].bounds
    }

    pub fn size(&self) -> usize {
        self.nodes[0].count
    }

    fn locate(&self, loc: &Location) -> usize {
        let mut node = 0;
        loop {
            let n = &self.nodes[node];
            match n.children[quadrant(&n.bounds, loc)] {
                Child::Node(next) => node = next,
                Child::Leaf(cell) => return cell,
            }
        }
    }

    /// Add `delta` to the counts of every node above `cell`.
    fn adjust_counts(&mut self, cell: usize, delta: isize) {
        let mut node = Some(self.leaf_parent[cell]);
        while let Some(idx) = node {
            let n = &mut self.nodes[idx];
            n.count = n.count.wrapping_add_signed(delta);
            node = n.parent;
        }
    }

    pub fn add(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds(), id, loc)?;
        let cell = self.locate(loc);
        self.cells.insert(cell, id)?;
        self.adjust_counts(cell, 1);
        Ok(())
    }

    pub fn remove(&mut self, id: RadioId) -> Result<(), SpatialError> {
        let cell = self.cells.remove(id)?;
        self.adjust_counts(cell, -1);
        Ok(())
    }

    pub fn move_to(&mut self, id: RadioId, loc: &Location) -> Result<(), SpatialError> {
        check_bounds(&self.bounds(), id, loc)?;
        let cell = self.locate(loc);
        if let Some(old) = self.cells.relocate(id, cell)? {
            self.adjust_counts(old, -1);
            self.adjust_counts(cell, 1);
        }
        Ok(())
    }

    pub fn visit_transmit(&self, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> usize {
        self.visit_node(0, visitor, src, src_loc, limit)
    }

    fn visit_node(&self, node: usize, visitor: &mut dyn TransmitVisitor, src: &RadioProperties, src_loc: &Location, limit: f64) -> usize {
        let n = &self.nodes[node];
        if n.count == 0 || !in_range(&n.bounds, visitor, src, src_loc, limit) {
            return 0;
        }
        let mut count = 0;
        for child in n.children {
            count += match child {
                Child::Node(next) => self.visit_node(next, visitor, src, src_loc, limit),
                Child::Leaf(cell) => {
                    let c = self.cells.cell(cell);
                    if c.radios.is_empty() || !in_range(&c.bounds, visitor, src, src_loc, limit) {
                        0
                    } else {
                        self.cells.visit_cell(cell, visitor, src, src_loc)
                    }
                }
            };
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::tests::RangeVisitor;

    #[test]
    fn height_determines_leaf_count() {
        assert_eq!(HierGrid::new(Rect::sized(1.0, 1.0), 1).cells.cell(3).bounds, Rect::new(0.5, 0.5, 1.0, 1.0));
        let tree = HierGrid::new(Rect::sized(64.0, 64.0), 3);
        assert_eq!(tree.leaf_parent.len(), 64);
        assert_eq!(tree.nodes.len(), 1 + 4 + 16);
    }

    #[test]
    fn split_lines_belong_to_the_upper_half() {
        let tree = HierGrid::new(Rect::sized(8.0, 8.0), 1);
        assert_eq!(tree.locate(&Location::new(3.999, 3.999)), 0);
        assert_eq!(tree.locate(&Location::new(4.0, 0.0)), 1);
        assert_eq!(tree.locate(&Location::new(0.0, 4.0)), 2);
        assert_eq!(tree.locate(&Location::new(8.0, 8.0)), 3);
    }

    #[test]
    fn counts_follow_radios_across_subtrees() {
        let mut tree = HierGrid::new(Rect::sized(100.0, 100.0), 2);
        tree.add(RadioId(1), &Location::new(10.0, 10.0)).unwrap();
        tree.add(RadioId(2), &Location::new(12.0, 11.0)).unwrap();
        // root, then quadrant 0 subtree
        assert_eq!(tree.size(), 2);
        let q0 = match tree.nodes[0].children[0] {
            Child::Node(n) => n,
            Child::Leaf(_) => unreachable!(),
        };
        let q3 = match tree.nodes[0].children[3] {
            Child::Node(n) => n,
            Child::Leaf(_) => unreachable!(),
        };
        assert_eq!(tree.nodes[q0].count, 2);
        tree.move_to(RadioId(2), &Location::new(90.0, 90.0)).unwrap();
        assert_eq!(tree.nodes[q0].count, 1);
        assert_eq!(tree.nodes[q3].count, 1);
        assert_eq!(tree.size(), 2);
        tree.remove(RadioId(1)).unwrap();
        assert_eq!(tree.nodes[q0].count, 0);
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn far_subtrees_are_pruned() {
        let mut tree = HierGrid::new(Rect::sized(10_000.0, 10_000.0), 4);
        let locations = vec![Location::new(50.0, 50.0), Location::new(80.0, 60.0), Location::new(9_000.0, 9_000.0)];
        for (k, loc) in locations.iter().enumerate() {
            tree.add(RadioId(k as u32), loc).unwrap();
        }
        let props = RadioProperties::default();
        let mut v = RangeVisitor::new(&locations, RadioId(0), -80.0);
        assert_eq!(tree.visit_transmit(&mut v, &props, &locations[0], -80.0), 2);
    }
}
