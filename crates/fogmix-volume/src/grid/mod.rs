//! Sparse brick grid.
//!
//! Cells are grouped into 8×8×8 bricks. A brick is either a dense [`Node::Leaf`]
//! or a constant [`Node::Tile`]; a brick with no node reads as the grid's
//! background value. Only the narrow band around a surface is stored densely.

mod coord;
mod transform;

use hashbrown::HashMap;
use nalgebra::Point3;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

pub use coord::{BrickCoord, Coord, BRICK_LOG2, BRICK_SIZE, BRICK_VOLUME};
pub use transform::GridTransform;

/// What the values of a grid mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridClass {
    /// Signed distance in world units; negative inside.
    LevelSet,
    /// Density in [0, 1]; 1 inside.
    Fog,
}

/// Storage for one brick.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Dense values in x-fastest order (see [`Coord::local_index`]).
    Leaf(Box<[f32; BRICK_VOLUME]>),
    /// One value for the whole brick.
    Tile(f32),
}

impl Node {
    /// Leaf with every cell set to `value`.
    pub fn dense(value: f32) -> Self {
        Node::Leaf(Box::new([value; BRICK_VOLUME]))
    }

    #[inline]
    pub fn get(&self, local: usize) -> f32 {
        match self {
            Node::Leaf(values) => values[local],
            Node::Tile(v) => *v,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// The single value this node holds, if every cell is within `tolerance` of it.
    pub fn uniform_value(&self, tolerance: f32) -> Option<f32> {
        match self {
            Node::Tile(v) => Some(*v),
            Node::Leaf(values) => {
                let first = values[0];
                values
                    .iter()
                    .all(|v| (v - first).abs() <= tolerance)
                    .then_some(first)
            }
        }
    }

    /// Smallest and largest value stored.
    pub fn value_range(&self) -> (f32, f32) {
        match self {
            Node::Tile(v) => (*v, *v),
            Node::Leaf(values) => values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                }),
        }
    }

    /// Apply `f` to every value; tiles stay tiles.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Node {
        match self {
            Node::Tile(v) => Node::Tile(f(*v)),
            Node::Leaf(values) => {
                let mut out = Box::new([0.0f32; BRICK_VOLUME]);
                for (o, &v) in out.iter_mut().zip(values.iter()) {
                    *o = f(v);
                }
                Node::Leaf(out)
            }
        }
    }
}

/// Node counts for logging and statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GridStats {
    pub leaves: usize,
    pub tiles: usize,
    pub active_voxels: u64,
}

/// A sparse grid of `f32` cells with a transform to world space.
#[derive(Debug, Clone)]
pub struct SparseGrid {
    class: GridClass,
    background: f32,
    transform: GridTransform,
    nodes: HashMap<BrickCoord, Node>,
}

impl SparseGrid {
    /// Empty grid where every cell reads `background`.
    pub fn new(class: GridClass, background: f32, transform: GridTransform) -> Self {
        Self {
            class,
            background,
            transform,
            nodes: HashMap::new(),
        }
    }

    /// Grid with tiles of `value` over every brick touching the inclusive cell box `min..=max`.
    #[cfg(test)]
    pub(crate) fn filled(
        class: GridClass,
        background: f32,
        transform: GridTransform,
        min: Coord,
        max: Coord,
        value: f32,
    ) -> Self {
        let mut grid = Self::new(class, background, transform);
        let (lo, hi) = (min.brick(), max.brick());
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    grid.nodes.insert(BrickCoord::new(x, y, z), Node::Tile(value));
                }
            }
        }
        grid
    }

    /// Grid with dense leaves over `bricks`, each cell computed by `f`, in parallel.
    pub fn from_fn<F>(
        class: GridClass,
        background: f32,
        transform: GridTransform,
        bricks: Vec<BrickCoord>,
        f: F,
    ) -> Self
    where
        F: Fn(Coord) -> f32 + Sync,
    {
        let nodes: Vec<(BrickCoord, Node)> = bricks
            .into_par_iter()
            .map(|b| {
                let mut values = Box::new([0.0f32; BRICK_VOLUME]);
                for (i, v) in values.iter_mut().enumerate() {
                    *v = f(b.cell(i));
                }
                (b, Node::Leaf(values))
            })
            .collect();

        Self {
            class,
            background,
            transform,
            nodes: nodes.into_iter().collect(),
        }
    }

    #[inline]
    pub fn class(&self) -> GridClass {
        self.class
    }

    #[inline]
    pub fn background(&self) -> f32 {
        self.background
    }

    #[inline]
    pub fn transform(&self) -> &GridTransform {
        &self.transform
    }

    /// Change the value meaning and background, keeping the stored values.
    pub fn reclassify(&mut self, class: GridClass, background: f32) {
        self.class = class;
        self.background = background;
    }

    /// Value of a cell, falling back to the background.
    #[inline]
    pub fn get(&self, c: Coord) -> f32 {
        self.nodes
            .get(&c.brick())
            .map_or(self.background, |node| node.get(c.local_index()))
    }

    /// Set a cell, densifying its brick.
    pub fn set(&mut self, c: Coord, value: f32) {
        let background = self.background;
        let node = self.nodes.entry(c.brick()).or_insert(Node::Tile(background));
        if let Node::Tile(v) = *node {
            *node = Node::dense(v);
        }
        if let Node::Leaf(values) = node {
            values[c.local_index()] = value;
        }
    }

    #[inline]
    pub fn node(&self, brick: BrickCoord) -> Option<&Node> {
        self.nodes.get(&brick)
    }

    pub fn insert_node(&mut self, brick: BrickCoord, node: Node) -> Option<Node> {
        self.nodes.insert(brick, node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&BrickCoord, &Node)> {
        self.nodes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_leaf()).count()
    }

    pub fn tile_count(&self) -> usize {
        self.nodes.len() - self.leaf_count()
    }

    /// Number of cells whose value differs from the background.
    pub fn active_voxel_count(&self) -> u64 {
        self.nodes
            .values()
            .map(|node| match node {
                Node::Tile(v) if *v != self.background => BRICK_VOLUME as u64,
                Node::Tile(_) => 0,
                Node::Leaf(values) => {
                    values.iter().filter(|&&v| v != self.background).count() as u64
                }
            })
            .sum()
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            leaves: self.leaf_count(),
            tiles: self.tile_count(),
            active_voxels: self.active_voxel_count(),
        }
    }

    /// Inclusive cell box covered by nodes.
    pub fn index_bounds(&self) -> Option<(Coord, Coord)> {
        let mut keys = self.nodes.keys();
        let first = keys.next()?;
        let (lo, hi) = keys.fold((*first, *first), |(lo, hi), b| {
            (
                BrickCoord::new(lo.x.min(b.x), lo.y.min(b.y), lo.z.min(b.z)),
                BrickCoord::new(hi.x.max(b.x), hi.y.max(b.y), hi.z.max(b.z)),
            )
        });
        Some((
            lo.origin(),
            hi.origin().offset(BRICK_SIZE - 1, BRICK_SIZE - 1, BRICK_SIZE - 1),
        ))
    }

    /// Smallest and largest stored value, background included.
    pub fn value_range(&self) -> (f32, f32) {
        self.nodes
            .values()
            .map(Node::value_range)
            .fold((self.background, self.background), |(lo, hi), (a, b)| {
                (lo.min(a), hi.max(b))
            })
    }

    /// Collapse uniform leaves into tiles and drop tiles equal to the background.
    ///
    /// Returns the number of nodes removed.
    pub fn prune(&mut self, tolerance: f32) -> usize {
        let before = self.nodes.len();
        let background = self.background;

        self.nodes.retain(|_, node| {
            if let Some(v) = node.uniform_value(tolerance) {
                if (v - background).abs() <= tolerance {
                    return false;
                }
                *node = Node::Tile(v);
            }
            true
        });

        let removed = before - self.nodes.len();
        debug!(
            "Pruned grid: {} nodes removed, {} leaves, {} tiles remain",
            removed,
            self.leaf_count(),
            self.tile_count()
        );
        removed
    }

    /// Apply `f` to every node value and to the background, in parallel over bricks.
    pub fn map_values<F>(&mut self, f: F)
    where
        F: Fn(f32) -> f32 + Sync,
    {
        self.background = f(self.background);
        let nodes: Vec<(BrickCoord, Node)> = self.nodes.drain().collect();
        let mapped: Vec<(BrickCoord, Node)> = nodes
            .into_par_iter()
            .map(|(b, node)| (b, node.map(&f)))
            .collect();
        self.nodes.extend(mapped);
    }

    /// Trilinear interpolation at a continuous index-space point.
    pub fn sample_trilinear(&self, p: &Point3<f64>) -> f32 {
        let base = p.map(f64::floor);
        let t = p - base;
        let c0 = Coord::new(base.x as i32, base.y as i32, base.z as i32);

        let weight = |bit: i32, t: f64| if bit == 1 { t } else { 1.0 - t };

        let mut acc = 0.0f64;
        for corner in 0..8 {
            let (dx, dy, dz) = (corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let w = weight(dx, t.x) * weight(dy, t.y) * weight(dz, t.z);
            if w != 0.0 {
                acc += w * self.get(c0.offset(dx, dy, dz)) as f64;
            }
        }
        acc as f32
    }

    /// Value of the cell nearest to a continuous index-space point.
    pub fn sample_nearest(&self, p: &Point3<f64>) -> f32 {
        self.get(Coord::new(
            p.x.round() as i32,
            p.y.round() as i32,
            p.z.round() as i32,
        ))
    }

    /// Value at a world-space point by trilinear interpolation.
    pub fn sample_world(&self, world: &Point3<f64>) -> f32 {
        self.sample_trilinear(&self.transform.world_to_index(world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fog(h: f64) -> SparseGrid {
        SparseGrid::new(GridClass::Fog, 0.0, GridTransform::axis_aligned(h).unwrap())
    }

    #[test]
    fn test_get_set_and_background() {
        let mut grid = fog(1.0);
        assert_eq!(grid.get(Coord::new(3, -4, 100)), 0.0);

        grid.set(Coord::new(-1, 2, 3), 0.75);
        assert_eq!(grid.get(Coord::new(-1, 2, 3)), 0.75);
        assert_eq!(grid.get(Coord::new(-2, 2, 3)), 0.0);
        assert_eq!(grid.leaf_count(), 1);
        assert_eq!(grid.active_voxel_count(), 1);
    }

    #[test]
    fn test_set_inside_tile_keeps_tile_value_elsewhere() {
        let t = GridTransform::axis_aligned(1.0).unwrap();
        let mut grid = SparseGrid::filled(GridClass::Fog, 0.0, t, Coord::new(0, 0, 0), Coord::new(7, 7, 7), 1.0);
        assert_eq!(grid.tile_count(), 1);

        grid.set(Coord::new(1, 1, 1), 0.5);
        assert_eq!(grid.leaf_count(), 1);
        assert_eq!(grid.get(Coord::new(1, 1, 1)), 0.5);
        assert_eq!(grid.get(Coord::new(2, 1, 1)), 1.0);
    }

    #[test]
    fn test_prune_collapses_and_drops() {
        let mut grid = fog(1.0);
        grid.insert_node(BrickCoord::new(0, 0, 0), Node::dense(1.0));
        grid.insert_node(BrickCoord::new(1, 0, 0), Node::dense(0.0));
        grid.set(Coord::new(16, 0, 0), 0.3);

        let removed = grid.prune(0.0);
        assert_eq!(removed, 1);
        assert_eq!(grid.node(BrickCoord::new(0, 0, 0)), Some(&Node::Tile(1.0)));
        assert!(grid.node(BrickCoord::new(1, 0, 0)).is_none());
        assert!(grid.node(BrickCoord::new(2, 0, 0)).unwrap().is_leaf());
    }

    #[test]
    fn test_map_values_maps_background_and_tiles() {
        let mut grid = SparseGrid::new(
            GridClass::LevelSet,
            3.0,
            GridTransform::axis_aligned(1.0).unwrap(),
        );
        grid.insert_node(BrickCoord::new(0, 0, 0), Node::Tile(-3.0));
        grid.set(Coord::new(8, 0, 0), 0.5);

        grid.map_values(|v| v * 2.0);
        assert_eq!(grid.background(), 6.0);
        assert_eq!(grid.node(BrickCoord::new(0, 0, 0)), Some(&Node::Tile(-6.0)));
        assert_eq!(grid.get(Coord::new(8, 0, 0)), 1.0);
        assert_eq!(grid.get(Coord::new(9, 0, 0)), 6.0);
    }

    #[test]
    fn test_trilinear_reproduces_linear_field() {
        let t = GridTransform::axis_aligned(1.0).unwrap();
        let grid = SparseGrid::from_fn(
            GridClass::LevelSet,
            0.0,
            t,
            vec![BrickCoord::new(0, 0, 0)],
            |c| (c.x + 2 * c.y - c.z) as f32,
        );
        let v = grid.sample_trilinear(&Point3::new(2.25, 3.5, 1.75));
        assert_relative_eq!(v, 2.25 + 7.0 - 1.75, epsilon = 1e-5);
        assert_eq!(grid.sample_nearest(&Point3::new(2.4, 3.6, 0.9)), (2 + 8 - 1) as f32);
    }

    #[test]
    fn test_index_bounds_cover_whole_bricks() {
        let mut grid = fog(1.0);
        grid.set(Coord::new(-1, 0, 0), 0.5);
        grid.set(Coord::new(9, 20, 3), 0.5);
        let (lo, hi) = grid.index_bounds().unwrap();
        assert_eq!(lo, Coord::new(-8, 0, 0));
        assert_eq!(hi, Coord::new(15, 23, 7));
    }

    #[test]
    fn test_value_range_includes_background() {
        let mut grid = fog(1.0);
        grid.set(Coord::new(0, 0, 0), 0.4);
        assert_eq!(grid.value_range(), (0.0, 0.4));
    }
}
