//! Per-cell combination of two fog volumes.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{VolumeError, VolumeResult};
use crate::grid::{BrickCoord, GridClass, Node, SparseGrid, BRICK_VOLUME};
use crate::resample::{resample_onto, ResamplePolicy};

/// Transforms closer than this in every component share a lattice.
pub const TRANSFORM_TOLERANCE: f64 = 1e-9;

/// How two densities are merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum MixOperator {
    /// `a · b`: keeps only the overlap.
    #[default]
    Multiply,
    /// `a + b`
    Add,
    /// `a − b`
    Subtract,
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
}

impl MixOperator {
    pub const ALL: [MixOperator; 5] = [
        MixOperator::Multiply,
        MixOperator::Add,
        MixOperator::Subtract,
        MixOperator::Min,
        MixOperator::Max,
    ];

    /// Combined density, clamped to [0, 1].
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        let v = match self {
            MixOperator::Multiply => a * b,
            MixOperator::Add => a + b,
            MixOperator::Subtract => a - b,
            MixOperator::Min => a.min(b),
            MixOperator::Max => a.max(b),
        };
        v.clamp(0.0, 1.0)
    }

    pub fn name(self) -> &'static str {
        match self {
            MixOperator::Multiply => "multiply",
            MixOperator::Add => "add",
            MixOperator::Subtract => "subtract",
            MixOperator::Min => "min",
            MixOperator::Max => "max",
        }
    }
}

impl fmt::Display for MixOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MixOperator {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multiply" | "mul" => Ok(MixOperator::Multiply),
            "add" | "sum" => Ok(MixOperator::Add),
            "subtract" | "sub" => Ok(MixOperator::Subtract),
            "min" => Ok(MixOperator::Min),
            "max" => Ok(MixOperator::Max),
            _ => Err(VolumeError::UnsupportedOperator { name: s.to_string() }),
        }
    }
}

impl TryFrom<String> for MixOperator {
    type Error = VolumeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Combine two fog volumes cell by cell.
///
/// `b` is resampled onto `a`'s lattice first when the transforms differ. The
/// result covers the union of both inputs' bricks; a cell one input does not
/// store reads that input's background.
pub fn combine(
    a: &SparseGrid,
    b: &SparseGrid,
    op: MixOperator,
    policy: ResamplePolicy,
) -> VolumeResult<SparseGrid> {
    for (label, grid) in [("first", a), ("second", b)] {
        if grid.class() != GridClass::Fog {
            return Err(VolumeError::invalid(
                "combine input",
                format!("{} grid is a level set, expected fog", label),
            ));
        }
    }

    let resampled;
    let b = if a.transform().approx_eq(b.transform(), TRANSFORM_TOLERANCE) {
        b
    } else {
        debug!("Transforms differ, resampling second grid ({:?})", policy);
        resampled = resample_onto(b, a.transform(), policy);
        &resampled
    };

    let mut keys: HashSet<BrickCoord> = a.nodes().map(|(k, _)| *k).collect();
    keys.extend(b.nodes().map(|(k, _)| *k));
    let keys: Vec<BrickCoord> = keys.into_iter().collect();

    let (bg_a, bg_b) = (a.background(), b.background());
    let nodes: Vec<(BrickCoord, Node)> = keys
        .into_par_iter()
        .map(|brick| {
            let na = a.node(brick).cloned().unwrap_or(Node::Tile(bg_a));
            let nb = b.node(brick).cloned().unwrap_or(Node::Tile(bg_b));
            let node = match (&na, &nb) {
                (Node::Tile(x), Node::Tile(y)) => Node::Tile(op.apply(*x, *y)),
                _ => {
                    let mut values = Box::new([0.0f32; BRICK_VOLUME]);
                    for (i, v) in values.iter_mut().enumerate() {
                        *v = op.apply(na.get(i), nb.get(i));
                    }
                    Node::Leaf(values)
                }
            };
            (brick, node)
        })
        .collect();

    let mut out = SparseGrid::new(GridClass::Fog, op.apply(bg_a, bg_b), *a.transform());
    let touched = nodes.len();
    for (brick, node) in nodes {
        out.insert_node(brick, node);
    }
    out.prune(0.0);

    info!(
        "Combined with {}: {} bricks touched, {} leaves and {} tiles kept",
        op,
        touched,
        out.leaf_count(),
        out.tile_count()
    );
    Ok(out)
}
