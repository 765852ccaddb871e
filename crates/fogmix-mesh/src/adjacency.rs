//! Polygon topology queries via adjacency structures.

use hashbrown::HashMap;

use crate::types::Polygon;

/// Lightweight topology structure for polygon meshes.
///
/// Records which polygons use each undirected edge. Quads are treated as four
/// edges, not split, so a quad diagonal is never an edge.
#[derive(Debug, Clone, Default)]
pub struct MeshAdjacency {
    /// Maps edge (min_idx, max_idx) → list of polygon indices that share this edge.
    pub edge_to_polygons: HashMap<(u32, u32), Vec<u32>>,

    /// Number of times each directed edge appears. A consistently oriented
    /// closed surface uses every directed edge exactly once.
    directed: HashMap<(u32, u32), u32>,
}

#[inline]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MeshAdjacency {
    /// Build adjacency structures from a polygon list.
    pub fn build(polygons: &[Polygon]) -> Self {
        let mut adj = Self::default();

        for (poly_idx, poly) in polygons.iter().enumerate() {
            let poly_idx = poly_idx as u32;

            for (a, b) in poly.edges() {
                adj.edge_to_polygons
                    .entry(edge_key(a, b))
                    .or_default()
                    .push(poly_idx);
                *adj.directed.entry((a, b)).or_insert(0) += 1;
            }
        }

        adj
    }

    /// Total number of distinct undirected edges.
    pub fn edge_count(&self) -> usize {
        self.edge_to_polygons.len()
    }

    /// Every edge has at most two polygons.
    pub fn is_manifold(&self) -> bool {
        self.edge_to_polygons.values().all(|polys| polys.len() <= 2)
    }

    /// Every edge has at least two polygons.
    pub fn is_watertight(&self) -> bool {
        self.edge_to_polygons.values().all(|polys| polys.len() >= 2)
    }

    /// Every directed edge appears once and its reverse is present.
    pub fn is_consistently_oriented(&self) -> bool {
        self.directed
            .iter()
            .all(|(&(a, b), &count)| count == 1 && self.directed.contains_key(&(b, a)))
    }

    pub fn boundary_edge_count(&self) -> usize {
        self.edge_to_polygons
            .values()
            .filter(|polys| polys.len() == 1)
            .count()
    }

    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_polygons
            .values()
            .filter(|polys| polys.len() > 2)
            .count()
    }
}
