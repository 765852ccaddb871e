//! Core mesh data types.

use nalgebra::{Matrix4, Point3, Vector3};

use crate::error::{MeshError, MeshResult};

/// A vertex in the mesh with optional computed attributes.
///
/// Coordinates are in scene units; the library is unit-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector, computed from adjacent faces.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// A polygon referencing vertex indices.
///
/// Winding is counter-clockwise when viewed from outside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polygon {
    Triangle([u32; 3]),
    Quad([u32; 4]),
}

impl Polygon {
    /// The vertex indices of this polygon in winding order.
    #[inline]
    pub fn indices(&self) -> &[u32] {
        match self {
            Polygon::Triangle(idx) => idx,
            Polygon::Quad(idx) => idx,
        }
    }

    /// Mutable access to the vertex indices.
    #[inline]
    pub fn indices_mut(&mut self) -> &mut [u32] {
        match self {
            Polygon::Triangle(idx) => idx,
            Polygon::Quad(idx) => idx,
        }
    }

    #[inline]
    pub fn is_quad(&self) -> bool {
        matches!(self, Polygon::Quad(_))
    }

    /// Split into triangles. A quad `[a, b, c, d]` becomes `(a, b, c)` and `(a, c, d)`.
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> {
        let (first, second) = match *self {
            Polygon::Triangle(t) => (t, None),
            Polygon::Quad([a, b, c, d]) => ([a, b, c], Some([a, c, d])),
        };
        std::iter::once(first).chain(second)
    }

    /// Edges as (start, end) pairs in winding order.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let idx = self.indices();
        let n = idx.len();
        (0..n).map(move |i| (idx[i], idx[(i + 1) % n]))
    }

    /// Reverse the winding order in place.
    pub fn flip(&mut self) {
        match self {
            Polygon::Triangle(t) => t.swap(1, 2),
            Polygon::Quad(q) => q.swap(1, 3),
        }
    }

    /// True if two or more corners share an index.
    pub fn has_repeated_index(&self) -> bool {
        let idx = self.indices();
        (0..idx.len()).any(|i| idx[i + 1..].contains(&idx[i]))
    }
}

/// An indexed polygon mesh of triangles and quads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Polygons as indices into the vertex array.
    pub polygons: Vec<Polygon>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, polygon_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            polygons: Vec::with_capacity(polygon_count),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Number of triangles after splitting quads.
    pub fn triangle_count(&self) -> usize {
        self.polygons
            .iter()
            .map(|p| if p.is_quad() { 2 } else { 1 })
            .sum()
    }

    /// Check if mesh is empty (no vertices or polygons).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.polygons.is_empty()
    }

    /// Push a vertex and return its index.
    pub fn push_vertex(&mut self, position: Point3<f64>) -> u32 {
        let idx = self.vertices.len() as u32;
        self.vertices.push(Vertex::new(position));
        idx
    }

    /// Index of the first polygon referencing a vertex beyond the vertex count.
    pub fn first_out_of_range(&self) -> Option<(usize, u32)> {
        let n = self.vertices.len() as u32;
        self.polygons.iter().enumerate().find_map(|(pi, poly)| {
            poly.indices().iter().find(|&&i| i >= n).map(|&i| (pi, i))
        })
    }

    /// Fail with [`MeshError::IndexOutOfRange`] if any polygon index is not below the vertex count.
    pub fn check_indices(&self) -> MeshResult<()> {
        match self.first_out_of_range() {
            Some((polygon, index)) => Err(MeshError::IndexOutOfRange {
                polygon,
                index,
                vertex_count: self.vertices.len(),
            }),
            None => Ok(()),
        }
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh is empty.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = first.position;
        let mut max = first.position;

        for vertex in &self.vertices[1..] {
            let p = &vertex.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Iterate over triangles (quads split in two), yielding concrete positions.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.polygons.iter().flat_map(move |poly| {
            poly.triangles().map(move |[i0, i1, i2]| Triangle {
                v0: self.vertices[i0 as usize].position,
                v1: self.vertices[i1 as usize].position,
                v2: self.vertices[i2 as usize].position,
            })
        })
    }

    /// Triangle index triples, quads split in two.
    pub fn triangle_indices(&self) -> Vec<[u32; 3]> {
        self.polygons.iter().flat_map(|p| p.triangles()).collect()
    }

    /// Signed enclosed volume via the divergence theorem.
    ///
    /// Positive for a closed mesh with outward-facing winding.
    pub fn volume(&self) -> f64 {
        self.triangles()
            .map(|t| t.v0.coords.dot(&t.v1.coords.cross(&t.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Apply an affine 4x4 matrix to every position. Normals are rotated by
    /// the inverse transpose and renormalized.
    pub fn transform(&mut self, matrix: &Matrix4<f64>) {
        let normal_matrix = matrix
            .fixed_view::<3, 3>(0, 0)
            .try_inverse()
            .map(|m| m.transpose());

        for vertex in &mut self.vertices {
            vertex.position = matrix.transform_point(&vertex.position);
            if let (Some(n), Some(nm)) = (vertex.normal.as_mut(), normal_matrix.as_ref()) {
                let rotated = nm * *n;
                let len = rotated.norm();
                if len > f64::EPSILON {
                    *n = rotated / len;
                }
            }
        }

        // Mirroring transforms turn the surface inside out.
        if matrix.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
            for poly in &mut self.polygons {
                poly.flip();
            }
        }
    }

    /// Axis-aligned box spanning `min`..`max` as six outward-facing quads.
    pub fn cuboid(min: Point3<f64>, max: Point3<f64>) -> Mesh {
        let mut mesh = Mesh::with_capacity(8, 6);
        for i in 0..8u32 {
            mesh.push_vertex(Point3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            ));
        }
        mesh.polygons = vec![
            Polygon::Quad([0, 2, 3, 1]), // -Z
            Polygon::Quad([4, 5, 7, 6]), // +Z
            Polygon::Quad([0, 1, 5, 4]), // -Y
            Polygon::Quad([2, 6, 7, 3]), // +Y
            Polygon::Quad([0, 4, 6, 2]), // -X
            Polygon::Quad([1, 3, 7, 5]), // +X
        ];
        mesh
    }
}

/// A triangle with concrete vertex positions.
///
/// Utility type for geometric calculations. Winding is counter-clockwise
/// when viewed from the front (normal points toward viewer).
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    /// The direction follows the right-hand rule with CCW winding.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the unit face normal.
    /// Returns None for degenerate triangles (zero area).
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid (center of mass).
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Check if the triangle is degenerate (zero or near-zero area).
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        self.area() < epsilon
    }

    /// Closest point on the triangle to `p` (Ericson, Real-Time Collision Detection 5.1.5).
    pub fn closest_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let (a, b, c) = (self.v0, self.v1, self.v2);
        let ab = b - a;
        let ac = c - a;

        let ap = p - a;
        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return a;
        }

        let bp = p - b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return a + ab * v;
        }

        let cp = p - c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return a + ac * w;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return b + (c - b) * w;
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        a + ab * v + ac * w
    }

    /// Euclidean distance from `p` to the triangle.
    #[inline]
    pub fn distance_to(&self, p: &Point3<f64>) -> f64 {
        (p - self.closest_point(p)).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn test_vertex_creation() {
        let v = Vertex::from_coords(1.0, 2.0, 3.0);
        assert!(approx_eq(v.position.x, 1.0));
        assert!(approx_eq(v.position.y, 2.0));
        assert!(approx_eq(v.position.z, 3.0));
        assert!(v.normal.is_none());
    }

    #[test]
    fn test_triangle_normal() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );

        let normal = tri.normal().expect("non-degenerate triangle");
        assert!(approx_eq(normal.x, 0.0));
        assert!(approx_eq(normal.y, 0.0));
        assert!(approx_eq(normal.z, 1.0));
    }

    #[test]
    fn test_triangle_area() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        assert!(approx_eq(tri.area(), 0.5));
    }

    #[test]
    fn test_degenerate_triangle_normal() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        );
        assert!(tri.normal().is_none());
    }

    #[test]
    fn test_triangle_distance_regions() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        // Above the face
        assert_relative_eq!(tri.distance_to(&Point3::new(0.25, 0.25, 2.0)), 2.0, epsilon = 1e-12);
        // Beyond a vertex
        assert_relative_eq!(tri.distance_to(&Point3::new(-1.0, 0.0, 0.0)), 1.0, epsilon = 1e-12);
        // Beyond the hypotenuse
        let d = tri.distance_to(&Point3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(d, (0.5f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_quad_split_and_flip() {
        let mut quad = Polygon::Quad([0, 1, 2, 3]);
        let tris: Vec<_> = quad.triangles().collect();
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3]]);

        quad.flip();
        assert_eq!(quad, Polygon::Quad([0, 3, 2, 1]));
        assert_eq!(quad.edges().count(), 4);
    }

    #[test]
    fn test_mesh_bounds() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(10.0, 5.0, 3.0));
        mesh.vertices.push(Vertex::from_coords(-2.0, 8.0, 1.0));

        let (min, max) = mesh.bounds().expect("non-empty mesh");
        assert!(approx_eq(min.x, -2.0));
        assert!(approx_eq(min.y, 0.0));
        assert!(approx_eq(min.z, 0.0));
        assert!(approx_eq(max.x, 10.0));
        assert!(approx_eq(max.y, 8.0));
        assert!(approx_eq(max.z, 3.0));
    }

    #[test]
    fn test_empty_mesh_bounds() {
        let mesh = Mesh::new();
        assert!(mesh.bounds().is_none());
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_cuboid_volume_and_area() {
        let cube = Mesh::cuboid(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));
        assert_eq!(cube.polygon_count(), 6);
        assert_eq!(cube.triangle_count(), 12);
        assert_relative_eq!(cube.volume(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(cube.surface_area(), 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_translates_and_keeps_volume() {
        let mut cube = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let m = Matrix4::new_translation(&Vector3::new(5.0, 0.0, 0.0));
        cube.transform(&m);
        let (min, _) = cube.bounds().unwrap();
        assert_relative_eq!(min.x, 5.0, epsilon = 1e-12);
        assert_relative_eq!(cube.volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mirror_transform_keeps_outward_winding() {
        let mut cube = Mesh::cuboid(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let m = Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0));
        cube.transform(&m);
        assert!(cube.volume() > 0.0);
    }

    #[test]
    fn test_first_out_of_range() {
        let mut mesh = Mesh::new();
        mesh.push_vertex(Point3::origin());
        mesh.polygons.push(Polygon::Triangle([0, 0, 3]));
        assert_eq!(mesh.first_out_of_range(), Some((0, 3)));
        assert!(matches!(
            mesh.check_indices(),
            Err(MeshError::IndexOutOfRange { index: 3, .. })
        ));
    }
}
