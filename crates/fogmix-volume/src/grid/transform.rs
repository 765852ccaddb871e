//! Affine map between grid index space and world space.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use super::coord::Coord;
use crate::error::{VolumeError, VolumeResult};

/// Origin, orthonormal axes and voxel size of a grid.
///
/// Cell `ijk` samples the world point `origin + axes · ((ijk + ½) · voxel_size)`.
/// Continuous index space puts cell centers on integers, so the world point
/// `p` has index coordinate `axesᵀ · (p − origin) / voxel_size − ½`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTransform {
    origin: Point3<f64>,
    /// Columns are the unit X, Y and Z axes.
    axes: Matrix3<f64>,
    voxel_size: f64,
}

impl GridTransform {
    /// Build a transform from an origin, three axis vectors and a voxel size.
    ///
    /// The axes are orthonormalized by Gram–Schmidt so that scale and shear
    /// do not reach the lattice; handedness is kept.
    pub fn new(origin: Point3<f64>, axes: Matrix3<f64>, voxel_size: f64) -> VolumeResult<Self> {
        if !voxel_size.is_finite() || voxel_size <= 0.0 {
            return Err(VolumeError::invalid(
                "voxel size",
                format!("must be positive and finite, got {}", voxel_size),
            ));
        }
        if !origin.coords.iter().chain(axes.iter()).all(|v| v.is_finite()) {
            return Err(VolumeError::invalid("grid transform", "non-finite origin or axes"));
        }

        let x = axes.column(0).into_owned();
        let y = axes.column(1).into_owned();
        let z = axes.column(2).into_owned();

        let ex = normalize(x).ok_or_else(degenerate)?;
        let ey = normalize(y - ex * ex.dot(&y)).ok_or_else(degenerate)?;
        let ez = normalize(z - ex * ex.dot(&z) - ey * ey.dot(&z)).ok_or_else(degenerate)?;

        Ok(Self {
            origin,
            axes: Matrix3::from_columns(&[ex, ey, ez]),
            voxel_size,
        })
    }

    /// World-aligned lattice through the world origin.
    pub fn axis_aligned(voxel_size: f64) -> VolumeResult<Self> {
        Self::new(Point3::origin(), Matrix3::identity(), voxel_size)
    }

    /// Frame taken from an object's 4×4 world matrix.
    pub fn from_matrix(matrix: &Matrix4<f64>, voxel_size: f64) -> VolumeResult<Self> {
        let origin = Point3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
        let axes = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        Self::new(origin, axes, voxel_size)
    }

    #[inline]
    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    #[inline]
    pub fn axes(&self) -> &Matrix3<f64> {
        &self.axes
    }

    #[inline]
    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// World position of a continuous index-space point.
    #[inline]
    pub fn index_to_world(&self, index: &Point3<f64>) -> Point3<f64> {
        let shifted = index.coords.add_scalar(0.5) * self.voxel_size;
        self.origin + self.axes * shifted
    }

    /// World position of a cell's sample point.
    #[inline]
    pub fn cell_center(&self, c: Coord) -> Point3<f64> {
        self.index_to_world(&Point3::new(c.x as f64, c.y as f64, c.z as f64))
    }

    /// Continuous index-space coordinate of a world point.
    #[inline]
    pub fn world_to_index(&self, world: &Point3<f64>) -> Point3<f64> {
        let local = self.axes.transpose() * (world - self.origin) / self.voxel_size;
        Point3::from(local.add_scalar(-0.5))
    }

    /// Same lattice up to `tolerance` in origin, axes and voxel size.
    pub fn approx_eq(&self, other: &GridTransform, tolerance: f64) -> bool {
        (self.voxel_size - other.voxel_size).abs() <= tolerance
            && (self.origin - other.origin).amax() <= tolerance
            && (self.axes - other.axes).amax() <= tolerance
    }
}

fn normalize(v: Vector3<f64>) -> Option<Vector3<f64>> {
    let len = v.norm();
    (len > 1e-12).then(|| v / len)
}

fn degenerate() -> VolumeError {
    VolumeError::invalid("grid transform", "axes are degenerate (zero or collinear)")
}
