//! Integer cell and brick coordinates.

use std::ops::{Add, Sub};

/// Cells per brick edge.
pub const BRICK_SIZE: i32 = 8;

/// `log2(BRICK_SIZE)`.
pub const BRICK_LOG2: u32 = 3;

/// Cells per brick.
pub const BRICK_VOLUME: usize = 512;

const LOCAL_MASK: i32 = BRICK_SIZE - 1;

/// Integer coordinate of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Brick containing this cell. Floors toward negative infinity.
    #[inline]
    pub fn brick(self) -> BrickCoord {
        BrickCoord::new(
            self.x >> BRICK_LOG2,
            self.y >> BRICK_LOG2,
            self.z >> BRICK_LOG2,
        )
    }

    /// Offset of this cell inside its brick's dense array.
    #[inline]
    pub fn local_index(self) -> usize {
        ((self.x & LOCAL_MASK)
            | ((self.y & LOCAL_MASK) << BRICK_LOG2)
            | ((self.z & LOCAL_MASK) << (2 * BRICK_LOG2))) as usize
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    #[inline]
    pub fn as_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Add for Coord {
    type Output = Coord;

    #[inline]
    fn add(self, rhs: Coord) -> Coord {
        Coord::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Coord {
    type Output = Coord;

    #[inline]
    fn sub(self, rhs: Coord) -> Coord {
        Coord::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Coordinate of an 8×8×8 brick in the brick lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BrickCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BrickCoord {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// First cell of the brick.
    #[inline]
    pub fn origin(self) -> Coord {
        Coord::new(
            self.x << BRICK_LOG2,
            self.y << BRICK_LOG2,
            self.z << BRICK_LOG2,
        )
    }

    /// Cell at dense-array offset `local` within this brick.
    #[inline]
    pub fn cell(self, local: usize) -> Coord {
        let l = local as i32;
        self.origin().offset(
            l & LOCAL_MASK,
            (l >> BRICK_LOG2) & LOCAL_MASK,
            l >> (2 * BRICK_LOG2),
        )
    }

    /// All cells of the brick in dense-array order.
    pub fn cells(self) -> impl Iterator<Item = Coord> {
        (0..BRICK_VOLUME).map(move |i| self.cell(i))
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}
