//! The 26 neighbor directions of a cell in a periodic 3-D process grid.
//!
//! Naming follows the face/edge/corner convention: `X0` is the low side of
//! the x axis, `X1` the high side. Edges combine two axes, corners all three.

use std::fmt;

/// Number of neighbor directions in three dimensions.
pub const NUM_DIRECTIONS: usize = 26;

/// Spatial dimension of the decomposition.
pub const DIMENSION: usize = 3;

/// One of the 26 neighbor directions (6 faces, 12 edges, 8 corners).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Direction {
    // ---- Faces ----
    /// Low x face
    X0 = 0,
    /// High x face
    X1,
    /// Low y face
    Y0,
    /// High y face
    Y1,
    /// Low z face
    Z0,
    /// High z face
    Z1,

    // ---- Edges ----
    /// Low x, low y edge
    X0Y0,
    /// Low x, high y edge
    X0Y1,
    /// High x, low y edge
    X1Y0,
    /// High x, high y edge
    X1Y1,
    /// Low y, low z edge
    Y0Z0,
    /// Low y, high z edge
    Y0Z1,
    /// High y, low z edge
    Y1Z0,
    /// High y, high z edge
    Y1Z1,
    /// Low z, low x edge
    Z0X0,
    /// Low z, high x edge
    Z0X1,
    /// High z, low x edge
    Z1X0,
    /// High z, high x edge
    Z1X1,

    // ---- Corners ----
    /// Low x, low y, low z corner
    X0Y0Z0,
    /// Low x, low y, high z corner
    X0Y0Z1,
    /// Low x, high y, low z corner
    X0Y1Z0,
    /// Low x, high y, high z corner
    X0Y1Z1,
    /// High x, low y, low z corner
    X1Y0Z0,
    /// High x, low y, high z corner
    X1Y0Z1,
    /// High x, high y, low z corner
    X1Y1Z0,
    /// High x, high y, high z corner
    X1Y1Z1,
}

/// Classification of a direction by how many axes it moves along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKind {
    /// Moves along one axis
    Face,
    /// Moves along two axes
    Edge,
    /// Moves along all three axes
    Corner,
}

impl Direction {
    /// All directions in index order.
    pub const ALL: [Direction; NUM_DIRECTIONS] = [
        Direction::X0,
        Direction::X1,
        Direction::Y0,
        Direction::Y1,
        Direction::Z0,
        Direction::Z1,
        Direction::X0Y0,
        Direction::X0Y1,
        Direction::X1Y0,
        Direction::X1Y1,
        Direction::Y0Z0,
        Direction::Y0Z1,
        Direction::Y1Z0,
        Direction::Y1Z1,
        Direction::Z0X0,
        Direction::Z0X1,
        Direction::Z1X0,
        Direction::Z1X1,
        Direction::X0Y0Z0,
        Direction::X0Y0Z1,
        Direction::X0Y1Z0,
        Direction::X0Y1Z1,
        Direction::X1Y0Z0,
        Direction::X1Y0Z1,
        Direction::X1Y1Z0,
        Direction::X1Y1Z1,
    ];

    /// The 13 opposite pairs, in the order exchanges are performed.
    pub const PAIRS: [(Direction, Direction); NUM_DIRECTIONS / 2] = [
        (Direction::X0, Direction::X1),
        (Direction::Y0, Direction::Y1),
        (Direction::Z0, Direction::Z1),
        (Direction::X0Y0, Direction::X1Y1),
        (Direction::X0Y1, Direction::X1Y0),
        (Direction::Y0Z0, Direction::Y1Z1),
        (Direction::Y0Z1, Direction::Y1Z0),
        (Direction::Z0X0, Direction::Z1X1),
        (Direction::Z0X1, Direction::Z1X0),
        (Direction::X0Y0Z0, Direction::X1Y1Z1),
        (Direction::X0Y0Z1, Direction::X1Y1Z0),
        (Direction::X0Y1Z0, Direction::X1Y0Z1),
        (Direction::X0Y1Z1, Direction::X1Y0Z0),
    ];

    /// Stable index in `0..26`, usable for direction-indexed tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Direction with the given index, if in range.
    pub fn from_index(index: usize) -> Option<Direction> {
        Self::ALL.get(index).copied()
    }

    /// Unit offset `[dx, dy, dz]` with components in `{-1, 0, 1}`.
    pub fn offset(self) -> [i32; DIMENSION] {
        use Direction::*;
        match self {
            X0 => [-1, 0, 0],
            X1 => [1, 0, 0],
            Y0 => [0, -1, 0],
            Y1 => [0, 1, 0],
            Z0 => [0, 0, -1],
            Z1 => [0, 0, 1],
            X0Y0 => [-1, -1, 0],
            X0Y1 => [-1, 1, 0],
            X1Y0 => [1, -1, 0],
            X1Y1 => [1, 1, 0],
            Y0Z0 => [0, -1, -1],
            Y0Z1 => [0, -1, 1],
            Y1Z0 => [0, 1, -1],
            Y1Z1 => [0, 1, 1],
            Z0X0 => [-1, 0, -1],
            Z0X1 => [1, 0, -1],
            Z1X0 => [-1, 0, 1],
            Z1X1 => [1, 0, 1],
            X0Y0Z0 => [-1, -1, -1],
            X0Y0Z1 => [-1, -1, 1],
            X0Y1Z0 => [-1, 1, -1],
            X0Y1Z1 => [-1, 1, 1],
            X1Y0Z0 => [1, -1, -1],
            X1Y0Z1 => [1, -1, 1],
            X1Y1Z0 => [1, 1, -1],
            X1Y1Z1 => [1, 1, 1],
        }
    }

    /// The direction pointing the other way.
    pub fn opposite(self) -> Direction {
        use Direction::*;
        match self {
            X0 => X1,
            X1 => X0,
            Y0 => Y1,
            Y1 => Y0,
            Z0 => Z1,
            Z1 => Z0,
            X0Y0 => X1Y1,
            X1Y1 => X0Y0,
            X0Y1 => X1Y0,
            X1Y0 => X0Y1,
            Y0Z0 => Y1Z1,
            Y1Z1 => Y0Z0,
            Y0Z1 => Y1Z0,
            Y1Z0 => Y0Z1,
            Z0X0 => Z1X1,
            Z1X1 => Z0X0,
            Z0X1 => Z1X0,
            Z1X0 => Z0X1,
            X0Y0Z0 => X1Y1Z1,
            X1Y1Z1 => X0Y0Z0,
            X0Y0Z1 => X1Y1Z0,
            X1Y1Z0 => X0Y0Z1,
            X0Y1Z0 => X1Y0Z1,
            X1Y0Z1 => X0Y1Z0,
            X0Y1Z1 => X1Y0Z0,
            X1Y0Z0 => X0Y1Z1,
        }
    }

    /// Face, edge or corner.
    pub fn kind(self) -> DirectionKind {
        match self.offset().iter().filter(|&&o| o != 0).count() {
            1 => DirectionKind::Face,
            2 => DirectionKind::Edge,
            _ => DirectionKind::Corner,
        }
    }

    /// Upper-case label such as `X0_Y1_Z0`.
    pub fn name(self) -> &'static str {
        use Direction::*;
        match self {
            X0 => "X0",
            X1 => "X1",
            Y0 => "Y0",
            Y1 => "Y1",
            Z0 => "Z0",
            Z1 => "Z1",
            X0Y0 => "X0_Y0",
            X0Y1 => "X0_Y1",
            X1Y0 => "X1_Y0",
            X1Y1 => "X1_Y1",
            Y0Z0 => "Y0_Z0",
            Y0Z1 => "Y0_Z1",
            Y1Z0 => "Y1_Z0",
            Y1Z1 => "Y1_Z1",
            Z0X0 => "Z0_X0",
            Z0X1 => "Z0_X1",
            Z1X0 => "Z1_X0",
            Z1X1 => "Z1_X1",
            X0Y0Z0 => "X0_Y0_Z0",
            X0Y0Z1 => "X0_Y0_Z1",
            X0Y1Z0 => "X0_Y1_Z0",
            X0Y1Z1 => "X0_Y1_Z1",
            X1Y0Z0 => "X1_Y0_Z0",
            X1Y0Z1 => "X1_Y0_Z1",
            X1Y1Z0 => "X1_Y1_Z0",
            X1Y1Z1 => "X1_Y1_Z1",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
