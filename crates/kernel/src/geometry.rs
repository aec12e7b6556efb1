//! Sub-box geometry of one rank in a periodic box.
//!
//! A rank owns the half-open alive box `[min_alive, max_alive)`. Ghost
//! selection works on 26 axis-aligned regions, one per neighbor direction,
//! whose thickness along each moved axis is the dead size.

use std::fmt;

use crate::direction::{Direction, DIMENSION, NUM_DIRECTIONS};

/// Alive and share extents of one rank's sub-box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubdomainBox {
    /// Inclusive lower corner of the alive box
    pub min_alive: [f32; 3],
    /// Exclusive upper corner of the alive box
    pub max_alive: [f32; 3],
    /// Alive box expanded downward by the dead size
    pub min_share: [f32; 3],
    /// Alive box expanded upward by the dead size
    pub max_share: [f32; 3],
}

impl SubdomainBox {
    /// Compute the sub-box of the rank at `layout_pos` in a grid of
    /// `layout_size` ranks covering `[0, box_size)` in every dimension.
    ///
    /// The last position in each dimension is clipped exactly to `box_size`
    /// so that the alive boxes tile the whole periodic box.
    pub fn new(
        box_size: f32,
        dead_size: f32,
        layout_size: [usize; 3],
        layout_pos: [usize; 3],
    ) -> Self {
        let mut min_alive = [0.0; 3];
        let mut max_alive = [0.0; 3];
        let mut min_share = [0.0; 3];
        let mut max_share = [0.0; 3];

        for dim in 0..DIMENSION {
            let step = box_size / layout_size[dim] as f32;
            min_alive[dim] = layout_pos[dim] as f32 * step;
            max_alive[dim] = if layout_pos[dim] + 1 >= layout_size[dim] {
                box_size
            } else {
                (layout_pos[dim] + 1) as f32 * step
            };
            min_share[dim] = min_alive[dim] - dead_size;
            max_share[dim] = max_alive[dim] + dead_size;
        }

        Self {
            min_alive,
            max_alive,
            min_share,
            max_share,
        }
    }

    /// Return `true` if `pos` lies in the half-open alive box.
    #[inline]
    pub fn contains_alive(&self, pos: [f32; 3]) -> bool {
        (0..DIMENSION).all(|d| pos[d] >= self.min_alive[d] && pos[d] < self.max_alive[d])
    }
}

/// Axis-aligned half-open box `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Inclusive lower corner
    pub min: [f32; 3],
    /// Exclusive upper corner
    pub max: [f32; 3],
}

impl Region {
    /// Return `true` if `pos` lies inside the region.
    #[inline]
    pub fn contains(&self, pos: [f32; 3]) -> bool {
        (0..DIMENSION).all(|d| pos[d] >= self.min[d] && pos[d] < self.max[d])
    }
}

/// One region per neighbor direction, indexed by [`Direction::index`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTable {
    regions: [Region; NUM_DIRECTIONS],
}

impl RegionTable {
    /// Regions inside the alive box whose particles must be shared with each
    /// neighbor.
    ///
    /// Along a moved axis the region is the `dead_size` slab adjacent to the
    /// corresponding face; along an unmoved axis it spans the alive box. A
    /// particle near one face therefore matches one region, near an edge
    /// three, near a corner seven.
    pub fn share_regions(subdomain: &SubdomainBox, dead_size: f32) -> Self {
        Self::build(|dir, dim| {
            let lo = subdomain.min_alive[dim];
            let hi = subdomain.max_alive[dim];
            match dir.offset()[dim] {
                -1 => (lo, lo + dead_size),
                1 => (hi - dead_size, hi),
                _ => (lo, hi),
            }
        })
    }

    /// Regions outside the alive box, one `dead_size` slab per moved axis,
    /// covering the part of each neighbor's alive box adjacent to this rank.
    ///
    /// A rank at the first grid position of a dimension takes its low slab
    /// from the top of the box, `[box_size - dead_size, box_size)`; a rank at
    /// the last position takes its high slab from `[0, dead_size)`.
    ///
    /// With a layout dimension of size 1 the low and high slabs of that
    /// dimension lie inside the alive box, so regions can overlap; every
    /// overlapping region then names the same neighbor rank.
    pub fn dead_zone_regions(
        subdomain: &SubdomainBox,
        layout_size: [usize; 3],
        layout_pos: [usize; 3],
        box_size: f32,
        dead_size: f32,
    ) -> Self {
        Self::build(|dir, dim| {
            let lo = subdomain.min_alive[dim];
            let hi = subdomain.max_alive[dim];
            match dir.offset()[dim] {
                -1 if layout_pos[dim] == 0 => (box_size - dead_size, box_size),
                -1 => (lo - dead_size, lo),
                1 if layout_pos[dim] + 1 == layout_size[dim] => (0.0, dead_size),
                1 => (hi, hi + dead_size),
                _ => (lo, hi),
            }
        })
    }

    fn build(range: impl Fn(Direction, usize) -> (f32, f32)) -> Self {
        let mut regions = [Region {
            min: [0.0; 3],
            max: [0.0; 3],
        }; NUM_DIRECTIONS];

        for dir in Direction::ALL {
            let region = &mut regions[dir.index()];
            for dim in 0..DIMENSION {
                let (lo, hi) = range(dir, dim);
                region.min[dim] = lo;
                region.max[dim] = hi;
            }
        }

        Self { regions }
    }

    /// Region for `dir`.
    #[inline]
    pub fn region(&self, dir: Direction) -> &Region {
        &self.regions[dir.index()]
    }

    /// All directions whose region contains `pos`, in index order.
    pub fn matching(&self, pos: [f32; 3]) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL
            .into_iter()
            .filter(move |dir| self.regions[dir.index()].contains(pos))
    }
}

impl fmt::Display for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dir in Direction::ALL {
            let r = self.region(dir);
            writeln!(
                f,
                "  {:<9} [{}, {}) [{}, {}) [{}, {})",
                dir.name(),
                r.min[0],
                r.max[0],
                r.min[1],
                r.max[1],
                r.min[2],
                r.max[2]
            )?;
        }
        Ok(())
    }
}

/// Per-direction periodic shift multipliers.
///
/// A ghost sent in direction `dir` carries coordinate
/// `x - factor * box_size` in each dimension, which places it next to the
/// receiving rank's alive box when the send crosses the periodic boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    factors: [[i8; 3]; NUM_DIRECTIONS],
}

impl OffsetTable {
    /// Compute factors for the rank at `layout_pos` in a `layout_size` grid.
    pub fn new(layout_size: [usize; 3], layout_pos: [usize; 3]) -> Self {
        let mut factors = [[0i8; 3]; NUM_DIRECTIONS];
        for dir in Direction::ALL {
            let offset = dir.offset();
            for dim in 0..DIMENSION {
                factors[dir.index()][dim] = match offset[dim] {
                    -1 if layout_pos[dim] == 0 => -1,
                    1 if layout_pos[dim] + 1 == layout_size[dim] => 1,
                    _ => 0,
                };
            }
        }
        Self { factors }
    }

    /// Multipliers for `dir`.
    #[inline]
    pub fn factor(&self, dir: Direction) -> [i8; 3] {
        self.factors[dir.index()]
    }

    /// Position of a particle at `pos` as seen by the neighbor in `dir`.
    pub fn shift(&self, dir: Direction, pos: [f32; 3], box_size: f32) -> [f32; 3] {
        let f = self.factor(dir);
        [
            pos[0] - f32::from(f[0]) * box_size,
            pos[1] - f32::from(f[1]) * box_size,
            pos[2] - f32::from(f[2]) * box_size,
        ]
    }
}
