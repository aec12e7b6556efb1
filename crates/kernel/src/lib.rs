//! Particle decomposition kernel
//!
//! Pure data and geometry for splitting a periodic cosmological box across a
//! 3-D grid of ranks. Nothing in this crate communicates; the orchestrator
//! crate drives these types across ranks.
//!
//! # Modules
//! - [`particle`] -- Struct-of-arrays particle storage and alive/ghost `Status`.
//! - [`direction`] -- The 26 neighbor directions and their opposite pairs.
//! - [`geometry`] -- Alive/share boxes, per-direction region tables, periodic offsets.
//! - [`format`] -- RECORD and BLOCK particle file layouts.

#![warn(missing_docs)]

pub mod direction;
pub mod format;
pub mod geometry;
pub mod particle;

pub use direction::{Direction, DirectionKind, DIMENSION, NUM_DIRECTIONS};
pub use format::{BlockHeader, ByteOrder, FileFormat};
pub use geometry::{OffsetTable, Region, RegionTable, SubdomainBox};
pub use particle::{ParticleRecord, ParticleSet, Status, Tag};

/// Wrap a coordinate into the periodic interval `[0, box_size)`.
#[inline]
pub fn wrap_periodic(value: f32, box_size: f32) -> f32 {
    let wrapped = value.rem_euclid(box_size);
    // rem_euclid can round up to box_size for tiny negative inputs
    if wrapped >= box_size {
        0.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_periodic_maps_into_box() {
        assert_eq!(wrap_periodic(5.0, 100.0), 5.0);
        assert_eq!(wrap_periodic(100.0, 100.0), 0.0);
        assert_eq!(wrap_periodic(-1.0, 100.0), 99.0);
        assert_eq!(wrap_periodic(250.0, 100.0), 50.0);
        let tiny = wrap_periodic(-1e-9, 100.0);
        assert!((0.0..100.0).contains(&tiny));
    }
}
