//! Periodic 3-D process grid.
//!
//! Ranks are laid out row-major over a balanced factorization of the rank
//! count (last dimension varies fastest), the same ordering a periodic
//! Cartesian communicator uses. Each rank precomputes the ranks of its 26
//! neighbors with periodic wraparound.

use kernel::{Direction, DIMENSION, NUM_DIRECTIONS};

/// Process grid shape, this rank's position in it and its neighbor ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    num_ranks: usize,
    my_rank: usize,
    layout_size: [usize; 3],
    layout_pos: [usize; 3],
    neighbors: [usize; NUM_DIRECTIONS],
    initialized: bool,
}

impl Topology {
    /// Unpopulated topology for `my_rank` out of `num_ranks`. Call
    /// [`Topology::initialize`] before using the accessors.
    pub fn new(my_rank: usize, num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "topology needs at least one rank");
        assert!(my_rank < num_ranks, "rank {my_rank} out of {num_ranks}");
        Self {
            num_ranks,
            my_rank,
            layout_size: [0; 3],
            layout_pos: [0; 3],
            neighbors: [0; NUM_DIRECTIONS],
            initialized: false,
        }
    }

    /// Build and initialize in one step.
    pub fn initialized(my_rank: usize, num_ranks: usize) -> Self {
        let mut topology = Self::new(my_rank, num_ranks);
        topology.initialize();
        topology
    }

    /// Compute the grid shape, this rank's position and its neighbors.
    /// Calling it again is a no-op.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }

        self.layout_size = balanced_dims(self.num_ranks);
        self.layout_pos = self.coords_of(self.my_rank);

        for dir in Direction::ALL {
            let offset = dir.offset();
            let mut pos = [0usize; 3];
            for dim in 0..DIMENSION {
                let size = self.layout_size[dim] as i64;
                pos[dim] = (self.layout_pos[dim] as i64 + i64::from(offset[dim])).rem_euclid(size) as usize;
            }
            self.neighbors[dir.index()] = self.rank_of(pos);
        }

        self.initialized = true;
        tracing::debug!(
            rank = self.my_rank,
            "topology {:?}, position {:?}",
            self.layout_size,
            self.layout_pos
        );
    }

    /// Reset local bookkeeping. Transport teardown is the caller's concern.
    pub fn finalize(&mut self) {
        self.layout_size = [0; 3];
        self.layout_pos = [0; 3];
        self.neighbors = [0; NUM_DIRECTIONS];
        self.initialized = false;
    }

    /// Whether [`Topology::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Total number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// This rank.
    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    /// Ranks per dimension.
    pub fn layout_size(&self) -> [usize; 3] {
        debug_assert!(self.initialized);
        self.layout_size
    }

    /// This rank's grid coordinates.
    pub fn layout_pos(&self) -> [usize; 3] {
        debug_assert!(self.initialized);
        self.layout_pos
    }

    /// Rank of the neighbor in `dir`.
    pub fn neighbor(&self, dir: Direction) -> usize {
        debug_assert!(self.initialized);
        self.neighbors[dir.index()]
    }

    /// All neighbor ranks indexed by [`Direction::index`].
    pub fn neighbors(&self) -> &[usize; NUM_DIRECTIONS] {
        &self.neighbors
    }

    /// Rank at grid coordinates `pos` (row-major, z fastest).
    pub fn rank_of(&self, pos: [usize; 3]) -> usize {
        (pos[0] * self.layout_size[1] + pos[1]) * self.layout_size[2] + pos[2]
    }

    /// Grid coordinates of `rank`.
    pub fn coords_of(&self, rank: usize) -> [usize; 3] {
        let [_, ny, nz] = self.layout_size;
        [rank / (ny * nz), (rank / nz) % ny, rank % nz]
    }
}

/// Factor `n` into three dimensions as evenly as possible, largest first.
///
/// Prime factors are taken largest first and each multiplied into the
/// dimension with the smallest product so far.
pub fn balanced_dims(n: usize) -> [usize; 3] {
    let mut factors = Vec::new();
    let mut rest = n;
    let mut p = 2;
    while p * p <= rest {
        while rest % p == 0 {
            factors.push(p);
            rest /= p;
        }
        p += 1;
    }
    if rest > 1 {
        factors.push(rest);
    }

    let mut dims = [1usize; 3];
    for f in factors.into_iter().rev() {
        let smallest = (0..DIMENSION).min_by_key(|&d| dims[d]).unwrap_or(0);
        dims[smallest] *= f;
    }
    dims.sort_unstable_by(|a, b| b.cmp(a));
    dims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_factorizations() {
        assert_eq!(balanced_dims(1), [1, 1, 1]);
        assert_eq!(balanced_dims(2), [2, 1, 1]);
        assert_eq!(balanced_dims(6), [3, 2, 1]);
        assert_eq!(balanced_dims(8), [2, 2, 2]);
        assert_eq!(balanced_dims(12), [3, 2, 2]);
        assert_eq!(balanced_dims(27), [3, 3, 3]);
        assert_eq!(balanced_dims(7), [7, 1, 1]);
        for n in 1..64 {
            assert_eq!(balanced_dims(n).iter().product::<usize>(), n);
        }
    }

    #[test]
    fn coordinates_roundtrip() {
        let t = Topology::initialized(0, 12);
        for rank in 0..12 {
            assert_eq!(t.rank_of(t.coords_of(rank)), rank);
        }
        assert_eq!(t.coords_of(11), [2, 1, 1]);
    }

    #[test]
    fn neighbors_in_2x2x2() {
        let t = Topology::initialized(0, 8);
        assert_eq!(t.layout_size(), [2, 2, 2]);
        assert_eq!(t.layout_pos(), [0, 0, 0]);
        // low and high neighbors coincide when the dimension has two ranks
        assert_eq!(t.neighbor(Direction::X0), 4);
        assert_eq!(t.neighbor(Direction::X1), 4);
        assert_eq!(t.neighbor(Direction::Y0), 2);
        assert_eq!(t.neighbor(Direction::Z1), 1);
        assert_eq!(t.neighbor(Direction::X0Y0Z0), 7);
        assert_eq!(t.neighbor(Direction::X1Y0Z1), 7);
    }

    #[test]
    fn neighbors_wrap_periodically() {
        let t = Topology::initialized(13, 27);
        assert_eq!(t.layout_pos(), [1, 1, 1]);
        for dir in Direction::ALL {
            assert_ne!(t.neighbor(dir), 13, "{dir}");
        }
        let corner = Topology::initialized(0, 27);
        assert_eq!(corner.neighbor(Direction::X0), corner.rank_of([2, 0, 0]));
        assert_eq!(corner.neighbor(Direction::X0Y0Z0), 26);
    }

    #[test]
    fn single_rank_is_its_own_neighbor() {
        let t = Topology::initialized(0, 1);
        assert!(t.neighbors().iter().all(|&n| n == 0));
    }

    #[test]
    fn initialize_is_idempotent_and_finalize_resets() {
        let mut t = Topology::new(3, 8);
        assert!(!t.is_initialized());
        t.initialize();
        let first = t.clone();
        t.initialize();
        assert_eq!(t, first);
        t.finalize();
        assert!(!t.is_initialized());
        t.initialize();
        assert_eq!(t, first);
    }
}
