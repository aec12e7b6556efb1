//! Particle data structures using struct-of-arrays layout.

use crate::direction::Direction;

/// Integer particle identifier as carried through the pipeline.
pub type Tag = i64;

/// Ownership state of a stored particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Owned by this rank: its position lies in the rank's alive box.
    Alive,
    /// Replicated copy received from the neighbor in the given direction.
    Ghost(Direction),
}

impl Status {
    /// Return `true` for alive particles.
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, Status::Alive)
    }
}

/// One particle's complete field set.
///
/// Used for file pieces and for packing records onto the wire; the
/// pipeline itself stores particles in [`ParticleSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleRecord {
    /// Position [x, y, z]
    pub position: [f32; 3],
    /// Velocity [vx, vy, vz]
    pub velocity: [f32; 3],
    /// Particle mass
    pub mass: f32,
    /// Gravitational potential
    pub potential: f32,
    /// Particle id
    pub tag: Tag,
    /// Per-particle mask bits
    pub mask: u16,
}

impl ParticleRecord {
    /// Record with the given position, velocity, mass and tag; potential and
    /// mask start at zero.
    pub fn new(position: [f32; 3], velocity: [f32; 3], mass: f32, tag: Tag) -> Self {
        Self {
            position,
            velocity,
            mass,
            potential: 0.0,
            tag,
            mask: 0,
        }
    }
}

/// Struct-of-arrays particle storage.
///
/// All arrays are parallel: index `i` across every array refers to the same
/// particle. Alive particles are pushed first by the distributor; ghost
/// exchange only appends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleSet {
    // ---- Positions ----
    /// X positions
    pub x: Vec<f32>,
    /// Y positions
    pub y: Vec<f32>,
    /// Z positions
    pub z: Vec<f32>,

    // ---- Velocities ----
    /// X velocities
    pub vx: Vec<f32>,
    /// Y velocities
    pub vy: Vec<f32>,
    /// Z velocities
    pub vz: Vec<f32>,

    // ---- Scalar fields ----
    /// Particle mass
    pub mass: Vec<f32>,
    /// Gravitational potential
    pub potential: Vec<f32>,
    /// Particle id
    pub tag: Vec<Tag>,
    /// Mask bits
    pub mask: Vec<u16>,
    /// Alive, or ghost with its origin direction
    pub status: Vec<Status>,
}

impl ParticleSet {
    /// Create an empty particle set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `capacity` particles in every array.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            vx: Vec::with_capacity(capacity),
            vy: Vec::with_capacity(capacity),
            vz: Vec::with_capacity(capacity),
            mass: Vec::with_capacity(capacity),
            potential: Vec::with_capacity(capacity),
            tag: Vec::with_capacity(capacity),
            mask: Vec::with_capacity(capacity),
            status: Vec::with_capacity(capacity),
        }
    }

    /// Return the number of particles currently stored.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Return `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Append a particle with the given status.
    pub fn push(&mut self, record: &ParticleRecord, status: Status) {
        self.x.push(record.position[0]);
        self.y.push(record.position[1]);
        self.z.push(record.position[2]);
        self.vx.push(record.velocity[0]);
        self.vy.push(record.velocity[1]);
        self.vz.push(record.velocity[2]);
        self.mass.push(record.mass);
        self.potential.push(record.potential);
        self.tag.push(record.tag);
        self.mask.push(record.mask);
        self.status.push(status);
    }

    /// Append an alive particle.
    pub fn push_alive(&mut self, record: &ParticleRecord) {
        self.push(record, Status::Alive);
    }

    /// Append a ghost received from the neighbor in direction `from`.
    pub fn push_ghost(&mut self, record: &ParticleRecord, from: Direction) {
        self.push(record, Status::Ghost(from));
    }

    /// Position of particle `i`.
    #[inline]
    pub fn position(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Gather particle `i` into a record.
    pub fn record(&self, i: usize) -> ParticleRecord {
        ParticleRecord {
            position: [self.x[i], self.y[i], self.z[i]],
            velocity: [self.vx[i], self.vy[i], self.vz[i]],
            mass: self.mass[i],
            potential: self.potential[i],
            tag: self.tag[i],
            mask: self.mask[i],
        }
    }

    /// Number of alive particles.
    pub fn alive_count(&self) -> usize {
        self.status.iter().filter(|s| s.is_alive()).count()
    }

    /// Number of ghost particles.
    pub fn ghost_count(&self) -> usize {
        self.len() - self.alive_count()
    }

    /// Binary ghost level per particle: 0 for alive, 1 for ghost.
    pub fn ghost_levels(&self) -> Vec<u8> {
        self.status
            .iter()
            .map(|s| if s.is_alive() { 0 } else { 1 })
            .collect()
    }

    /// Keep only the particles for which `keep[i]` is `true`, preserving order.
    ///
    /// `keep` must have one entry per particle.
    pub fn retain_mask(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.len());

        fn filter<T: Copy>(values: &mut Vec<T>, keep: &[bool]) {
            let mut it = keep.iter();
            values.retain(|_| *it.next().unwrap_or(&true));
        }

        filter(&mut self.x, keep);
        filter(&mut self.y, keep);
        filter(&mut self.z, keep);
        filter(&mut self.vx, keep);
        filter(&mut self.vy, keep);
        filter(&mut self.vz, keep);
        filter(&mut self.mass, keep);
        filter(&mut self.potential, keep);
        filter(&mut self.tag, keep);
        filter(&mut self.mask, keep);
        filter(&mut self.status, keep);
    }
}
