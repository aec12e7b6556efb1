//! Orchestration Layer
//!
//! Drives the particle decomposition across ranks:
//! - Rank grid and neighbor lookup ([`topology`])
//! - Communication backend and in-process cluster ([`comm`])
//! - Typed byte buffers for particle messages ([`message`])
//! - Reading files and assigning particles to ranks ([`distribute`])
//! - Relocation of misplaced particles after one-to-one reads ([`initial`])
//! - Ghost duplication to the 26 neighbors ([`exchange`])

#![warn(missing_docs)]

pub mod comm;
pub mod config;
pub mod distribute;
pub mod error;
pub mod exchange;
pub mod initial;
pub mod message;
pub mod topology;

pub use comm::{Communicator, LocalCluster, LocalComm};
pub use config::{ReadMode, ReaderConfig};
pub use distribute::{DistributeStats, ParticleDistribute, RingLayout};
pub use error::{Error, Result};
pub use exchange::{ExchangeStats, ParticleExchange};
pub use initial::{InitialExchange, InitialStats};
pub use message::WireBuffer;
pub use topology::Topology;

use kernel::{ParticleSet, SubdomainBox};

/// Everything one rank holds once particles are distributed and ghosted.
#[derive(Debug, Clone)]
pub struct RankOutput {
    /// Rank that produced this output
    pub rank: usize,
    /// Grid position of the rank
    pub layout_pos: [usize; 3],
    /// Alive and share extents of the rank
    pub subdomain: SubdomainBox,
    /// Alive particles followed by ghosts
    pub particles: ParticleSet,
    /// Distribution summary
    pub distribute: DistributeStats,
    /// Initial relocation summary, when it ran
    pub initial: Option<InitialStats>,
    /// Ghost exchange summary
    pub exchange: ExchangeStats,
}

impl RankOutput {
    /// Binary ghost level per particle: 0 alive, 1 ghost.
    pub fn ghost_levels(&self) -> Vec<u8> {
        self.particles.ghost_levels()
    }
}

/// Run the full per-rank pipeline on `comm`.
///
/// Every rank of the communicator must call this with the same `config`.
pub fn prepare_rank<C: Communicator + ?Sized>(comm: &C, config: &ReaderConfig) -> Result<RankOutput> {
    config.validate().map_err(Error::Config)?;

    let mut topology = Topology::new(comm.rank(), comm.size());
    topology.initialize();
    config.validate_layout(topology.layout_size()).map_err(Error::Config)?;
    if comm.rank() == 0 {
        tracing::info!(
            "Decomposing {} over {} ranks as {:?}",
            config.base_file,
            comm.size(),
            topology.layout_size()
        );
    }

    let mut particles = ParticleSet::new();
    let mut distributor = ParticleDistribute::new(comm, &topology, config)?;
    let distribute = distributor.read_particles(&mut particles)?;
    let subdomain = *distributor.subdomain();

    let initial = if config.initial_exchange {
        let mut initial = InitialExchange::new(comm, &topology, config.box_size, config.dead_size);
        Some(initial.exchange_particles(&mut particles)?)
    } else {
        None
    };

    let mut ghosts = ParticleExchange::new(comm, &topology, config.box_size, config.dead_size);
    let exchange = ghosts.exchange_particles(&mut particles)?;

    let output = RankOutput {
        rank: comm.rank(),
        layout_pos: topology.layout_pos(),
        subdomain,
        particles,
        distribute,
        initial,
        exchange,
    };
    topology.finalize();
    Ok(output)
}

/// Run [`prepare_rank`] on an in-process cluster of `num_ranks` ranks and
/// return the outputs in rank order.
///
/// The first rank error is returned if any rank fails.
pub fn run_local(num_ranks: usize, config: &ReaderConfig) -> Result<Vec<RankOutput>> {
    if num_ranks == 0 {
        return Err(Error::Config("at least one rank is required".to_string()));
    }
    config.validate().map_err(Error::Config)?;

    LocalCluster::run(num_ranks, |comm| prepare_rank(comm, config))
        .into_iter()
        .collect()
}
