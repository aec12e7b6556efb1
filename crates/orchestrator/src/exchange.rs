//! Ghost duplication across the 26 neighbor directions.
//!
//! After distribution every rank holds only alive particles. Each alive
//! particle within the dead size of a sub-box face, edge or corner is copied
//! to the neighbor in that direction, shifted by the box size when the copy
//! crosses the periodic boundary. Copies arrive as ghosts tagged with the
//! direction they came from.

use kernel::{Direction, OffsetTable, ParticleRecord, ParticleSet, RegionTable, SubdomainBox, NUM_DIRECTIONS};

use crate::comm::Communicator;
use crate::error::Result;
use crate::message::WireBuffer;
use crate::topology::Topology;

/// Message tag for ghost exchange.
pub const TAG_GHOST: u32 = 30;

/// Bytes of the count prefix of an exchange buffer.
pub(crate) const COUNT_SIZE: usize = 8;

/// Bytes per particle in an exchange buffer: 8 f32 fields, an i64 tag and
/// a u16 mask.
pub(crate) const RECORD_WIRE_SIZE: usize = 8 * 4 + 8 + 2;

/// Append one particle to `buf`.
pub(crate) fn pack_record(buf: &mut WireBuffer, record: &ParticleRecord) -> Result<()> {
    buf.put_values(&record.position)?;
    buf.put_values(&record.velocity)?;
    buf.put_value(record.mass)?;
    buf.put_value(record.potential)?;
    buf.put_value(record.tag)?;
    buf.put_value(record.mask)
}

/// Consume one particle from `buf`.
pub(crate) fn unpack_record(buf: &mut WireBuffer) -> Result<ParticleRecord> {
    let mut record = ParticleRecord::new([0.0; 3], [0.0; 3], 0.0, 0);
    buf.get_values(&mut record.position)?;
    buf.get_values(&mut record.velocity)?;
    record.mass = buf.get_value()?;
    record.potential = buf.get_value()?;
    record.tag = buf.get_value()?;
    record.mask = buf.get_value()?;
    Ok(record)
}

/// Buffer capacity for the largest send list across all ranks.
pub(crate) fn exchange_capacity<C: Communicator + ?Sized>(
    comm: &C,
    send_lists: &[Vec<usize>; NUM_DIRECTIONS],
) -> Result<usize> {
    let local_max = send_lists.iter().map(Vec::len).max().unwrap_or(0);
    let global_max = comm.all_reduce_max(local_max as u64)? as usize;
    Ok(COUNT_SIZE + global_max * RECORD_WIRE_SIZE)
}

/// Per-rank result of a ghost exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    /// Alive particles on this rank
    pub alive: usize,
    /// Ghosts received by this rank
    pub ghosts: usize,
    /// Copies this rank sent, summed over directions
    pub sent: usize,
    /// Alive particles across all ranks
    pub total_alive: u64,
    /// Ghosts across all ranks
    pub total_ghosts: u64,
}

/// Steady-state ghost exchange for one rank.
pub struct ParticleExchange<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    topology: &'a Topology,
    box_size: f32,
    regions: RegionTable,
    offsets: OffsetTable,
    send_lists: [Vec<usize>; NUM_DIRECTIONS],
}

impl<'a, C: Communicator + ?Sized> ParticleExchange<'a, C> {
    /// Prepare exchange regions and periodic offsets. `topology` must be
    /// initialized.
    pub fn new(comm: &'a C, topology: &'a Topology, box_size: f32, dead_size: f32) -> Self {
        let subdomain = SubdomainBox::new(box_size, dead_size, topology.layout_size(), topology.layout_pos());
        Self {
            comm,
            topology,
            box_size,
            regions: Self::calculate_exchange_regions(&subdomain, dead_size),
            offsets: Self::calculate_offset_factor(topology),
            send_lists: Default::default(),
        }
    }

    /// Regions inside the alive box whose particles are copied to each
    /// neighbor.
    pub fn calculate_exchange_regions(subdomain: &SubdomainBox, dead_size: f32) -> RegionTable {
        RegionTable::share_regions(subdomain, dead_size)
    }

    /// Periodic shift multipliers for each direction.
    pub fn calculate_offset_factor(topology: &Topology) -> OffsetTable {
        OffsetTable::new(topology.layout_size(), topology.layout_pos())
    }

    /// Indices queued for the neighbor in `dir`.
    #[cfg(test)]
    pub(crate) fn send_list(&self, dir: Direction) -> &[usize] {
        &self.send_lists[dir.index()]
    }

    /// Run the whole exchange: select, exchange and report totals.
    pub fn exchange_particles(&mut self, particles: &mut ParticleSet) -> Result<ExchangeStats> {
        self.identify_exchange_particles(particles);
        let sent = self.send_lists.iter().map(Vec::len).sum();
        self.exchange_neighbor_particles(particles)?;

        let alive = particles.alive_count();
        let ghosts = particles.ghost_count();
        let total_alive = self.comm.all_reduce_sum(alive as u64)?;
        let total_ghosts = self.comm.all_reduce_sum(ghosts as u64)?;
        if self.topology.my_rank() == 0 {
            tracing::info!("Ghost exchange: {total_alive} alive, {total_ghosts} ghosts across ranks");
        }
        tracing::debug!(rank = self.topology.my_rank(), alive, ghosts, sent, "exchange done");

        Ok(ExchangeStats {
            alive,
            ghosts,
            sent,
            total_alive,
            total_ghosts,
        })
    }

    /// Queue every alive particle for each direction whose region contains it.
    ///
    /// A particle near a corner lands in up to seven lists.
    pub fn identify_exchange_particles(&mut self, particles: &ParticleSet) {
        for list in self.send_lists.iter_mut() {
            list.clear();
        }
        for i in 0..particles.len() {
            if !particles.status[i].is_alive() {
                continue;
            }
            for dir in self.regions.matching(particles.position(i)) {
                self.send_lists[dir.index()].push(i);
            }
        }
    }

    /// Exchange with every neighbor, one opposite pair at a time: send to
    /// one side while receiving from the other, then the reverse.
    pub fn exchange_neighbor_particles(&mut self, particles: &mut ParticleSet) -> Result<()> {
        let capacity = exchange_capacity(self.comm, &self.send_lists)?;
        let mut send_buf = WireBuffer::new(capacity);
        let mut recv_buf = WireBuffer::new(capacity);

        for (a, b) in Direction::PAIRS {
            self.exchange(a, b, &mut send_buf, &mut recv_buf, particles)?;
            self.exchange(b, a, &mut send_buf, &mut recv_buf, particles)?;
        }
        Ok(())
    }

    /// Send the `send_to` list and append what arrives from `recv_from` as
    /// ghosts. A rank that is its own neighbor copies locally.
    fn exchange(
        &self,
        send_to: Direction,
        recv_from: Direction,
        send_buf: &mut WireBuffer,
        recv_buf: &mut WireBuffer,
        particles: &mut ParticleSet,
    ) -> Result<()> {
        let me = self.topology.my_rank();
        let dest = self.topology.neighbor(send_to);
        let source = self.topology.neighbor(recv_from);
        let list = &self.send_lists[send_to.index()];

        if dest == me && source == me {
            for &i in list {
                let mut record = particles.record(i);
                record.position = self.offsets.shift(send_to, record.position, self.box_size);
                particles.push_ghost(&record, recv_from);
            }
        } else {
            send_buf.reset();
            send_buf.put_value(0u64)?;
            for &i in list {
                let mut record = particles.record(i);
                record.position = self.offsets.shift(send_to, record.position, self.box_size);
                pack_record(send_buf, &record)?;
            }
            send_buf.put_value_at(0, list.len() as u64)?;
            send_buf.send(self.comm, dest, TAG_GHOST)?;

            recv_buf.receive(self.comm, source, TAG_GHOST)?;
            let count = recv_buf.get_value::<u64>()?;
            for _ in 0..count {
                particles.push_ghost(&unpack_record(recv_buf)?, recv_from);
            }
        }

        self.comm.barrier();
        Ok(())
    }
}
