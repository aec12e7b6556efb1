//! Relocation of misplaced particles after a one-to-one read.
//!
//! Files written by a previous run on the same decomposition can hold a few
//! particles that drifted just outside the writing rank's alive box. Each
//! such particle sits in one of the neighbor's dead zones (the strip of
//! width `dead_size` beyond a face, edge or corner, wrapped periodically)
//! and is handed to that neighbor, which adopts it as alive. Particles
//! further away match no region and are dropped with a warning.

use kernel::{Direction, ParticleSet, RegionTable, SubdomainBox, NUM_DIRECTIONS};

use crate::comm::Communicator;
use crate::error::Result;
use crate::exchange::{exchange_capacity, pack_record, unpack_record};
use crate::message::WireBuffer;
use crate::topology::Topology;

/// Message tag for initial relocation.
pub const TAG_INITIAL: u32 = 20;

/// Per-rank result of the initial relocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialStats {
    /// Particles handed to neighbors
    pub relocated_out: usize,
    /// Particles adopted from neighbors
    pub relocated_in: usize,
    /// Misplaced particles no neighbor could take
    pub dropped: usize,
    /// Alive particles across all ranks afterwards
    pub total_alive: u64,
}

/// Hands particles outside the alive box to the neighbor that owns them.
pub struct InitialExchange<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    topology: &'a Topology,
    subdomain: SubdomainBox,
    regions: RegionTable,
    send_lists: [Vec<usize>; NUM_DIRECTIONS],
    unmatched: Vec<usize>,
}

impl<'a, C: Communicator + ?Sized> InitialExchange<'a, C> {
    /// Prepare dead-zone regions for this rank. `topology` must be
    /// initialized.
    pub fn new(comm: &'a C, topology: &'a Topology, box_size: f32, dead_size: f32) -> Self {
        let subdomain = SubdomainBox::new(box_size, dead_size, topology.layout_size(), topology.layout_pos());
        Self {
            comm,
            topology,
            regions: Self::calculate_exchange_regions(&subdomain, topology, box_size, dead_size),
            subdomain,
            send_lists: Default::default(),
            unmatched: Vec::new(),
        }
    }

    /// Dead-zone regions just outside the alive box, wrapped periodically
    /// at the edges of the rank grid.
    pub fn calculate_exchange_regions(
        subdomain: &SubdomainBox,
        topology: &Topology,
        box_size: f32,
        dead_size: f32,
    ) -> RegionTable {
        RegionTable::dead_zone_regions(
            subdomain,
            topology.layout_size(),
            topology.layout_pos(),
            box_size,
            dead_size,
        )
    }

    /// Dead-zone regions in use.
    #[cfg(test)]
    pub(crate) fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// Indices queued for the neighbor in `dir`.
    #[cfg(test)]
    pub(crate) fn send_list(&self, dir: Direction) -> &[usize] {
        &self.send_lists[dir.index()]
    }

    /// Select, relocate and drop; report totals.
    pub fn exchange_particles(&mut self, particles: &mut ParticleSet) -> Result<InitialStats> {
        self.identify_exchange_particles(particles);
        let relocated_out = self.send_lists.iter().map(Vec::len).sum();
        let dropped = self.unmatched.len();
        let before = particles.len();

        let relocated_in = self.exchange_neighbor_particles(particles)?;
        debug_assert_eq!(particles.len(), before - relocated_out - dropped + relocated_in);

        let total_alive = self.comm.all_reduce_sum(particles.alive_count() as u64)?;
        let total_dropped = self.comm.all_reduce_sum(dropped as u64)?;
        if self.topology.my_rank() == 0 {
            tracing::info!("Initial exchange: {total_alive} alive after relocation, {total_dropped} dropped");
        }
        tracing::debug!(
            rank = self.topology.my_rank(),
            relocated_out,
            relocated_in,
            dropped,
            "initial exchange done"
        );

        Ok(InitialStats {
            relocated_out,
            relocated_in,
            dropped,
            total_alive,
        })
    }

    /// Queue each alive particle outside the alive box for the neighbor
    /// whose dead zone holds it. Zones only overlap along layout
    /// dimensions of size 1, where every overlapping zone names the same
    /// neighbor, so the first match is taken.
    pub fn identify_exchange_particles(&mut self, particles: &ParticleSet) {
        for list in self.send_lists.iter_mut() {
            list.clear();
        }
        self.unmatched.clear();

        for i in 0..particles.len() {
            if !particles.status[i].is_alive() {
                continue;
            }
            let pos = particles.position(i);
            if self.subdomain.contains_alive(pos) {
                continue;
            }
            match self.regions.matching(pos).next() {
                Some(dir) => self.send_lists[dir.index()].push(i),
                None => {
                    tracing::warn!(
                        rank = self.topology.my_rank(),
                        tag = particles.tag[i],
                        "particle at ({}, {}, {}) is outside every dead zone and will be dropped\n{}",
                        pos[0],
                        pos[1],
                        pos[2],
                        self.regions
                    );
                    self.unmatched.push(i);
                }
            }
        }
    }

    /// Move queued particles to their neighbors, adopt what arrives as alive
    /// and remove what left or matched nothing. Returns the adopted count.
    pub fn exchange_neighbor_particles(&mut self, particles: &mut ParticleSet) -> Result<usize> {
        let capacity = exchange_capacity(self.comm, &self.send_lists)?;
        let mut send_buf = WireBuffer::new(capacity);
        let mut recv_buf = WireBuffer::new(capacity);
        let original = particles.len();

        for (a, b) in Direction::PAIRS {
            self.relocate(a, b, &mut send_buf, &mut recv_buf, particles)?;
            self.relocate(b, a, &mut send_buf, &mut recv_buf, particles)?;
        }
        let adopted = particles.len() - original;

        let mut keep = vec![true; particles.len()];
        for &i in self.send_lists.iter().flatten().chain(&self.unmatched) {
            keep[i] = false;
        }
        particles.retain_mask(&keep);
        Ok(adopted)
    }

    fn relocate(
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
                let record = particles.record(i);
                particles.push_alive(&record);
            }
        } else {
            send_buf.reset();
            send_buf.put_value(0u64)?;
            for &i in list {
                pack_record(send_buf, &particles.record(i))?;
            }
            send_buf.put_value_at(0, list.len() as u64)?;
            send_buf.send(self.comm, dest, TAG_INITIAL)?;

            recv_buf.receive(self.comm, source, TAG_INITIAL)?;
            let count = recv_buf.get_value::<u64>()?;
            for _ in 0..count {
                particles.push_alive(&unpack_record(recv_buf)?);
            }
        }

        self.comm.barrier();
        Ok(())
    }
}
