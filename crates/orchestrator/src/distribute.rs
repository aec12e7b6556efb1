//! Reading particle files and assigning particles to ranks.
//!
//! Two strategies:
//!
//! - **One-to-one**: rank `r` reads `{base_file}.{r}` straight into its alive
//!   arrays.
//! - **Round-robin**: files are read by a few ranks and each buffer is
//!   rotated around a ring so that every rank sees every particle once and
//!   keeps the ones inside its alive box. Used whenever the number of files
//!   differs from the number of ranks.

use std::fs;
use std::path::{Path, PathBuf};

use kernel::format;
use kernel::{wrap_periodic, ParticleRecord, ParticleSet, SubdomainBox};

use crate::comm::Communicator;
use crate::config::{ReadMode, ReaderConfig};
use crate::error::{Error, Result};
use crate::message::WireBuffer;
use crate::topology::Topology;

/// Message tag for round-robin hops.
pub const TAG_DISTRIBUTE: u32 = 10;

/// Bytes of the count prefix of a particle buffer.
const COUNT_SIZE: usize = 8;

/// Bytes per particle in a distribution buffer: 7 f32 fields and an i64 tag.
const DIST_RECORD_SIZE: usize = 7 * 4 + 8;

/// Find the numbered files `{base}.{n}` next to `base`, sorted by `n`.
///
/// Falls back to `base` itself when no numbered file exists.
pub fn discover_files(base: &Path) -> Result<Vec<PathBuf>> {
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Config(format!("invalid base file name {}", base.display())))?;
    let prefix = format!("{stem}.");

    let mut numbered = Vec::new();
    if dir.is_dir() {
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(suffix) = name.strip_prefix(&prefix) else { continue };
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(n) = suffix.parse::<usize>() {
                if entry.path().is_file() {
                    numbered.push((n, entry.path()));
                }
            }
        }
    }

    if numbered.is_empty() {
        if base.is_file() {
            return Ok(vec![base.to_path_buf()]);
        }
        return Err(Error::NoInputFiles(base.to_path_buf()));
    }

    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, p)| p).collect())
}

/// Ring membership of one rank for round-robin distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingLayout {
    /// Indices of the files this rank reads
    pub files: Vec<usize>,
    /// First rank of this rank's ring
    pub ring_start: usize,
    /// Number of ranks in the ring
    pub ring_len: usize,
    /// Rank buffers are sent to
    pub next: usize,
    /// Rank buffers are received from
    pub prev: usize,
    /// Hops needed for a buffer to visit every ring member
    pub hops: usize,
}

impl RingLayout {
    /// Assign `num_files` files to `num_ranks` ranks and place `rank` in a ring.
    ///
    /// With at least as many files as ranks, file `i` goes to rank
    /// `i % num_ranks` and every rank is in one ring. With fewer files,
    /// consecutive rings of `num_files` ranks each read every file (member
    /// `j` reads file `j`), and the last ring absorbs the leftover ranks.
    pub fn new(num_files: usize, num_ranks: usize, rank: usize) -> Self {
        assert!(num_files > 0 && num_ranks > 0 && rank < num_ranks);

        let (files, ring_start, ring_len) = if num_files >= num_ranks {
            let files = (rank..num_files).step_by(num_ranks).collect();
            (files, 0, num_ranks)
        } else {
            let rings = num_ranks / num_files;
            let ring = (rank / num_files).min(rings - 1);
            let ring_start = ring * num_files;
            let ring_len = if ring + 1 == rings {
                num_ranks - ring_start
            } else {
                num_files
            };
            let member = rank - ring_start;
            let files = if member < num_files { vec![member] } else { Vec::new() };
            (files, ring_start, ring_len)
        };

        let member = rank - ring_start;
        Self {
            files,
            ring_start,
            ring_len,
            next: ring_start + (member + 1) % ring_len,
            prev: ring_start + (member + ring_len - 1) % ring_len,
            hops: ring_len - 1,
        }
    }
}

/// Summary of one distribution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributeStats {
    /// Files found on disk
    pub files: usize,
    /// Particles across all files
    pub total_particles: u64,
    /// Particles kept alive on this rank
    pub alive: usize,
    /// Alive particles summed over all ranks
    pub alive_total: u64,
    /// Pieces each file was read in (round-robin only)
    pub pieces_per_file: usize,
    /// Ring hops per buffer (round-robin only)
    pub hops: usize,
}

/// Reads particle files and keeps the particles alive on this rank.
pub struct ParticleDistribute<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    topology: &'a Topology,
    config: &'a ReaderConfig,
    subdomain: SubdomainBox,
    alive: usize,
}

impl<'a, C: Communicator + ?Sized> ParticleDistribute<'a, C> {
    /// Set up distribution for this rank. `topology` must be initialized.
    pub fn new(comm: &'a C, topology: &'a Topology, config: &'a ReaderConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let subdomain = SubdomainBox::new(
            config.box_size,
            config.dead_size,
            topology.layout_size(),
            topology.layout_pos(),
        );
        Ok(Self {
            comm,
            topology,
            config,
            subdomain,
            alive: 0,
        })
    }

    /// This rank's alive and share extents.
    pub fn subdomain(&self) -> &SubdomainBox {
        &self.subdomain
    }

    /// Read according to the configured mode, appending alive particles.
    pub fn read_particles(&mut self, particles: &mut ParticleSet) -> Result<DistributeStats> {
        let mut stats = match self.config.mode {
            ReadMode::OneToOne => self.read_one_to_one(particles)?,
            ReadMode::RoundRobin => self.read_round_robin(particles)?,
        };

        stats.alive = self.alive;
        stats.alive_total = self.comm.all_reduce_sum(self.alive as u64)?;
        if stats.alive_total != stats.total_particles {
            tracing::warn!(
                rank = self.topology.my_rank(),
                "{} particles alive across ranks but {} were read",
                stats.alive_total,
                stats.total_particles
            );
        }
        if self.topology.my_rank() == 0 {
            tracing::info!(
                "Distributed {} particles from {} files over {} ranks",
                stats.alive_total,
                stats.files,
                self.topology.num_ranks()
            );
        }
        tracing::debug!(rank = self.topology.my_rank(), alive = self.alive, "distribution done");
        Ok(stats)
    }

    /// Read this rank's own file directly into the alive arrays.
    ///
    /// A failed read on any rank aborts the run on every rank.
    pub fn read_one_to_one(&mut self, particles: &mut ParticleSet) -> Result<DistributeStats> {
        let path = PathBuf::from(format!("{}.{}", self.config.base_file, self.topology.my_rank()));
        let read = format::read_all(&path, self.config.format, self.config.byte_order);

        let failed = self.comm.all_reduce_max(u64::from(read.is_err()))?;
        let records = match read {
            Ok(records) => records,
            Err(e) => return Err(Error::io(&path, e)),
        };
        if failed != 0 {
            return Err(Error::Transport(
                "another rank failed to read its particle file".to_string(),
            ));
        }

        for mut record in records {
            for v in record.position.iter_mut() {
                *v = wrap_periodic(*v, self.config.box_size);
            }
            particles.push_alive(&record);
            self.alive += 1;
        }

        let total = self.comm.all_reduce_sum(self.alive as u64)?;
        Ok(DistributeStats {
            files: self.topology.num_ranks(),
            total_particles: total,
            ..DistributeStats::default()
        })
    }

    /// Discover files, size the buffers collectively and rotate every piece
    /// of every file around the rings.
    pub fn read_round_robin(&mut self, particles: &mut ParticleSet) -> Result<DistributeStats> {
        let files = discover_files(Path::new(&self.config.base_file))?;
        let ring = RingLayout::new(files.len(), self.topology.num_ranks(), self.topology.my_rank());

        let counts: Vec<u64> = ring
            .files
            .iter()
            .map(|&f| {
                format::particle_count(&files[f], self.config.format, self.config.byte_order)
                    .unwrap_or_else(|e| {
                        tracing::warn!("cannot size {}: {e}; treating it as empty", files[f].display());
                        0
                    })
            })
            .collect();

        // Every ring reads every file, so only the first ring counts them.
        let own_total = if ring.ring_start == 0 { counts.iter().sum() } else { 0 };
        let total = self.comm.all_reduce_sum(own_total)?;
        let max_file = self.comm.all_reduce_max(counts.iter().copied().max().unwrap_or(0))?;
        let max_files = self.comm.all_reduce_max(ring.files.len() as u64)? as usize;
        let max_hops = self.comm.all_reduce_max(ring.hops as u64)? as usize;

        let piece_size = (max_file as usize).min(self.config.max_read).max(1);
        let pieces = (max_file as usize).div_ceil(piece_size);
        if max_file as usize > self.config.max_read && self.topology.my_rank() == 0 {
            tracing::info!(
                "Largest file has {max_file} particles; reading in {pieces} pieces of {piece_size}"
            );
        }

        let capacity = COUNT_SIZE + piece_size * DIST_RECORD_SIZE;
        let mut current = WireBuffer::new(capacity);
        let mut scratch = WireBuffer::new(capacity);

        for slot in 0..max_files {
            for piece in 0..pieces {
                let source = ring.files.get(slot).map(|&f| (&files[f], counts[slot]));
                self.pack_piece(&mut current, source, piece, piece_size)?;
                self.distribute_particles(&mut current, &mut scratch, &ring, max_hops, particles)?;
            }
        }

        Ok(DistributeStats {
            files: files.len(),
            total_particles: total,
            pieces_per_file: pieces,
            hops: max_hops,
            ..DistributeStats::default()
        })
    }

    /// Fill `buf` with piece `piece` of `source`, or with zero particles when
    /// there is nothing to read or the read fails.
    fn pack_piece(
        &self,
        buf: &mut WireBuffer,
        source: Option<(&PathBuf, u64)>,
        piece: usize,
        piece_size: usize,
    ) -> Result<()> {
        buf.reset();
        buf.put_value(0u64)?;

        let Some((path, count)) = source else {
            return Ok(());
        };
        let start = (piece * piece_size) as u64;
        if start >= count {
            return Ok(());
        }
        let n = ((count - start) as usize).min(piece_size);

        let records = match format::read_piece(path, self.config.format, self.config.byte_order, start, n) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    "read of {} particles at {start} from {} failed: {e}; sending an empty buffer",
                    n,
                    path.display()
                );
                return Ok(());
            }
        };

        for record in &records {
            pack_particle(buf, record, self.config.box_size)?;
        }
        buf.put_value_at(0, records.len() as u64)?;
        Ok(())
    }

    /// Classify the buffer this rank packed, then pass buffers around the
    /// ring, classifying each received one. Every hop ends with a barrier.
    pub fn distribute_particles(
        &mut self,
        current: &mut WireBuffer,
        scratch: &mut WireBuffer,
        ring: &RingLayout,
        max_hops: usize,
        particles: &mut ParticleSet,
    ) -> Result<()> {
        self.collect_local_particles(current, particles)?;

        for hop in 0..max_hops {
            if hop < ring.hops {
                current.send(self.comm, ring.next, TAG_DISTRIBUTE)?;
                scratch.receive(self.comm, ring.prev, TAG_DISTRIBUTE)?;
                self.collect_local_particles(scratch, particles)?;
                std::mem::swap(current, scratch);
            }
            self.comm.barrier();
        }
        Ok(())
    }

    /// Append every particle in `buf` that lies in this rank's alive box.
    pub fn collect_local_particles(&mut self, buf: &mut WireBuffer, particles: &mut ParticleSet) -> Result<()> {
        buf.rewind();
        let count = buf.get_value::<u64>()?;
        for _ in 0..count {
            let record = unpack_particle(buf)?;
            if self.subdomain.contains_alive(record.position) {
                particles.push_alive(&record);
                self.alive += 1;
            }
        }
        Ok(())
    }
}

fn pack_particle(buf: &mut WireBuffer, record: &ParticleRecord, box_size: f32) -> Result<()> {
    let p = record.position;
    buf.put_values(&[
        wrap_periodic(p[0], box_size),
        wrap_periodic(p[1], box_size),
        wrap_periodic(p[2], box_size),
    ])?;
    buf.put_values(&record.velocity)?;
    buf.put_value(record.mass)?;
    buf.put_value(record.tag)
}

fn unpack_particle(buf: &mut WireBuffer) -> Result<ParticleRecord> {
    let mut position = [0f32; 3];
    let mut velocity = [0f32; 3];
    buf.get_values(&mut position)?;
    buf.get_values(&mut velocity)?;
    let mass = buf.get_value::<f32>()?;
    let tag = buf.get_value::<i64>()?;
    Ok(ParticleRecord::new(position, velocity, mass, tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ring_when_files_outnumber_ranks() {
        let r = RingLayout::new(5, 2, 1);
        assert_eq!(r.files, vec![1, 3]);
        assert_eq!((r.ring_start, r.ring_len, r.hops), (0, 2, 1));
        assert_eq!((r.next, r.prev), (0, 0));

        let r = RingLayout::new(4, 4, 3);
        assert_eq!(r.files, vec![3]);
        assert_eq!((r.next, r.prev, r.hops), (0, 2, 3));
    }

    #[test]
    fn concentric_rings_when_ranks_outnumber_files() {
        // 8 ranks, 3 files: ring [0,1,2] and ring [3..8) absorbing the remainder
        let layouts: Vec<_> = (0..8).map(|r| RingLayout::new(3, 8, r)).collect();
        assert_eq!(layouts[0].files, vec![0]);
        assert_eq!(layouts[2].files, vec![2]);
        assert_eq!(layouts[2].next, 0);
        assert_eq!(layouts[0].prev, 2);
        assert_eq!(layouts[0].hops, 2);

        assert_eq!(layouts[3].ring_start, 3);
        assert_eq!(layouts[3].ring_len, 5);
        assert_eq!(layouts[3].files, vec![0]);
        assert_eq!(layouts[5].files, vec![2]);
        assert!(layouts[6].files.is_empty());
        assert!(layouts[7].files.is_empty());
        assert_eq!(layouts[7].next, 3);
        assert_eq!(layouts[3].prev, 7);
        assert_eq!(layouts[7].hops, 4);
    }

    #[test]
    fn every_ring_reads_every_file() {
        for (files, ranks) in [(1, 1), (1, 4), (2, 5), (3, 3), (3, 8), (7, 3)] {
            let layouts: Vec<_> = (0..ranks).map(|r| RingLayout::new(files, ranks, r)).collect();
            let mut starts: Vec<_> = layouts.iter().map(|l| l.ring_start).collect();
            starts.dedup();
            for start in starts {
                let mut seen: Vec<usize> = layouts
                    .iter()
                    .filter(|l| l.ring_start == start)
                    .flat_map(|l| l.files.clone())
                    .collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..files).collect::<Vec<_>>(), "files={files} ranks={ranks}");
            }
        }
    }

    #[test]
    fn discover_numbered_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["snap.10", "snap.2", "snap.0", "snap.x", "snapshot.1", "snap."] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = discover_files(&dir.path().join("snap")).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["snap.0", "snap.2", "snap.10"]);
    }

    #[test]
    fn discover_falls_back_to_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("single.bin");
        fs::write(&base, b"").unwrap();
        assert_eq!(discover_files(&base).unwrap(), vec![base]);
    }

    #[test]
    fn discover_nothing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_files(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::NoInputFiles(_)));
    }

    #[test]
    fn packed_particles_are_wrapped_into_box() {
        let mut buf = WireBuffer::new(COUNT_SIZE + 2 * DIST_RECORD_SIZE);
        buf.put_value(2u64).unwrap();
        pack_particle(&mut buf, &ParticleRecord::new([-1.0, 100.0, 50.0], [1.0, 2.0, 3.0], 2.0, 9), 100.0).unwrap();
        pack_particle(&mut buf, &ParticleRecord::new([1.0, 2.0, 3.0], [0.0; 3], 1.0, 10), 100.0).unwrap();
        assert_eq!(buf.len(), COUNT_SIZE + 2 * DIST_RECORD_SIZE);

        buf.rewind();
        assert_eq!(buf.get_value::<u64>().unwrap(), 2);
        let first = unpack_particle(&mut buf).unwrap();
        assert_eq!(first.position, [99.0, 0.0, 50.0]);
        assert_eq!(first.velocity, [1.0, 2.0, 3.0]);
        assert_eq!(first.mass, 2.0);
        assert_eq!(first.tag, 9);
        assert_eq!(unpack_particle(&mut buf).unwrap().tag, 10);
    }
}
