//! End-to-end decomposition on an in-process cluster
//!
//! Writes particle files to a temporary directory, runs the full per-rank
//! pipeline and checks ownership and ghost placement across ranks.

use std::collections::HashMap;
use std::path::Path;

use kernel::format::{self, FileFormat};
use kernel::{ByteOrder, Direction, ParticleRecord, Status};
use orchestrator::{run_local, Error, ReadMode, ReaderConfig, RankOutput};

const BOX: f32 = 100.0;
const DEAD: f32 = 5.0;

/// Deterministic scatter of `n` particles over the box, tags starting at `first_tag`.
fn scattered(first_tag: i64, n: usize) -> Vec<ParticleRecord> {
    (0..n as i64)
        .map(|i| {
            let t = first_tag + i;
            let pos = [
                (t * 7919 % 1000) as f32 / 10.0,
                (t * 104_729 % 1000) as f32 / 10.0,
                (t * 1_299_709 % 1000) as f32 / 10.0,
            ];
            ParticleRecord::new(pos, [0.1, -0.2, 0.3], 1.0, t)
        })
        .collect()
}

fn write_numbered(base: &Path, files: &[Vec<ParticleRecord>], format: FileFormat) {
    for (i, records) in files.iter().enumerate() {
        let path = format!("{}.{i}", base.display());
        format::write_file(Path::new(&path), format, ByteOrder::Little, records, f64::from(BOX)).unwrap();
    }
}

/// Check every tag in `expected` is alive on exactly one rank, inside its box.
fn assert_owned_once(outputs: &[RankOutput], expected: usize) {
    let mut owners: HashMap<i64, usize> = HashMap::new();
    for o in outputs {
        for i in 0..o.particles.len() {
            if o.particles.status[i] != Status::Alive {
                continue;
            }
            assert!(
                o.subdomain.contains_alive(o.particles.position(i)),
                "rank {} holds {:?} outside its alive box",
                o.rank,
                o.particles.position(i)
            );
            let previous = owners.insert(o.particles.tag[i], o.rank);
            assert!(previous.is_none(), "tag {} alive twice", o.particles.tag[i]);
        }
    }
    assert_eq!(owners.len(), expected);
    let alive: u64 = outputs.iter().map(|o| o.particles.alive_count() as u64).sum();
    assert_eq!(alive, expected as u64);
    assert!(outputs.iter().all(|o| o.distribute.alive_total == expected as u64));
}

#[test]
fn round_robin_assigns_each_particle_once() {
    for (num_files, num_ranks) in [(3, 8), (5, 2), (1, 1), (4, 4), (2, 6)] {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("snap");
        let files: Vec<_> = (0..num_files)
            .map(|f| scattered(f as i64 * 1000, 40 + 3 * f))
            .collect();
        let total: usize = files.iter().map(Vec::len).sum();
        write_numbered(&base, &files, FileFormat::Record);

        let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
        let outputs = run_local(num_ranks, &config).unwrap();

        assert_eq!(outputs.len(), num_ranks);
        assert_owned_once(&outputs, total);
        assert!(outputs.iter().all(|o| o.distribute.files == num_files));
        assert!(outputs.iter().all(|o| o.distribute.total_particles == total as u64));
    }
}

#[test]
fn block_files_are_read_in_pieces() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("gadget");
    let files = vec![scattered(0, 25), scattered(100, 7)];
    write_numbered(&base, &files, FileFormat::Block);

    let mut config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    config.format = FileFormat::Block;
    config.max_read = 4;
    let outputs = run_local(3, &config).unwrap();

    assert_owned_once(&outputs, 32);
    assert_eq!(outputs[0].distribute.pieces_per_file, 7);
}

#[test]
fn unreadable_file_is_skipped_in_round_robin() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("snap");
    write_numbered(&base, &[scattered(0, 20)], FileFormat::Record);
    // A truncated record cannot be sized; its ring sends empty buffers instead
    std::fs::write(dir.path().join("snap.1"), [0u8; 33]).unwrap();

    let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    let outputs = run_local(2, &config).unwrap();
    assert_owned_once(&outputs, 20);
}

#[test]
fn missing_inputs_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = ReaderConfig::new(dir.path().join("nothing").to_str().unwrap(), BOX, DEAD);
    let err = run_local(1, &config).unwrap_err();
    assert!(matches!(err, Error::NoInputFiles(_)), "{err}");
}

#[test]
fn corner_particle_reaches_seven_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("corner");
    write_numbered(&base, &[vec![ParticleRecord::new([1.0, 1.0, 1.0], [0.0; 3], 1.0, 42)]], FileFormat::Record);

    let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    let outputs = run_local(8, &config).unwrap();

    assert_eq!(outputs[0].particles.alive_count(), 1);
    assert_eq!(outputs[0].particles.ghost_count(), 0);

    let mut receivers = Vec::new();
    for o in &outputs {
        for i in 0..o.particles.len() {
            let Status::Ghost(from) = o.particles.status[i] else { continue };
            assert_eq!(o.particles.tag[i], 42);
            // Every dimension the copy crossed comes out shifted to 101
            let offset = from.offset();
            let pos = o.particles.position(i);
            for dim in 0..3 {
                let expected = if offset[dim] == 1 { 101.0 } else { 1.0 };
                assert_eq!(pos[dim], expected, "rank {} from {from}", o.rank);
            }
            receivers.push(o.rank);
        }
    }
    receivers.sort_unstable();
    assert_eq!(receivers, vec![1, 2, 3, 4, 5, 6, 7]);
    assert!(outputs.iter().all(|o| o.exchange.total_ghosts == 7));
}

#[test]
fn interior_particle_of_center_rank_has_no_ghosts() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("center");
    write_numbered(&base, &[vec![ParticleRecord::new([50.0, 50.0, 50.0], [0.0; 3], 1.0, 7)]], FileFormat::Record);

    let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    let outputs = run_local(27, &config).unwrap();

    assert_eq!(outputs[13].layout_pos, [1, 1, 1]);
    assert_eq!(outputs[13].particles.alive_count(), 1);
    assert!(outputs.iter().all(|o| o.particles.ghost_count() == 0));
}

#[test]
fn single_rank_interior_particles_are_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("calm");
    let records: Vec<_> = (0..10)
        .map(|i| {
            let v = 10.0 + 8.0 * i as f32;
            ParticleRecord::new([v, 90.0 - v, 50.0], [i as f32, 0.0, -1.0], 1.0 + i as f32, i)
        })
        .collect();
    write_numbered(&base, &[records.clone()], FileFormat::Record);

    let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    let outputs = run_local(1, &config).unwrap();
    let particles = &outputs[0].particles;

    assert_eq!(particles.alive_count(), 10);
    assert_eq!(particles.ghost_count(), 0);
    assert_eq!(outputs[0].ghost_levels(), vec![0; 10]);
    for (i, r) in records.iter().enumerate() {
        assert_eq!(particles.record(i), *r);
    }
}

#[test]
fn single_rank_ghost_wraps_around_box() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("edge");
    write_numbered(&base, &[vec![ParticleRecord::new([1.0, 50.0, 50.0], [0.0; 3], 1.0, 3)]], FileFormat::Record);

    let config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    let outputs = run_local(1, &config).unwrap();
    let particles = &outputs[0].particles;

    assert_eq!(particles.len(), 2);
    assert_eq!(particles.position(1), [101.0, 50.0, 50.0]);
    assert_eq!(particles.status[1], Status::Ghost(Direction::X1));
    assert_eq!(outputs[0].ghost_levels(), vec![0, 1]);
}

#[test]
fn one_to_one_with_initial_exchange_relocates_strays() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("restart");
    let rank0 = vec![
        ParticleRecord::new([10.0, 50.0, 50.0], [0.0; 3], 1.0, 1),
        ParticleRecord::new([52.0, 50.0, 50.0], [0.0; 3], 1.0, 2),
        ParticleRecord::new([80.0, 50.0, 50.0], [0.0; 3], 1.0, 3),
    ];
    let rank1 = vec![
        ParticleRecord::new([70.0, 50.0, 50.0], [0.0; 3], 1.0, 4),
        // Wraps to 1.0, just inside rank 0
        ParticleRecord::new([101.0, 20.0, 20.0], [0.0; 3], 1.0, 5),
    ];
    write_numbered(&base, &[rank0, rank1], FileFormat::Record);

    let mut config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    config.mode = ReadMode::OneToOne;
    config.initial_exchange = true;
    let outputs = run_local(2, &config).unwrap();

    let alive_tags = |o: &RankOutput| {
        let mut tags: Vec<_> = (0..o.particles.len())
            .filter(|&i| o.particles.status[i].is_alive())
            .map(|i| o.particles.tag[i])
            .collect();
        tags.sort_unstable();
        tags
    };
    assert_eq!(alive_tags(&outputs[0]), vec![1, 5]);
    assert_eq!(alive_tags(&outputs[1]), vec![2, 4]);

    let initial0 = outputs[0].initial.as_ref().unwrap();
    assert_eq!(initial0.relocated_out, 1);
    assert_eq!(initial0.dropped, 1);
    assert_eq!(initial0.relocated_in, 1);
    assert_eq!(initial0.total_alive, 4);
}

#[test]
fn margin_wider_than_a_sub_box_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("wide");
    write_numbered(&base, &[scattered(0, 10)], FileFormat::Record);

    // Three ranks cut a 90 box into 30-wide slabs along x
    let config = ReaderConfig::new(base.to_str().unwrap(), 90.0, 40.0);
    assert!(config.validate().is_ok());
    let err = run_local(3, &config).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");

    // Two ranks leave 45-wide slabs, which the margin fits
    let outputs = run_local(2, &config).unwrap();
    assert_owned_once(&outputs, 10);
}

#[test]
fn one_to_one_interior_rank_relocates_to_lower_neighbor() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("slabs");
    let files = vec![
        vec![ParticleRecord::new([10.0, 45.0, 45.0], [0.0; 3], 1.0, 1)],
        // Drifted below rank 1's slab [30, 60)
        vec![ParticleRecord::new([20.0, 45.0, 45.0], [0.0; 3], 1.0, 2)],
        vec![ParticleRecord::new([70.0, 45.0, 45.0], [0.0; 3], 1.0, 3)],
    ];
    write_numbered(&base, &files, FileFormat::Record);

    let mut config = ReaderConfig::new(base.to_str().unwrap(), 90.0, 30.0);
    config.mode = ReadMode::OneToOne;
    config.initial_exchange = true;
    let outputs = run_local(3, &config).unwrap();

    let alive = |o: &RankOutput| -> Vec<i64> {
        (0..o.particles.len())
            .filter(|&i| o.particles.status[i].is_alive())
            .map(|i| o.particles.tag[i])
            .collect()
    };
    assert_eq!(outputs[0].layout_pos, [0, 0, 0]);
    let mut rank0 = alive(&outputs[0]);
    rank0.sort_unstable();
    assert_eq!(rank0, vec![1, 2]);
    assert!(alive(&outputs[1]).is_empty());
    assert_eq!(alive(&outputs[2]), vec![3]);
    for o in &outputs {
        for i in (0..o.particles.len()).filter(|&i| o.particles.status[i].is_alive()) {
            assert!(o.subdomain.contains_alive(o.particles.position(i)), "rank {}", o.rank);
        }
    }
}

#[test]
fn one_to_one_missing_file_fails_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("partial");
    write_numbered(&base, &[scattered(0, 5)], FileFormat::Record);

    let mut config = ReaderConfig::new(base.to_str().unwrap(), BOX, DEAD);
    config.mode = ReadMode::OneToOne;

    assert!(run_local(1, &config).is_ok());
    let err = run_local(2, &config).unwrap_err();
    assert!(matches!(err, Error::Io { .. } | Error::Transport(_)), "{err}");
}
