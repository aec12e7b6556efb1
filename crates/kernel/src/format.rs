//! On-disk particle layouts.
//!
//! Two layouts are supported:
//!
//! - **RECORD**: contiguous 32-byte records `x y z vx vy vz mass` (f32) and
//!   `tag` (i32). The particle count follows from the file size.
//! - **BLOCK**: Gadget-style file with Fortran record markers around a
//!   256-byte header, then a position block, a velocity block and a tag
//!   block. Mass is not stored and defaults to 1.0.
//!
//! Both can be read piecewise so a large file never has to be held in one
//! buffer.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::particle::ParticleRecord;

/// Bytes per particle in the RECORD layout.
pub const RECORD_SIZE: u64 = 32;

/// Size of the BLOCK header payload.
pub const BLOCK_HEADER_SIZE: usize = 256;

/// Number of particle species in a BLOCK header.
pub const NUM_SPECIES: usize = 6;

/// Mass assigned to particles read from the BLOCK layout.
pub const DEFAULT_MASS: f32 = 1.0;

const MARKER_SIZE: u64 = 4;

/// Which on-disk layout a dataset uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    /// Fixed-size interleaved records
    #[default]
    Record,
    /// Header followed by position, velocity and tag blocks
    Block,
}

/// Byte order of the scalars in a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first (byte-swapped datasets)
    Big,
}

impl ByteOrder {
    fn f32(self, b: [u8; 4]) -> f32 {
        match self {
            ByteOrder::Little => f32::from_le_bytes(b),
            ByteOrder::Big => f32::from_be_bytes(b),
        }
    }

    fn i32(self, b: [u8; 4]) -> i32 {
        match self {
            ByteOrder::Little => i32::from_le_bytes(b),
            ByteOrder::Big => i32::from_be_bytes(b),
        }
    }

    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        }
    }

    fn f64(self, b: [u8; 8]) -> f64 {
        match self {
            ByteOrder::Little => f64::from_le_bytes(b),
            ByteOrder::Big => f64::from_be_bytes(b),
        }
    }

    fn f32_bytes(self, v: f32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn i32_bytes(self, v: i32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn f64_bytes(self, v: f64) -> [u8; 8] {
        match self {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn chunk4(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

fn chunk8(bytes: &[u8], at: usize) -> [u8; 8] {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    b
}

// ===========================================================================
// RECORD layout
// ===========================================================================

/// Number of particles in a RECORD file of `file_len` bytes.
///
/// A size that is not a whole number of records means the last record was
/// truncated and is reported as invalid data.
pub fn record_count_from_len(file_len: u64) -> io::Result<u64> {
    if file_len % RECORD_SIZE != 0 {
        return Err(invalid(format!(
            "file size {file_len} is not a multiple of the {RECORD_SIZE}-byte record"
        )));
    }
    Ok(file_len / RECORD_SIZE)
}

/// Read `count` records starting at record `start`.
pub fn read_records<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    count: usize,
    order: ByteOrder,
) -> io::Result<Vec<ParticleRecord>> {
    reader.seek(SeekFrom::Start(start * RECORD_SIZE))?;
    let mut raw = vec![0u8; count * RECORD_SIZE as usize];
    reader.read_exact(&mut raw)?;

    let records = raw
        .chunks_exact(RECORD_SIZE as usize)
        .map(|rec| {
            let f = |i: usize| order.f32(chunk4(rec, i * 4));
            ParticleRecord::new(
                [f(0), f(1), f(2)],
                [f(3), f(4), f(5)],
                f(6),
                i64::from(order.i32(chunk4(rec, 28))),
            )
        })
        .collect();
    Ok(records)
}

/// Write records in the RECORD layout.
///
/// Tags are narrowed to i32, potential and mask are not stored.
pub fn write_records<W: Write>(
    writer: &mut W,
    records: &[ParticleRecord],
    order: ByteOrder,
) -> io::Result<()> {
    for r in records {
        for v in r.position.iter().chain(r.velocity.iter()) {
            writer.write_all(&order.f32_bytes(*v))?;
        }
        writer.write_all(&order.f32_bytes(r.mass))?;
        writer.write_all(&order.i32_bytes(r.tag as i32))?;
    }
    Ok(())
}

// ===========================================================================
// BLOCK layout
// ===========================================================================

/// Header of a BLOCK file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockHeader {
    /// Particles of each species in this file
    pub npart: [i32; NUM_SPECIES],
    /// Mass table per species
    pub mass: [f64; NUM_SPECIES],
    /// Expansion factor or time of the snapshot
    pub time: f64,
    /// Redshift of the snapshot
    pub redshift: f64,
    /// Star formation flag
    pub flag_sfr: i32,
    /// Feedback flag
    pub flag_feedback: i32,
    /// Particles of each species across all files
    pub npart_total: [u32; NUM_SPECIES],
    /// Cooling flag
    pub flag_cooling: i32,
    /// Number of files in the snapshot
    pub num_files: i32,
    /// Box size stored with the snapshot
    pub box_size: f64,
    /// Matter density parameter
    pub omega0: f64,
    /// Dark energy density parameter
    pub omega_lambda: f64,
    /// Hubble parameter
    pub hubble: f64,
}

impl BlockHeader {
    /// Total particles in this file.
    pub fn particle_count(&self) -> u64 {
        self.npart.iter().map(|&n| n.max(0) as u64).sum()
    }

    fn decode(bytes: &[u8], order: ByteOrder) -> Self {
        let mut h = BlockHeader::default();
        let mut at = 0;
        for n in h.npart.iter_mut() {
            *n = order.i32(chunk4(bytes, at));
            at += 4;
        }
        for m in h.mass.iter_mut() {
            *m = order.f64(chunk8(bytes, at));
            at += 8;
        }
        h.time = order.f64(chunk8(bytes, at));
        h.redshift = order.f64(chunk8(bytes, at + 8));
        h.flag_sfr = order.i32(chunk4(bytes, at + 16));
        h.flag_feedback = order.i32(chunk4(bytes, at + 20));
        at += 24;
        for n in h.npart_total.iter_mut() {
            *n = order.u32(chunk4(bytes, at));
            at += 4;
        }
        h.flag_cooling = order.i32(chunk4(bytes, at));
        h.num_files = order.i32(chunk4(bytes, at + 4));
        at += 8;
        h.box_size = order.f64(chunk8(bytes, at));
        h.omega0 = order.f64(chunk8(bytes, at + 8));
        h.omega_lambda = order.f64(chunk8(bytes, at + 16));
        h.hubble = order.f64(chunk8(bytes, at + 24));
        h
    }

    fn encode(&self, order: ByteOrder) -> [u8; BLOCK_HEADER_SIZE] {
        let mut out = [0u8; BLOCK_HEADER_SIZE];
        let mut at = 0;
        let mut put = |b: &[u8]| {
            out[at..at + b.len()].copy_from_slice(b);
            at += b.len();
        };
        for n in self.npart {
            put(&order.i32_bytes(n));
        }
        for m in self.mass {
            put(&order.f64_bytes(m));
        }
        put(&order.f64_bytes(self.time));
        put(&order.f64_bytes(self.redshift));
        put(&order.i32_bytes(self.flag_sfr));
        put(&order.i32_bytes(self.flag_feedback));
        for n in self.npart_total {
            put(&order.u32_bytes(n));
        }
        put(&order.i32_bytes(self.flag_cooling));
        put(&order.i32_bytes(self.num_files));
        put(&order.f64_bytes(self.box_size));
        put(&order.f64_bytes(self.omega0));
        put(&order.f64_bytes(self.omega_lambda));
        put(&order.f64_bytes(self.hubble));
        out
    }
}

fn read_marker<R: Read>(reader: &mut R, order: ByteOrder, expected: u64, what: &str) -> io::Result<()> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b)?;
    let found = order.u32(b);
    if u64::from(found) != expected {
        return Err(invalid(format!(
            "{what} record marker is {found}, expected {expected}"
        )));
    }
    Ok(())
}

fn write_marker<W: Write>(writer: &mut W, order: ByteOrder, len: u64) -> io::Result<()> {
    writer.write_all(&order.u32_bytes(len as u32))
}

/// Read and check the header of a BLOCK file.
pub fn read_block_header<R: Read + Seek>(reader: &mut R, order: ByteOrder) -> io::Result<BlockHeader> {
    reader.seek(SeekFrom::Start(0))?;
    read_marker(reader, order, BLOCK_HEADER_SIZE as u64, "header")?;
    let mut raw = [0u8; BLOCK_HEADER_SIZE];
    reader.read_exact(&mut raw)?;
    read_marker(reader, order, BLOCK_HEADER_SIZE as u64, "header")?;
    Ok(BlockHeader::decode(&raw, order))
}

/// Byte offsets of the three data blocks for a file with `n` particles.
fn block_offsets(n: u64) -> (u64, u64, u64) {
    let header_end = 2 * MARKER_SIZE + BLOCK_HEADER_SIZE as u64;
    let positions = header_end + MARKER_SIZE;
    let velocities = positions + 12 * n + 2 * MARKER_SIZE;
    let tags = velocities + 12 * n + 2 * MARKER_SIZE;
    (positions, velocities, tags)
}

fn read_vec3s<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    count: usize,
    order: ByteOrder,
) -> io::Result<Vec<[f32; 3]>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut raw = vec![0u8; count * 12];
    reader.read_exact(&mut raw)?;
    Ok(raw
        .chunks_exact(12)
        .map(|c| {
            [
                order.f32(chunk4(c, 0)),
                order.f32(chunk4(c, 4)),
                order.f32(chunk4(c, 8)),
            ]
        })
        .collect())
}

/// Read `count` particles starting at particle `start` from a BLOCK file
/// whose header has already been read.
pub fn read_block_piece<R: Read + Seek>(
    reader: &mut R,
    header: &BlockHeader,
    start: u64,
    count: usize,
    order: ByteOrder,
) -> io::Result<Vec<ParticleRecord>> {
    let n = header.particle_count();
    if start + count as u64 > n {
        return Err(invalid(format!(
            "piece [{start}, {}) exceeds {n} particles",
            start + count as u64
        )));
    }

    let (pos_at, vel_at, tag_at) = block_offsets(n);

    // Validate the leading marker of each block once per piece.
    for (at, len, what) in [(pos_at, 12 * n, "position"), (vel_at, 12 * n, "velocity"), (tag_at, 4 * n, "tag")] {
        reader.seek(SeekFrom::Start(at - MARKER_SIZE))?;
        read_marker(reader, order, len, what)?;
    }

    let positions = read_vec3s(reader, pos_at + 12 * start, count, order)?;
    let velocities = read_vec3s(reader, vel_at + 12 * start, count, order)?;

    reader.seek(SeekFrom::Start(tag_at + 4 * start))?;
    let mut raw = vec![0u8; count * 4];
    reader.read_exact(&mut raw)?;

    Ok(positions
        .into_iter()
        .zip(velocities)
        .zip(raw.chunks_exact(4))
        .map(|((p, v), t)| ParticleRecord::new(p, v, DEFAULT_MASS, i64::from(order.i32(chunk4(t, 0)))))
        .collect())
}

/// Write a BLOCK file. `header.npart` must sum to `records.len()`.
pub fn write_block<W: Write>(
    writer: &mut W,
    header: &BlockHeader,
    records: &[ParticleRecord],
    order: ByteOrder,
) -> io::Result<()> {
    let n = records.len() as u64;
    if header.particle_count() != n {
        return Err(invalid(format!(
            "header counts {} particles but {n} were given",
            header.particle_count()
        )));
    }

    write_marker(writer, order, BLOCK_HEADER_SIZE as u64)?;
    writer.write_all(&header.encode(order))?;
    write_marker(writer, order, BLOCK_HEADER_SIZE as u64)?;

    write_marker(writer, order, 12 * n)?;
    for r in records {
        for v in r.position {
            writer.write_all(&order.f32_bytes(v))?;
        }
    }
    write_marker(writer, order, 12 * n)?;

    write_marker(writer, order, 12 * n)?;
    for r in records {
        for v in r.velocity {
            writer.write_all(&order.f32_bytes(v))?;
        }
    }
    write_marker(writer, order, 12 * n)?;

    write_marker(writer, order, 4 * n)?;
    for r in records {
        writer.write_all(&order.i32_bytes(r.tag as i32))?;
    }
    write_marker(writer, order, 4 * n)?;
    Ok(())
}

// ===========================================================================
// Path-level helpers
// ===========================================================================

/// Number of particles stored in the file at `path`.
pub fn particle_count(path: &Path, format: FileFormat, order: ByteOrder) -> io::Result<u64> {
    match format {
        FileFormat::Record => record_count_from_len(std::fs::metadata(path)?.len()),
        FileFormat::Block => {
            let mut reader = BufReader::new(File::open(path)?);
            Ok(read_block_header(&mut reader, order)?.particle_count())
        }
    }
}

/// Read particles `[start, start + count)` from the file at `path`.
pub fn read_piece(
    path: &Path,
    format: FileFormat,
    order: ByteOrder,
    start: u64,
    count: usize,
) -> io::Result<Vec<ParticleRecord>> {
    let mut reader = BufReader::new(File::open(path)?);
    match format {
        FileFormat::Record => read_records(&mut reader, start, count, order),
        FileFormat::Block => {
            let header = read_block_header(&mut reader, order)?;
            read_block_piece(&mut reader, &header, start, count, order)
        }
    }
}

/// Read every particle in the file at `path`.
pub fn read_all(path: &Path, format: FileFormat, order: ByteOrder) -> io::Result<Vec<ParticleRecord>> {
    let count = particle_count(path, format, order)?;
    read_piece(path, format, order, 0, count as usize)
}

/// Write `records` to `path` in the given layout.
///
/// BLOCK files get a header with every particle in species 1 and the
/// supplied box size.
pub fn write_file(
    path: &Path,
    format: FileFormat,
    order: ByteOrder,
    records: &[ParticleRecord],
    box_size: f64,
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    match format {
        FileFormat::Record => write_records(&mut writer, records, order)?,
        FileFormat::Block => {
            let mut header = BlockHeader {
                num_files: 1,
                box_size,
                ..BlockHeader::default()
            };
            header.npart[1] = records.len() as i32;
            header.npart_total[1] = records.len() as u32;
            write_block(&mut writer, &header, records, order)?;
        }
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(n: usize) -> Vec<ParticleRecord> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                ParticleRecord::new([f, f + 0.25, f + 0.5], [-f, 2.0 * f, 0.5], 3.0 + f, 100 + i as i64)
            })
            .collect()
    }

    #[test]
    fn record_count_requires_whole_records() {
        assert_eq!(record_count_from_len(0).unwrap(), 0);
        assert_eq!(record_count_from_len(320).unwrap(), 10);
        let err = record_count_from_len(33).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn record_layout_is_32_bytes_per_particle() {
        let mut buf = Vec::new();
        write_records(&mut buf, &sample(3), ByteOrder::Little).unwrap();
        assert_eq!(buf.len(), 96);
        // Second record's x is 1.0, tag 101 sits in the last four bytes.
        assert_eq!(f32::from_le_bytes(chunk4(&buf, 32)), 1.0);
        assert_eq!(i32::from_le_bytes(chunk4(&buf, 60)), 101);
    }

    #[test]
    fn record_piece_reads_middle_of_file() {
        let records = sample(6);
        let mut buf = Vec::new();
        write_records(&mut buf, &records, ByteOrder::Big).unwrap();
        let piece = read_records(&mut Cursor::new(buf), 2, 3, ByteOrder::Big).unwrap();
        assert_eq!(piece, records[2..5].to_vec());
    }

    #[test]
    fn record_read_past_end_fails() {
        let mut buf = Vec::new();
        write_records(&mut buf, &sample(2), ByteOrder::Little).unwrap();
        let err = read_records(&mut Cursor::new(buf), 1, 2, ByteOrder::Little).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn block_header_roundtrip() {
        let mut header = BlockHeader {
            time: 0.5,
            redshift: 1.0,
            num_files: 4,
            box_size: 64.0,
            hubble: 0.7,
            ..BlockHeader::default()
        };
        header.npart[1] = 3;
        header.npart[2] = 2;
        let records = sample(5);

        let mut buf = Vec::new();
        write_block(&mut buf, &header, &records, ByteOrder::Little).unwrap();
        let mut cur = Cursor::new(buf);
        let decoded = read_block_header(&mut cur, ByteOrder::Little).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.particle_count(), 5);
    }

    #[test]
    fn block_piece_defaults_mass() {
        let records = sample(5);
        let mut header = BlockHeader::default();
        header.npart[1] = 5;
        let mut buf = Vec::new();
        write_block(&mut buf, &header, &records, ByteOrder::Big).unwrap();

        let mut cur = Cursor::new(buf);
        let piece = read_block_piece(&mut cur, &header, 1, 3, ByteOrder::Big).unwrap();
        assert_eq!(piece.len(), 3);
        for (got, want) in piece.iter().zip(&records[1..4]) {
            assert_eq!(got.position, want.position);
            assert_eq!(got.velocity, want.velocity);
            assert_eq!(got.tag, want.tag);
            assert_eq!(got.mass, DEFAULT_MASS);
        }
    }

    #[test]
    fn block_with_wrong_byte_order_is_rejected() {
        let mut header = BlockHeader::default();
        header.npart[1] = 1;
        let mut buf = Vec::new();
        write_block(&mut buf, &header, &sample(1), ByteOrder::Little).unwrap();
        let err = read_block_header(&mut Cursor::new(buf), ByteOrder::Big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample(7);
        for format in [FileFormat::Record, FileFormat::Block] {
            let path = dir.path().join(format!("{format:?}.dat"));
            write_file(&path, format, ByteOrder::Little, &records, 10.0).unwrap();
            assert_eq!(particle_count(&path, format, ByteOrder::Little).unwrap(), 7);
            let back = read_all(&path, format, ByteOrder::Little).unwrap();
            assert_eq!(back.len(), 7);
            assert_eq!(back[6].tag, 106);
            assert_eq!(back[6].position, records[6].position);
        }
    }
}
