//! Fixed-capacity byte buffer for point-to-point particle messages.
//!
//! A [`WireBuffer`] is packed with typed scalars at a cursor, sent, received
//! on the other side and unpacked in the same order. Scalars are encoded
//! little-endian. The capacity is fixed at construction and the buffer is
//! never resized; `reset` rewinds it for the next round.

use crate::comm::Communicator;
use crate::error::{Error, Result};

/// A scalar with a fixed little-endian wire encoding.
pub trait WireScalar: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes.
    fn encode(self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($t:ty),*) => {
        $(
            impl WireScalar for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_scalar!(u8, u16, u32, u64, i32, i64, f32, f64);

/// Byte buffer with a read/write cursor.
#[derive(Debug, Clone)]
pub struct WireBuffer {
    data: Vec<u8>,
    /// Cursor for both packing and unpacking
    position: usize,
    /// Bytes holding valid data (written, or received)
    filled: usize,
}

impl WireBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            position: 0,
            filled: 0,
        }
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes written so far (when packing) or received (when unpacking).
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Return `true` if nothing has been written or received.
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The valid bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Rewind the cursor and forget the contents. Capacity is kept.
    pub fn reset(&mut self) {
        self.position = 0;
        self.filled = 0;
    }

    /// Rewind the cursor only, keeping the contents for reading back.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn check_write(&self, offset: usize, needed: usize) -> Result<()> {
        if offset + needed > self.data.len() {
            return Err(Error::BufferOverflow {
                offset,
                needed,
                capacity: self.data.len(),
            });
        }
        Ok(())
    }

    fn check_read(&self, needed: usize) -> Result<()> {
        if self.position + needed > self.filled {
            return Err(Error::BufferUnderflow {
                offset: self.position,
                needed,
                available: self.filled,
            });
        }
        Ok(())
    }

    /// Append one value at the cursor.
    pub fn put_value<T: WireScalar>(&mut self, value: T) -> Result<()> {
        self.check_write(self.position, T::SIZE)?;
        value.encode(&mut self.data[self.position..self.position + T::SIZE]);
        self.position += T::SIZE;
        self.filled = self.filled.max(self.position);
        Ok(())
    }

    /// Append every value of `values` at the cursor.
    pub fn put_values<T: WireScalar>(&mut self, values: &[T]) -> Result<()> {
        self.check_write(self.position, T::SIZE * values.len())?;
        for v in values {
            self.put_value(*v)?;
        }
        Ok(())
    }

    /// Overwrite a value at byte offset `pos` without moving the cursor.
    ///
    /// Used to backpatch a count field written ahead of its payload.
    pub fn put_value_at<T: WireScalar>(&mut self, pos: usize, value: T) -> Result<()> {
        self.check_write(pos, T::SIZE)?;
        value.encode(&mut self.data[pos..pos + T::SIZE]);
        self.filled = self.filled.max(pos + T::SIZE);
        Ok(())
    }

    /// Consume one value at the cursor.
    pub fn get_value<T: WireScalar>(&mut self) -> Result<T> {
        self.check_read(T::SIZE)?;
        let value = T::decode(&self.data[self.position..self.position + T::SIZE]);
        self.position += T::SIZE;
        Ok(value)
    }

    /// Consume `out.len()` values at the cursor.
    pub fn get_values<T: WireScalar>(&mut self, out: &mut [T]) -> Result<()> {
        self.check_read(T::SIZE * out.len())?;
        for slot in out.iter_mut() {
            *slot = self.get_value()?;
        }
        Ok(())
    }

    /// Send exactly the written bytes to `dest`. Does not wait for delivery.
    pub fn send<C: Communicator + ?Sized>(&self, comm: &C, dest: usize, tag: u32) -> Result<()> {
        comm.send(dest, tag, self.as_bytes())
    }

    /// Block until a message from `source` arrives, replacing the contents,
    /// and rewind the cursor for unpacking.
    pub fn receive<C: Communicator + ?Sized>(&mut self, comm: &C, source: usize, tag: u32) -> Result<()> {
        let payload = comm.receive(source, tag, self.capacity())?;
        self.data[..payload.len()].copy_from_slice(&payload);
        self.filled = payload.len();
        self.position = 0;
        Ok(())
    }
}
