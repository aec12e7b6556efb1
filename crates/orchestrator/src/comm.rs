//! Communication backend abstraction.
//!
//! Every collective step of the pipeline goes through [`Communicator`]. The
//! shipped backend, [`LocalCluster`], runs each rank on its own thread in one
//! process with mailbox queues, a shared barrier and slot-based reductions.
//! A network transport slots in behind the same trait.

use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Condvar, Mutex, MutexGuard};
use std::thread;

use crate::error::{Error, Result};

/// Point-to-point and collective operations over a fixed set of ranks.
pub trait Communicator: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Queue `payload` for `dest` under `tag` without waiting for the receiver.
    fn send(&self, dest: usize, tag: u32, payload: &[u8]) -> Result<()>;

    /// Block until a message from `source` with `tag` arrives and return it.
    ///
    /// Messages longer than `capacity` are rejected.
    fn receive(&self, source: usize, tag: u32, capacity: usize) -> Result<Vec<u8>>;

    /// Synchronization barrier across all ranks.
    fn barrier(&self);

    /// Sum a local value across all ranks.
    fn all_reduce_sum(&self, local: u64) -> Result<u64>;

    /// Maximum of a local value across all ranks.
    fn all_reduce_max(&self, local: u64) -> Result<u64>;
}

struct Envelope {
    source: usize,
    tag: u32,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

struct Shared {
    size: usize,
    mailboxes: Vec<Mailbox>,
    barrier: Barrier,
    slots: Mutex<Vec<u64>>,
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Transport("a rank panicked while holding a communicator lock".to_string())
}

/// A group of in-process ranks sharing mailboxes and a barrier.
pub struct LocalCluster {
    shared: Arc<Shared>,
}

impl LocalCluster {
    /// Create a cluster of `size` ranks.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a cluster needs at least one rank");
        let shared = Shared {
            size,
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![0; size]),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Communicator handle for `rank`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        assert!(rank < self.shared.size, "rank {rank} out of range");
        LocalComm {
            rank,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run `f` on every rank of a fresh `size`-rank cluster, one thread per
    /// rank, and return the per-rank results in rank order.
    ///
    /// A panicking rank is reported as a transport error for that rank.
    pub fn run<T, F>(size: usize, f: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&LocalComm) -> Result<T> + Sync,
    {
        let cluster = LocalCluster::new(size);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = cluster.comm(rank);
                    thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || f(&comm))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| match handle {
                    Ok(h) => h
                        .join()
                        .unwrap_or_else(|_| Err(Error::Transport(format!("rank {rank} panicked")))),
                    Err(e) => Err(Error::Transport(format!("failed to spawn rank {rank}: {e}"))),
                })
                .collect()
        })
    }
}

/// Communicator handle for one rank of a [`LocalCluster`].
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalComm {
    fn slots(&self) -> Result<MutexGuard<'_, Vec<u64>>> {
        self.shared.slots.lock().map_err(poisoned)
    }

    fn all_reduce(&self, local: u64, op: fn(u64, u64) -> u64) -> Result<u64> {
        self.slots()?[self.rank] = local;
        self.shared.barrier.wait();
        let result = self.slots()?.iter().copied().reduce(op).unwrap_or(local);
        // Nobody may overwrite a slot until every rank has read them all.
        self.shared.barrier.wait();
        Ok(result)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send(&self, dest: usize, tag: u32, payload: &[u8]) -> Result<()> {
        let mailbox = self
            .shared
            .mailboxes
            .get(dest)
            .ok_or_else(|| Error::Transport(format!("send to rank {dest} of {}", self.shared.size)))?;
        mailbox.queue.lock().map_err(poisoned)?.push_back(Envelope {
            source: self.rank,
            tag,
            payload: payload.to_vec(),
        });
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn receive(&self, source: usize, tag: u32, capacity: usize) -> Result<Vec<u8>> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queue = mailbox.queue.lock().map_err(poisoned)?;
        loop {
            if let Some(at) = queue.iter().position(|e| e.source == source && e.tag == tag) {
                let envelope = queue.remove(at).ok_or_else(|| {
                    Error::Transport("mailbox entry vanished".to_string())
                })?;
                if envelope.payload.len() > capacity {
                    return Err(Error::Transport(format!(
                        "message of {} bytes from rank {source} exceeds capacity {capacity}",
                        envelope.payload.len()
                    )));
                }
                return Ok(envelope.payload);
            }
            queue = mailbox.arrived.wait(queue).map_err(poisoned)?;
        }
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_reduce_sum(&self, local: u64) -> Result<u64> {
        self.all_reduce(local, |a, b| a + b)
    }

    fn all_reduce_max(&self, local: u64) -> Result<u64> {
        self.all_reduce(local, u64::max)
    }
}
