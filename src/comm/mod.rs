//! Process-group communication layer.
//!
//! Distributed operations in this crate never touch another rank's memory
//! directly; every cross-rank effect goes through a [`Communicator`]. The
//! trait deliberately mirrors the narrow MPI subset the algorithms need:
//! element-wise all-reduce, broadcast, and tagged point-to-point messages
//! over flat `f64` buffers.
//!
//! Two implementations are provided:
//!
//! - [`SelfComm`]: a world of one rank, where every collective is an
//!   identity operation. This is what single-process callers use.
//! - [`cluster::LocalCluster`] / [`cluster::ThreadComm`]: a simulated
//!   process grid running one OS thread per rank, used by the multi-rank
//!   test scenarios and the bench binary.
//!
//! Every collective is a synchronization point: a rank blocks until its
//! peers reach the same call. All ranks must issue collectives in the same
//! relative order; a divergent sequence is a deadlock, not a recoverable
//! error, and avoiding it is the caller's responsibility. No timeout or
//! cancellation semantics are provided.

pub mod cluster;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Message tags carry this bit when they belong to an internally sequenced
/// collective, keeping them disjoint from caller-chosen point-to-point tags.
pub(crate) const COLLECTIVE_TAG_BIT: u64 = 1 << 63;

/// A linear communicator over `size` ranks.
///
/// Buffers are flat row-major `f64` slices; the array layer packs and
/// unpacks its tiles around these calls.
pub trait Communicator: Send + Sync {
    /// This process's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Sends `buf` to `dest`. Point-to-point tags must not set the
    /// collective bit.
    fn send(&self, buf: &[f64], dest: usize, tag: u64);

    /// Receives the message sent by `src` with matching `tag`, blocking
    /// until it arrives. Messages with other (src, tag) pairs are held
    /// aside in arrival order.
    fn recv(&self, src: usize, tag: u64) -> Vec<f64>;

    /// Element-wise global sum; on return every rank holds the reduced
    /// values.
    fn all_reduce_sum(&self, buf: &mut [f64]);

    /// Replicates `buf` on `root` into every rank's buffer.
    fn broadcast(&self, buf: &mut [f64], root: usize);

    /// Blocks until every rank has entered the barrier.
    fn barrier(&self);
}

/// The trivial communicator: one rank, no peers.
///
/// Collectives are identity operations. Point-to-point transfer is a local
/// mailbox so that rank-agnostic code (the ring exchanges degenerate to
/// self-sends on a world of one) works unchanged.
pub struct SelfComm {
    mailbox: Mutex<HashMap<u64, VecDeque<Vec<f64>>>>,
}

impl SelfComm {
    pub fn new() -> Arc<Self> {
        Arc::new(SelfComm {
            mailbox: Mutex::new(HashMap::new()),
        })
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, buf: &[f64], dest: usize, tag: u64) {
        assert_eq!(dest, 0, "SelfComm can only address rank 0");
        self.mailbox
            .lock()
            .expect("mailbox poisoned")
            .entry(tag)
            .or_default()
            .push_back(buf.to_vec());
    }

    fn recv(&self, src: usize, tag: u64) -> Vec<f64> {
        assert_eq!(src, 0, "SelfComm can only address rank 0");
        self.mailbox
            .lock()
            .expect("mailbox poisoned")
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .expect("recv on SelfComm without a matching prior send")
    }

    fn all_reduce_sum(&self, _buf: &mut [f64]) {}

    fn broadcast(&self, _buf: &mut [f64], _root: usize) {}

    fn barrier(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_comm_collectives_are_identities() {
        let comm = SelfComm::new();
        let mut buf = vec![1.0, 2.0, 3.0];
        comm.all_reduce_sum(&mut buf);
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
        comm.broadcast(&mut buf, 0);
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
        comm.barrier();
    }

    #[test]
    fn self_comm_loopback_send_recv() {
        let comm = SelfComm::new();
        comm.send(&[7.0, 8.0], 0, 3);
        comm.send(&[9.0], 0, 4);
        // Delivery is matched by tag, not arrival order.
        assert_eq!(comm.recv(0, 4), vec![9.0]);
        assert_eq!(comm.recv(0, 3), vec![7.0, 8.0]);
    }
}
