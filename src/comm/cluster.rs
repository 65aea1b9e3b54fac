//! A simulated process grid backed by OS threads and channels.
//!
//! [`LocalCluster::run`] spawns one thread per rank, hands each a
//! [`ThreadComm`], and joins them, returning the per-rank results in rank
//! order. Transport is a per-rank mpsc channel; messages are matched on
//! (source, tag) with an arrival-order hold queue for anything received
//! early, which is what lets the ring exchanges interleave with collective
//! traffic without confusion.
//!
//! Collectives are assembled from point-to-point messages through rank 0
//! (gather, reduce, fan out). This is not the bandwidth-optimal pattern,
//! but it keeps the same-order contract auditable: each collective consumes
//! exactly one sequence number per rank, and the sequence numbers advance
//! in lockstep because every rank issues the same collectives in the same
//! order.

use super::{Communicator, COLLECTIVE_TAG_BIT};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// A tagged message in flight between two ranks.
struct Message {
    src: usize,
    tag: u64,
    data: Vec<f64>,
}

/// Incoming channel endpoint plus the hold queue for out-of-order arrivals.
struct Inbox {
    rx: Receiver<Message>,
    held: VecDeque<Message>,
}

/// One rank's endpoint in a [`LocalCluster`].
pub struct ThreadComm {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Message>>,
    inbox: Mutex<Inbox>,
    collective_seq: AtomicU64,
}

impl ThreadComm {
    fn new(rank: usize, size: usize, peers: Vec<Sender<Message>>, rx: Receiver<Message>) -> Self {
        ThreadComm {
            rank,
            size,
            peers,
            inbox: Mutex::new(Inbox {
                rx,
                held: VecDeque::new(),
            }),
            collective_seq: AtomicU64::new(0),
        }
    }

    /// Allocates the tag for the next collective. Ranks stay in lockstep
    /// because collectives are issued in the same order everywhere.
    fn next_collective_tag(&self) -> u64 {
        COLLECTIVE_TAG_BIT | self.collective_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, buf: &[f64], dest: usize, tag: u64) {
        assert!(dest < self.size, "dest rank {dest} out of range");
        self.peers[dest]
            .send(Message {
                src: self.rank,
                tag,
                data: buf.to_vec(),
            })
            .expect("peer rank hung up mid-operation");
    }

    fn recv(&self, src: usize, tag: u64) -> Vec<f64> {
        assert!(src < self.size, "src rank {src} out of range");
        let mut inbox = self.inbox.lock().expect("inbox poisoned");
        if let Some(pos) = inbox
            .held
            .iter()
            .position(|m| m.src == src && m.tag == tag)
        {
            return inbox.held.remove(pos).expect("position checked").data;
        }
        loop {
            let msg = inbox
                .rx
                .recv()
                .expect("peer rank hung up while a receive was pending");
            if msg.src == src && msg.tag == tag {
                return msg.data;
            }
            inbox.held.push_back(msg);
        }
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        let tag = self.next_collective_tag();
        if self.size == 1 {
            return;
        }
        if self.rank == 0 {
            for src in 1..self.size {
                let partial = self.recv(src, tag);
                debug_assert_eq!(partial.len(), buf.len());
                for (acc, x) in buf.iter_mut().zip(partial) {
                    *acc += x;
                }
            }
            for dest in 1..self.size {
                self.send(buf, dest, tag);
            }
        } else {
            self.send(buf, 0, tag);
            let reduced = self.recv(0, tag);
            buf.copy_from_slice(&reduced);
        }
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) {
        let tag = self.next_collective_tag();
        if self.size == 1 {
            return;
        }
        if self.rank == root {
            for dest in 0..self.size {
                if dest != root {
                    self.send(buf, dest, tag);
                }
            }
        } else {
            let data = self.recv(root, tag);
            buf.copy_from_slice(&data);
        }
    }

    fn barrier(&self) {
        let mut token = [0.0];
        self.all_reduce_sum(&mut token);
    }
}

/// Builder for a simulated process grid.
pub struct LocalCluster;

impl LocalCluster {
    /// Runs `f` once per rank on its own thread and returns the results in
    /// rank order. A panic on any rank propagates to the caller.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(Arc<ThreadComm>) -> T + Send + Sync + 'static,
        T: Send + 'static,
    {
        assert!(size >= 1, "a cluster needs at least one rank");

        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = channel();
            senders.push(tx);
            receivers.push(rx);
        }

        let f = Arc::new(f);
        let mut handles = Vec::with_capacity(size);
        for (rank, rx) in receivers.into_iter().enumerate() {
            let comm = Arc::new(ThreadComm::new(rank, size, senders.clone(), rx));
            let f = Arc::clone(&f);
            handles.push(thread::spawn(move || f(comm)));
        }

        handles
            .into_iter()
            .map(|h| h.join().expect("a worker rank panicked"))
            .collect()
    }
}
