//! Background chunk prefetching with an explicit double buffer.
//!
//! Large out-of-core datasets are consumed one chunk at a time while the
//! next chunk is read in the background. One loader thread produces into
//! the `pending` slot of a [`DoubleBuffer`]; the consumer drains the
//! `current` slot. The two slots are swapped under a condition variable:
//! the loader blocks while `pending` is still occupied (the consumer has
//! not caught up to the chunk boundary), and the consumer blocks while
//! `pending` is empty and the source is not yet exhausted. Buffer depth is
//! therefore fixed at exactly one chunk ahead, never an unbounded queue.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A source of data chunks, typically backed by a file reader or a
/// generator. `None` signals exhaustion; the loader thread exits after
/// forwarding it.
pub trait ChunkSource: Send + 'static {
    fn next_chunk(&mut self) -> Option<Vec<f64>>;
}

impl<F> ChunkSource for F
where
    F: FnMut() -> Option<Vec<f64>> + Send + 'static,
{
    fn next_chunk(&mut self) -> Option<Vec<f64>> {
        self()
    }
}

/// The two buffer slots shared between loader and consumer.
struct DoubleBuffer {
    current: Option<Vec<f64>>,
    pending: Option<Vec<f64>>,
    exhausted: bool,
}

/// Handle to a running background loader.
///
/// Dropping the prefetcher joins the loader thread after marking the
/// stream abandoned, so a partially consumed source never leaks a thread.
pub struct Prefetcher {
    shared: Arc<(Mutex<DoubleBuffer>, Condvar)>,
    abandoned: Arc<(Mutex<bool>, Condvar)>,
    loader: Option<JoinHandle<()>>,
}

impl Prefetcher {
    /// Spawns the loader thread and immediately begins filling the
    /// pending slot from `source`.
    pub fn spawn<S: ChunkSource>(mut source: S) -> Self {
        let shared = Arc::new((
            Mutex::new(DoubleBuffer {
                current: None,
                pending: None,
                exhausted: false,
            }),
            Condvar::new(),
        ));
        let abandoned = Arc::new((Mutex::new(false), Condvar::new()));

        let loader_shared = Arc::clone(&shared);
        let loader_abandoned = Arc::clone(&abandoned);
        let loader = thread::spawn(move || loop {
            if *loader_abandoned.0.lock().expect("abandon flag poisoned") {
                return;
            }
            let chunk = source.next_chunk();
            let (lock, cv) = &*loader_shared;
            let mut buf = lock.lock().expect("double buffer poisoned");
            match chunk {
                None => {
                    buf.exhausted = true;
                    cv.notify_all();
                    return;
                }
                Some(data) => {
                    // Wait for the consumer to clear the pending slot.
                    while buf.pending.is_some() {
                        if *loader_abandoned.0.lock().expect("abandon flag poisoned") {
                            return;
                        }
                        buf = cv.wait(buf).expect("double buffer poisoned");
                    }
                    buf.pending = Some(data);
                    cv.notify_all();
                }
            }
        });

        Prefetcher {
            shared,
            abandoned,
            loader: Some(loader),
        }
    }

    /// Takes the next chunk, blocking until the loader has one ready.
    /// Returns `None` once the source is exhausted and both slots are
    /// drained.
    pub fn next_chunk(&mut self) -> Option<Vec<f64>> {
        let (lock, cv) = &*self.shared;
        let mut buf = lock.lock().expect("double buffer poisoned");
        if let Some(chunk) = buf.current.take() {
            return Some(chunk);
        }
        loop {
            if let Some(chunk) = buf.pending.take() {
                // Slot freed: wake the loader so it can read ahead while
                // this chunk is being consumed.
                cv.notify_all();
                return Some(chunk);
            }
            if buf.exhausted {
                return None;
            }
            buf = cv.wait(buf).expect("double buffer poisoned");
        }
    }

    /// Pushes the chunk back so the next call returns it again. Used when
    /// a consumer inspects a chunk boundary without committing to it.
    pub fn put_back(&mut self, chunk: Vec<f64>) {
        let (lock, _) = &*self.shared;
        let mut buf = lock.lock().expect("double buffer poisoned");
        debug_assert!(buf.current.is_none(), "put_back with an occupied slot");
        buf.current = Some(chunk);
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        *self.abandoned.0.lock().expect("abandon flag poisoned") = true;
        // Unblock a loader parked on a full pending slot.
        let (lock, cv) = &*self.shared;
        {
            let mut buf = lock.lock().expect("double buffer poisoned");
            buf.pending.take();
        }
        cv.notify_all();
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_every_chunk_in_order() {
        let mut remaining = vec![vec![1.0], vec![2.0], vec![3.0]];
        remaining.reverse();
        let mut pf = Prefetcher::spawn(move || remaining.pop());
        assert_eq!(pf.next_chunk(), Some(vec![1.0]));
        assert_eq!(pf.next_chunk(), Some(vec![2.0]));
        assert_eq!(pf.next_chunk(), Some(vec![3.0]));
        assert_eq!(pf.next_chunk(), None);
        assert_eq!(pf.next_chunk(), None);
    }

    #[test]
    fn loader_reads_at_most_one_chunk_ahead() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let mut pf = Prefetcher::spawn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 100 {
                Some(vec![n as f64])
            } else {
                None
            }
        });
        assert_eq!(pf.next_chunk(), Some(vec![0.0]));
        // One chunk consumed, one in pending, at most one in flight.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(produced.load(Ordering::SeqCst) <= 3);
        drop(pf);
    }

    #[test]
    fn put_back_replays_a_chunk() {
        let mut remaining = vec![vec![2.0], vec![1.0]];
        let mut pf = Prefetcher::spawn(move || remaining.pop());
        let first = pf.next_chunk().unwrap();
        pf.put_back(first.clone());
        assert_eq!(pf.next_chunk(), Some(first));
        assert_eq!(pf.next_chunk(), Some(vec![2.0]));
        assert_eq!(pf.next_chunk(), None);
    }

    #[test]
    fn dropping_early_does_not_hang() {
        let mut n = 0u64;
        let pf = Prefetcher::spawn(move || {
            n += 1;
            Some(vec![n as f64])
        });
        drop(pf);
    }
}
