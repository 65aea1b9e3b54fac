//! The redistribution engine: changing an array's split axis in place or by
//! value while leaving its global content untouched.
//!
//! Three communication shapes cover every transition:
//!
//! - split -> unsplit: each rank's block is broadcast in rank order and
//!   assembled at its global offset (an allgather).
//! - unsplit -> split: a purely local slice, no communication.
//! - axis -> other axis: an all-to-all. Each rank determines, for every
//!   peer, the rectangular intersection of its current block with the
//!   peer's target block, sends exactly that, and writes received pieces at
//!   their global offsets.
//!
//! Redistributing to the current split is a no-op returning a
//! byte-for-byte identical tile. Validation happens before any message is
//! sent.

use crate::array::{pack_tile, unpack_tile, DndArray};
use crate::error::{ArrayError, ArrayErrorKind};
use crate::partition;
use faer::Mat;
use std::sync::Arc;

/// Point-to-point tag namespace for the all-to-all exchange.
const TAG_RESPLIT: u64 = 1;

impl DndArray {
    /// Returns a copy of this array distributed along `target` (or
    /// replicated everywhere for `None`).
    pub fn resplit(&self, target: Option<usize>) -> Result<DndArray, ArrayError> {
        if let Some(axis) = target {
            if axis >= self.ndim() {
                return Err(ArrayErrorKind::Shape {
                    axis,
                    ndim: self.ndim(),
                }
                .into());
            }
        }
        if target == self.split() {
            return Ok(self.clone());
        }

        let tile = match (self.split(), target) {
            (None, Some(axis)) => self.slice_local(axis),
            (Some(_), None) => self.allgather_tiles(),
            (Some(from), Some(to)) => self.exchange_axis(from, to),
            (None, None) => unreachable!("handled by the no-op fast path"),
        };
        Ok(DndArray::from_parts(
            self.shape().to_vec(),
            target,
            self.dtype(),
            tile,
            Arc::clone(self.comm()),
        ))
    }

    /// In-place variant of [`DndArray::resplit`].
    pub fn resplit_(&mut self, target: Option<usize>) -> Result<(), ArrayError> {
        if target == self.split() {
            return Ok(());
        }
        let moved = self.resplit(target)?;
        *self = moved;
        Ok(())
    }

    /// unsplit -> split: keep only this rank's block.
    fn slice_local(&self, axis: usize) -> Mat<f64> {
        let comm = self.comm();
        let extent = self.shape()[axis];
        let range = partition::block_range(extent, comm.size(), comm.rank());
        let tile = self.local_tile();
        if axis == 0 {
            Mat::from_fn(range.len(), tile.ncols(), |i, j| tile[(range.start + i, j)])
        } else {
            Mat::from_fn(tile.nrows(), range.len(), |i, j| tile[(i, range.start + j)])
        }
    }

    /// split -> unsplit: broadcast every rank's block in rank order and
    /// assemble the global matrix.
    fn allgather_tiles(&self) -> Mat<f64> {
        let comm = self.comm();
        let axis = self.split().expect("caller checked the array is split");
        let rows = self.shape()[0];
        let cols = if self.ndim() == 2 { self.shape()[1] } else { 1 };
        let extent = self.shape()[axis];

        let mut global = Mat::zeros(rows, cols);
        for root in 0..comm.size() {
            let range = partition::block_range(extent, comm.size(), root);
            let (br, bc) = if axis == 0 {
                (range.len(), cols)
            } else {
                (rows, range.len())
            };
            let mut buf = if comm.rank() == root {
                pack_tile(self.local_tile())
            } else {
                vec![0.0; br * bc]
            };
            comm.broadcast(&mut buf, root);
            let block = unpack_tile(br, bc, &buf);
            for i in 0..br {
                for j in 0..bc {
                    if axis == 0 {
                        global[(range.start + i, j)] = block[(i, j)];
                    } else {
                        global[(i, range.start + j)] = block[(i, j)];
                    }
                }
            }
        }
        global
    }

    /// axis -> other axis: all-to-all on block intersections.
    ///
    /// With `from == 0`, this rank exclusively owns a row range; peer `p`'s
    /// target tile needs those rows restricted to its target column block,
    /// so that sub-rectangle is what travels. The `from == 1` case is the
    /// transpose of the same bookkeeping.
    fn exchange_axis(&self, from: usize, to: usize) -> Mat<f64> {
        debug_assert_ne!(from, to);
        let comm = self.comm();
        let size = comm.size();
        let rank = comm.rank();
        let rows = self.shape()[0];
        let cols = self.shape()[1];
        let tile = self.local_tile();

        let my_from = partition::block_range(self.shape()[from], size, rank);
        let my_to = partition::block_range(self.shape()[to], size, rank);

        // Send phase: one sub-rectangle per peer. Channels are buffered, so
        // all sends complete before any receive is posted.
        for peer in 0..size {
            if peer == rank {
                continue;
            }
            let peer_to = partition::block_range(self.shape()[to], size, peer);
            let piece = if from == 0 {
                Mat::from_fn(my_from.len(), peer_to.len(), |i, j| {
                    tile[(i, peer_to.start + j)]
                })
            } else {
                Mat::from_fn(peer_to.len(), my_from.len(), |i, j| {
                    tile[(peer_to.start + i, j)]
                })
            };
            comm.send(&pack_tile(piece.as_ref()), peer, TAG_RESPLIT);
        }

        // Assemble the target tile: full extent along `from`, my block of `to`.
        let (tr, tc) = if to == 0 {
            (my_to.len(), cols)
        } else {
            (rows, my_to.len())
        };
        let mut out = Mat::zeros(tr, tc);

        // My own intersection never touches the wire.
        for i in 0..my_from.len() {
            for j in 0..my_to.len() {
                if from == 0 {
                    out[(my_from.start + i, j)] = tile[(i, my_to.start + j)];
                } else {
                    out[(j, my_from.start + i)] = tile[(my_to.start + j, i)];
                }
            }
        }

        for peer in 0..size {
            if peer == rank {
                continue;
            }
            let peer_from = partition::block_range(self.shape()[from], size, peer);
            let (pr, pc) = if from == 0 {
                (peer_from.len(), my_to.len())
            } else {
                (my_to.len(), peer_from.len())
            };
            let piece = unpack_tile(pr, pc, &comm.recv(peer, TAG_RESPLIT));
            for i in 0..pr {
                for j in 0..pc {
                    if from == 0 {
                        out[(peer_from.start + i, j)] = piece[(i, j)];
                    } else {
                        out[(i, peer_from.start + j)] = piece[(i, j)];
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::cluster::LocalCluster;
    use crate::comm::SelfComm;
    use crate::dtype::DType;

    fn counting_matrix(
        rows: usize,
        cols: usize,
        split: Option<usize>,
        comm: Arc<dyn crate::comm::Communicator>,
    ) -> DndArray {
        let data: Vec<f64> = (0..rows * cols).map(|x| x as f64).collect();
        DndArray::from_rows(&[rows, cols], &data, split, DType::Float64, comm).unwrap()
    }

    #[test]
    fn resplit_to_current_axis_is_a_noop() {
        let comm = SelfComm::new();
        let a = counting_matrix(3, 4, None, comm);
        let b = a.resplit(None).unwrap();
        assert_eq!(a.local_tile(), b.local_tile());
    }

    #[test]
    fn resplit_rejects_out_of_range_axis() {
        let comm = SelfComm::new();
        let a = DndArray::arange(5, None, comm).unwrap();
        assert!(a.resplit(Some(1)).unwrap_err().is_shape_error());
    }

    #[test]
    fn split_and_gather_round_trip_on_two_ranks() {
        let results = LocalCluster::run(2, |comm| {
            let a = counting_matrix(5, 3, None, comm);
            let split0 = a.resplit(Some(0)).unwrap();
            let back = split0.resplit(None).unwrap();
            (
                a.local_tile().to_owned(),
                split0.local_tile().nrows(),
                back.local_tile().to_owned(),
            )
        });
        for (original, local_rows, back) in &results {
            assert_eq!(original, back);
            // ceil(5/2) = 3 rows on rank 0, remainder 2 on rank 1.
            assert!(*local_rows == 3 || *local_rows == 2);
        }
    }

    #[test]
    fn axis_to_axis_exchange_preserves_global_content() {
        let results = LocalCluster::run(3, |comm| {
            let a = counting_matrix(4, 5, Some(0), comm);
            let moved = a.resplit(Some(1)).unwrap();
            assert_eq!(moved.split(), Some(1));
            let back = moved.resplit(Some(0)).unwrap();
            (a.to_global(), moved.to_global(), back.to_global())
        });
        for (orig, moved, back) in &results {
            assert_eq!(orig, moved);
            assert_eq!(orig, back);
        }
    }

    #[test]
    fn idempotent_resplit_on_split_array_is_byte_identical() {
        let results = LocalCluster::run(2, |comm| {
            let a = counting_matrix(4, 4, Some(1), comm);
            let same = a.resplit(Some(1)).unwrap();
            a.local_tile() == same.local_tile()
        });
        assert!(results.into_iter().all(|ok| ok));
    }
}
