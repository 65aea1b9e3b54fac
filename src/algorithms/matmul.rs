//! Distributed dense matrix multiplication over every split configuration.
//!
//! The engine dispatches on the pair of split axes and picks the
//! communication pattern that produces a bit-identical global result to a
//! single-process dense multiply:
//!
//! - unsplit x unsplit: purely local.
//! - one operand split along a non-contracted axis: purely local, result
//!   inherits that split.
//! - a split along the contracted dimension (A axis 1, B axis 0, or both):
//!   each rank multiplies its slices and an all-reduce-sum assembles the
//!   global result (the SUMMA-style reduction). Both operands' contraction
//!   blocks coincide whenever the inner extents match, because the block
//!   layout is a pure function of (extent, world size).
//! - both operands split along non-contracted axes, or same-axis splits:
//!   a ring/tiled exchange; blocks of one operand are broadcast in rank
//!   order and partial products accumulate into the local output tile, so
//!   neither operand is ever fully materialized on a single rank.
//!
//! Output split selection is deterministic: unsplit inputs give an unsplit
//! output; a split on A's row dimension gives split 0; a split on B's
//! column dimension alone gives split 1; contraction-dimension splits give
//! an unsplit output after the reduction.
//!
//! [`matmul_with`] may additionally be told to resplit an operand
//! (`allow_resplit = true`) when that lowers total transfer. The moved
//! operand is the one with fewer global elements, ties moving the
//! right-hand operand; the operand's new split axis is an observable side
//! effect, which is why that entry point takes `&mut` operands.
//!
//! 1-D operands follow the usual lifting rule: a vector on the left is a
//! row, a vector on the right is a column, and the lifted dimensions are
//! squeezed from the result. Ranks above 2 are not supported.

use crate::array::{pack_tile, unpack_tile, DndArray};
use crate::error::{ArrayError, ArrayErrorKind};
use crate::partition;
use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Mat, Par};
use std::sync::Arc;

/// Which operand a permitted resplit moved.
enum Moved {
    Left(DndArray),
    Right(DndArray),
}

/// Distributed matrix product `A x B` with default options: no operand is
/// resplit, and ring patterns are chosen over full materialization.
pub fn matmul(a: &DndArray, b: &DndArray) -> Result<DndArray, ArrayError> {
    let (result, _) = dispatch(a, b, false)?;
    Ok(result)
}

/// Distributed matrix product writing into a pre-allocated output array.
///
/// The buffer must match the computed result's shape and split exactly; on
/// mismatch an output-buffer error is returned and `out` is left untouched.
pub fn matmul_out(a: &DndArray, b: &DndArray, out: &mut DndArray) -> Result<(), ArrayError> {
    let (result, _) = dispatch(a, b, false)?;
    write_out(out, &result)
}

/// Full-form distributed matrix product.
///
/// With `allow_resplit = true` the engine may redistribute one operand to
/// minimize total communication; the operand's changed split axis persists
/// after the call. An optional pre-allocated `out` receives a copy of the
/// result after shape/split validation.
pub fn matmul_with(
    a: &mut DndArray,
    b: &mut DndArray,
    out: Option<&mut DndArray>,
    allow_resplit: bool,
) -> Result<DndArray, ArrayError> {
    let (result, moved) = dispatch(a, b, allow_resplit)?;
    if let Some(out) = out {
        write_out(out, &result)?;
    }
    match moved {
        Some(Moved::Left(new_a)) => *a = new_a,
        Some(Moved::Right(new_b)) => *b = new_b,
        None => {}
    }
    Ok(result)
}

pub(crate) fn write_out(out: &mut DndArray, result: &DndArray) -> Result<(), ArrayError> {
    if out.shape() != result.shape() || out.split() != result.split() {
        return Err(ArrayErrorKind::OutputMismatch {
            expected_shape: result.shape().to_vec(),
            expected_split: result.split(),
            actual_shape: out.shape().to_vec(),
            actual_split: out.split(),
        }
        .into());
    }
    out.assign_from(result);
    Ok(())
}

/// Validates ranks, lifts vectors, runs the 2-D engine, squeezes the result.
fn dispatch(
    a: &DndArray,
    b: &DndArray,
    allow_resplit: bool,
) -> Result<(DndArray, Option<Moved>), ArrayError> {
    for operand in [a, b] {
        if operand.ndim() > 2 {
            return Err(ArrayErrorKind::UnsupportedRank {
                ndim: operand.ndim(),
            }
            .into());
        }
    }
    let left_is_vec = a.ndim() == 1;
    let right_is_vec = b.ndim() == 1;
    let a2 = if left_is_vec { lift_row(a) } else { a.clone() };
    let b2 = if right_is_vec { lift_col(b) } else { b.clone() };

    let lhs_inner = a2.shape()[1];
    let rhs_rows = b2.shape()[0];
    if lhs_inner != rhs_rows {
        return Err(ArrayErrorKind::DimensionMismatch {
            lhs_inner,
            rhs_rows,
        }
        .into());
    }

    let (c2, moved) = matmul_2d(&a2, &b2, allow_resplit)?;

    // Translate a side effect on a lifted operand back to vector layout.
    let moved = moved.map(|m| match m {
        Moved::Left(arr) if left_is_vec => Moved::Left(squeeze_row(&arr)),
        Moved::Right(arr) if right_is_vec => Moved::Right(squeeze_col(&arr)),
        other => other,
    });

    let result = match (left_is_vec, right_is_vec) {
        (false, false) => c2,
        (false, true) => squeeze_col(&c2),
        (true, false) => squeeze_row(&c2),
        // vector . vector contracts everything; a single global value.
        (true, true) => squeeze_col(&squeeze_row(&c2)),
    };
    Ok((result, moved))
}

/// Lifts a vector to a `1 x k` row matrix. A split along the vector's only
/// axis becomes a split along the row's column axis.
fn lift_row(v: &DndArray) -> DndArray {
    let tile = v.local_tile().transpose().to_owned();
    DndArray::from_parts(
        vec![1, v.len()],
        v.split().map(|_| 1),
        v.dtype(),
        tile,
        Arc::clone(v.comm()),
    )
}

/// Lifts a vector to a `k x 1` column matrix; the tile layout is unchanged.
fn lift_col(v: &DndArray) -> DndArray {
    DndArray::from_parts(
        vec![v.len(), 1],
        v.split(),
        v.dtype(),
        v.local_tile().to_owned(),
        Arc::clone(v.comm()),
    )
}

/// Squeezes a `1 x n` matrix back to a vector of length `n`.
fn squeeze_row(m: &DndArray) -> DndArray {
    let tile = m.local_tile().transpose().to_owned();
    DndArray::from_parts(
        vec![m.shape()[1]],
        m.split().map(|_| 0),
        m.dtype(),
        tile,
        Arc::clone(m.comm()),
    )
}

/// Squeezes an `m x 1` matrix back to a vector of length `m`.
fn squeeze_col(m: &DndArray) -> DndArray {
    DndArray::from_parts(
        vec![m.shape()[0]],
        m.split(),
        m.dtype(),
        m.local_tile().to_owned(),
        Arc::clone(m.comm()),
    )
}

/// The 2-D split-case engine. Both operands are rank 2 with matching inner
/// extents by the time this runs.
fn matmul_2d(
    a: &DndArray,
    b: &DndArray,
    allow_resplit: bool,
) -> Result<(DndArray, Option<Moved>), ArrayError> {
    let comm = a.comm();
    let size = comm.size();
    let m = a.shape()[0];
    let k = a.shape()[1];
    let n = b.shape()[1];
    let dtype = a.dtype().promote(b.dtype());

    let wrap = |shape: Vec<usize>, split: Option<usize>, tile: Mat<f64>| {
        DndArray::from_parts(shape, split, dtype, tile, Arc::clone(comm))
    };

    match (a.split(), b.split()) {
        // Every rank already holds both operands in full.
        (None, None) => Ok((wrap(vec![m, n], None, local_product(a, b)), None)),

        // Non-contracted split on one side: purely local, split inherited.
        (Some(0), None) => Ok((wrap(vec![m, n], Some(0), local_product(a, b)), None)),
        (None, Some(1)) => Ok((wrap(vec![m, n], Some(1), local_product(a, b)), None)),

        // A split along its contraction axis: multiply against the matching
        // row slice of the replicated B, then all-reduce the partials.
        (Some(1), None) => {
            let ra = a.local_range(1);
            let b_slice = b.local_tile().subrows(ra.start, ra.len());
            let partial = dense_product(a.local_tile(), b_slice);
            Ok((wrap(vec![m, n], None, all_reduce_mat(a, partial)), None))
        }

        // Mirror image: B split along its contraction axis.
        (None, Some(0)) => {
            let rb = b.local_range(0);
            let a_slice = a.local_tile().subcols(rb.start, rb.len());
            let partial = dense_product(a_slice, b.local_tile());
            Ok((wrap(vec![m, n], None, all_reduce_mat(a, partial)), None))
        }

        // Both split along the contracted dimension: the canonical
        // SUMMA-style reduction. Block boundaries coincide because both are
        // ceil-blocks of the same inner extent.
        (Some(1), Some(0)) => {
            let partial = dense_product(a.local_tile(), b.local_tile());
            Ok((wrap(vec![m, n], None, all_reduce_mat(a, partial)), None))
        }

        // Independent non-contracted splits: circulate B's column blocks and
        // fill this rank's row block of the output, one column stripe per
        // step.
        (Some(0), Some(1)) => {
            let mut c = Mat::zeros(a.local_tile().nrows(), n);
            for root in 0..size {
                let cols = partition::block_range(n, size, root);
                let block = broadcast_tile(b, root, k, cols.len());
                faer_matmul(
                    c.as_mut().subcols_mut(cols.start, cols.len()),
                    Accum::Replace,
                    a.local_tile(),
                    block.as_ref(),
                    1.0,
                    Par::Seq,
                );
            }
            Ok((wrap(vec![m, n], Some(0), c), None))
        }

        // Same-axis splits need a transfer. Without permission to resplit,
        // circulate the contraction blocks of the other operand and
        // accumulate; with permission, move the cheaper operand wholesale.
        (Some(0), Some(0)) => {
            if allow_resplit {
                return resplit_and_retry(a, b, allow_resplit);
            }
            let mut c = Mat::zeros(a.local_tile().nrows(), n);
            for root in 0..size {
                let rows = partition::block_range(k, size, root);
                let block = broadcast_tile(b, root, rows.len(), n);
                faer_matmul(
                    c.as_mut(),
                    Accum::Add,
                    a.local_tile().subcols(rows.start, rows.len()),
                    block.as_ref(),
                    1.0,
                    Par::Seq,
                );
            }
            Ok((wrap(vec![m, n], Some(0), c), None))
        }

        (Some(1), Some(1)) => {
            if allow_resplit {
                return resplit_and_retry(a, b, allow_resplit);
            }
            let mut c = Mat::zeros(m, b.local_tile().ncols());
            for root in 0..size {
                let cols = partition::block_range(k, size, root);
                let block = broadcast_tile(a, root, m, cols.len());
                faer_matmul(
                    c.as_mut(),
                    Accum::Add,
                    block.as_ref(),
                    b.local_tile().subrows(cols.start, cols.len()),
                    1.0,
                    Par::Seq,
                );
            }
            Ok((wrap(vec![m, n], Some(1), c), None))
        }

        (sa, sb) => unreachable!("split axes {sa:?}/{sb:?} on rank-2 operands"),
    }
}

/// Moves the operand with fewer global elements to an unsplit layout (ties
/// move the right-hand operand) and re-dispatches on the simpler case.
fn resplit_and_retry(
    a: &DndArray,
    b: &DndArray,
    allow_resplit: bool,
) -> Result<(DndArray, Option<Moved>), ArrayError> {
    debug_assert!(allow_resplit);
    if b.global_numel() <= a.global_numel() {
        let new_b = b.resplit(None)?;
        log::debug!(
            "matmul resplit: moving right operand {:?} to unsplit",
            b.shape()
        );
        let (result, _) = matmul_2d(a, &new_b, false)?;
        Ok((result, Some(Moved::Right(new_b))))
    } else {
        let new_a = a.resplit(None)?;
        log::debug!(
            "matmul resplit: moving left operand {:?} to unsplit",
            a.shape()
        );
        let (result, _) = matmul_2d(&new_a, b, false)?;
        Ok((result, Some(Moved::Left(new_a))))
    }
}

/// Local dense product of two whole tiles.
fn local_product(a: &DndArray, b: &DndArray) -> Mat<f64> {
    dense_product(a.local_tile(), b.local_tile())
}

/// Dense product into a freshly allocated output, always through the
/// explicit kernel so no operator temporaries are created.
fn dense_product(a: faer::MatRef<'_, f64>, b: faer::MatRef<'_, f64>) -> Mat<f64> {
    let mut out = Mat::zeros(a.nrows(), b.ncols());
    faer_matmul(out.as_mut(), Accum::Replace, a, b, 1.0, Par::Seq);
    out
}

/// All-reduce-sum of a partial product, element-wise across ranks.
fn all_reduce_mat(owner: &DndArray, partial: Mat<f64>) -> Mat<f64> {
    let (r, c) = (partial.nrows(), partial.ncols());
    let mut buf = pack_tile(partial.as_ref());
    owner.comm().all_reduce_sum(&mut buf);
    unpack_tile(r, c, &buf)
}

/// Broadcasts `root`'s local tile (known to be `rows x cols`) to all ranks.
fn broadcast_tile(src: &DndArray, root: usize, rows: usize, cols: usize) -> Mat<f64> {
    let comm = src.comm();
    let mut buf = if comm.rank() == root {
        pack_tile(src.local_tile())
    } else {
        vec![0.0; rows * cols]
    };
    debug_assert_eq!(buf.len(), rows * cols);
    comm.broadcast(&mut buf, root);
    unpack_tile(rows, cols, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::cluster::LocalCluster;
    use crate::comm::SelfComm;
    use crate::dtype::DType;

    fn matrix(
        rows: usize,
        cols: usize,
        split: Option<usize>,
        comm: Arc<dyn crate::comm::Communicator>,
    ) -> DndArray {
        let data: Vec<f64> = (0..rows * cols).map(|x| (x % 7) as f64 - 3.0).collect();
        DndArray::from_rows(&[rows, cols], &data, split, DType::Float64, comm).unwrap()
    }

    #[test]
    fn unsplit_product_matches_dense_reference() {
        let comm = SelfComm::new();
        let a = matrix(3, 4, None, comm.clone());
        let b = matrix(4, 2, None, comm);
        let c = matmul(&a, &b).unwrap();
        let reference = dense_product(a.local_tile(), b.local_tile());
        assert_eq!(c.to_global(), reference);
        assert_eq!(c.split(), None);
    }

    #[test]
    fn inner_dimension_mismatch_is_rejected() {
        let comm = SelfComm::new();
        let a = matrix(25, 25, None, comm.clone());
        let b = matrix(42, 42, None, comm);
        let err = matmul(&a, &b).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }

    #[test]
    fn vector_lifting_rules() {
        let comm = SelfComm::new();
        let a = matrix(3, 4, None, comm.clone());
        let x = DndArray::from_rows(
            &[4],
            &[1.0, 0.0, -1.0, 2.0],
            None,
            DType::Float64,
            comm.clone(),
        )
        .unwrap();
        // Matrix . column vector -> vector of length 3.
        let y = matmul(&a, &x).unwrap();
        assert_eq!(y.shape(), &[3]);
        // Row vector . matrix -> vector of length 4.
        let z = DndArray::from_rows(&[3], &[1.0, 1.0, 1.0], None, DType::Float64, comm).unwrap();
        let w = matmul(&z, &a).unwrap();
        assert_eq!(w.shape(), &[4]);
        // Vector . vector -> a single contracted value.
        let s = matmul(&x, &x).unwrap();
        assert_eq!(s.shape(), &[1]);
        assert_eq!(s.to_global()[(0, 0)], 6.0);
    }

    #[test]
    fn contraction_split_reduces_to_unsplit_on_two_ranks() {
        let results = LocalCluster::run(2, |comm| {
            let a = matrix(3, 4, Some(1), comm.clone());
            let b = matrix(4, 3, Some(0), comm.clone());
            let c = matmul(&a, &b).unwrap();
            let dense = matmul(
                &matrix(3, 4, None, comm.clone()),
                &matrix(4, 3, None, comm),
            )
            .unwrap();
            (c.split(), c.to_global(), dense.to_global())
        });
        for (split, got, want) in results {
            assert_eq!(split, None);
            assert_eq!(got, want);
        }
    }

    #[test]
    fn ring_case_keeps_row_split_on_two_ranks() {
        let results = LocalCluster::run(2, |comm| {
            let a = matrix(4, 5, Some(0), comm.clone());
            let b = matrix(5, 3, Some(1), comm.clone());
            let c = matmul(&a, &b).unwrap();
            let dense = matmul(
                &matrix(4, 5, None, comm.clone()),
                &matrix(5, 3, None, comm),
            )
            .unwrap();
            (c.split(), c.to_global(), dense.to_global())
        });
        for (split, got, want) in results {
            assert_eq!(split, Some(0));
            assert_eq!(got, want);
        }
    }

    #[test]
    fn allow_resplit_moves_the_smaller_operand() {
        let results = LocalCluster::run(2, |comm| {
            let mut a = matrix(6, 4, Some(0), comm.clone());
            let mut b = matrix(4, 2, Some(0), comm.clone());
            let c = matmul_with(&mut a, &mut b, None, true).unwrap();
            let dense = matmul(
                &matrix(6, 4, None, comm.clone()),
                &matrix(4, 2, None, comm),
            )
            .unwrap();
            (a.split(), b.split(), c.to_global(), dense.to_global())
        });
        for (a_split, b_split, got, want) in results {
            // B is smaller, so it moved; A is untouched.
            assert_eq!(a_split, Some(0));
            assert_eq!(b_split, None);
            assert_eq!(got, want);
        }
    }

    #[test]
    fn output_buffer_mismatch_leaves_buffer_untouched() {
        let comm = SelfComm::new();
        let a = matrix(3, 3, None, comm.clone());
        let b = matrix(3, 3, None, comm.clone());
        let mut out = DndArray::full(&[3, 2], 9.0, None, DType::Float64, comm).unwrap();
        let err = matmul_out(&a, &b, &mut out).unwrap_err();
        assert!(err.is_output_mismatch());
        assert_eq!(out.local_tile()[(0, 0)], 9.0);
    }

    #[test]
    fn output_buffer_receives_the_result() {
        let comm = SelfComm::new();
        let a = matrix(3, 3, None, comm.clone());
        let b = matrix(3, 3, None, comm.clone());
        let mut out = DndArray::zeros(&[3, 3], None, DType::Float64, comm).unwrap();
        matmul_out(&a, &b, &mut out).unwrap();
        let expected = matmul(&a, &b).unwrap();
        assert_eq!(out.to_global(), expected.to_global());
    }
}
