//! Mechanical array operations: transpose, trace, triangular masks, outer
//! product.
//!
//! These are thin compared to the matmul engine: each is a local tile
//! transform plus, at most, one reduction. Masks and diagonals are computed
//! against *global* indices, so a split array applies the same mask it
//! would when replicated.

use crate::array::DndArray;
use crate::error::{ArrayError, ArrayErrorKind};
use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Mat, Par};
use std::sync::Arc;

fn require_2d(a: &DndArray, what: &str) -> Result<(), ArrayError> {
    if a.ndim() != 2 {
        return Err(ArrayErrorKind::InvalidArgument(format!(
            "{what} requires a 2D array, got rank {}",
            a.ndim()
        ))
        .into());
    }
    Ok(())
}

/// Transpose of a rank-2 array. The local tile is transposed and the split
/// axis flips between rows and columns; no communication is needed.
pub fn transpose(a: &DndArray) -> Result<DndArray, ArrayError> {
    require_2d(a, "transpose")?;
    let tile = a.local_tile().transpose().to_owned();
    Ok(DndArray::from_parts(
        vec![a.shape()[1], a.shape()[0]],
        a.split().map(|axis| 1 - axis),
        a.dtype(),
        tile,
        Arc::clone(a.comm()),
    ))
}

/// Sum of the main diagonal of a rank-2 array. Each rank sums the diagonal
/// entries that fall inside its block; one all-reduce assembles the global
/// value. Replicated arrays reduce nothing (the local sum is already
/// global).
pub fn trace(a: &DndArray) -> Result<f64, ArrayError> {
    require_2d(a, "trace")?;
    let rows = a.local_range(0);
    let cols = a.local_range(1);
    let tile = a.local_tile();

    let mut local = 0.0;
    for g in 0..a.shape()[0].min(a.shape()[1]) {
        if rows.contains(&g) && cols.contains(&g) {
            local += tile[(g - rows.start, g - cols.start)];
        }
    }
    if a.split().is_some() {
        let mut buf = [local];
        a.comm().all_reduce_sum(&mut buf);
        local = buf[0];
    }
    Ok(local)
}

fn triangular_mask(a: &DndArray, keep: impl Fn(i64, i64) -> bool) -> Result<DndArray, ArrayError> {
    require_2d(a, "triangular extraction")?;
    let rows = a.local_range(0);
    let cols = a.local_range(1);
    let tile = a.local_tile();
    let masked = Mat::from_fn(tile.nrows(), tile.ncols(), |i, j| {
        let gi = (rows.start + i) as i64;
        let gj = (cols.start + j) as i64;
        if keep(gi, gj) {
            tile[(i, j)]
        } else {
            0.0
        }
    });
    Ok(DndArray::from_parts(
        a.shape().to_vec(),
        a.split(),
        a.dtype(),
        masked,
        Arc::clone(a.comm()),
    ))
}

/// Upper triangle: zeroes everything below the `k`-th diagonal.
pub fn triu(a: &DndArray, k: i64) -> Result<DndArray, ArrayError> {
    triangular_mask(a, |gi, gj| gj - gi >= k)
}

/// Lower triangle: zeroes everything above the `k`-th diagonal.
pub fn tril(a: &DndArray, k: i64) -> Result<DndArray, ArrayError> {
    triangular_mask(a, |gi, gj| gj - gi <= k)
}

/// Outer product of two vectors, `a ⊗ b` of shape `(len(a), len(b))`.
///
/// The right-hand vector is replicated first; the result then inherits the
/// left operand's row distribution, each rank computing its own row block
/// locally.
pub fn outer(a: &DndArray, b: &DndArray) -> Result<DndArray, ArrayError> {
    if a.ndim() != 1 || b.ndim() != 1 {
        return Err(ArrayErrorKind::InvalidArgument(
            "outer is defined for 1D vectors".to_string(),
        )
        .into());
    }
    let b_full = b.resplit(None)?;
    let mut tile = Mat::zeros(a.local_tile().nrows(), b.len());
    faer_matmul(
        tile.as_mut(),
        Accum::Replace,
        a.local_tile(),
        b_full.local_tile().transpose(),
        1.0,
        Par::Seq,
    );
    Ok(DndArray::from_parts(
        vec![a.len(), b.len()],
        a.split(),
        a.dtype().promote(b.dtype()),
        tile,
        Arc::clone(a.comm()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::cluster::LocalCluster;
    use crate::comm::SelfComm;
    use crate::dtype::DType;

    fn counting(rows: usize, cols: usize, split: Option<usize>) -> DndArray {
        let comm = SelfComm::new();
        let data: Vec<f64> = (0..rows * cols).map(|x| x as f64).collect();
        DndArray::from_rows(&[rows, cols], &data, split, DType::Float64, comm).unwrap()
    }

    #[test]
    fn transpose_swaps_shape_and_flips_split() {
        let a = counting(2, 3, None);
        let t = transpose(&a).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.local_tile()[(2, 1)], a.local_tile()[(1, 2)]);

        let results = LocalCluster::run(2, |comm| {
            let data: Vec<f64> = (0..12).map(|x| x as f64).collect();
            let a =
                DndArray::from_rows(&[3, 4], &data, Some(0), DType::Float64, comm).unwrap();
            let t = transpose(&a).unwrap();
            (t.split(), t.to_global(), a.to_global())
        });
        for (split, t, a) in results {
            assert_eq!(split, Some(1));
            assert_eq!(t, a.transpose().to_owned());
        }
    }

    #[test]
    fn trace_sums_the_diagonal_under_any_split() {
        // trace of counting 3x3 = 0 + 4 + 8 = 12
        assert_eq!(trace(&counting(3, 3, None)).unwrap(), 12.0);
        let results = LocalCluster::run(2, |comm| {
            let data: Vec<f64> = (0..9).map(|x| x as f64).collect();
            let a =
                DndArray::from_rows(&[3, 3], &data, Some(1), DType::Float64, comm).unwrap();
            trace(&a).unwrap()
        });
        assert_eq!(results, vec![12.0, 12.0]);
    }

    #[test]
    fn triangular_masks_use_global_indices() {
        let a = counting(3, 3, None);
        let u = triu(&a, 0).unwrap();
        assert_eq!(u.local_tile()[(1, 0)], 0.0);
        assert_eq!(u.local_tile()[(0, 1)], 1.0);
        let l = tril(&a, -1).unwrap();
        assert_eq!(l.local_tile()[(0, 0)], 0.0);
        assert_eq!(l.local_tile()[(2, 0)], 6.0);

        let results = LocalCluster::run(2, |comm| {
            let data: Vec<f64> = (0..16).map(|x| x as f64).collect();
            let a =
                DndArray::from_rows(&[4, 4], &data, Some(0), DType::Float64, comm).unwrap();
            triu(&a, 0).unwrap().to_global()
        });
        for global in results {
            for i in 0..4 {
                for j in 0..4 {
                    if j < i {
                        assert_eq!(global[(i, j)], 0.0);
                    } else {
                        assert_eq!(global[(i, j)], (i * 4 + j) as f64);
                    }
                }
            }
        }
    }

    #[test]
    fn outer_product_matches_elementwise_definition() {
        let comm = SelfComm::new();
        let a = DndArray::from_rows(&[3], &[1.0, 2.0, 3.0], None, DType::Float64, comm.clone())
            .unwrap();
        let b = DndArray::from_rows(&[2], &[4.0, 5.0], None, DType::Float64, comm).unwrap();
        let o = outer(&a, &b).unwrap();
        assert_eq!(o.shape(), &[3, 2]);
        assert_eq!(o.local_tile()[(2, 1)], 15.0);
    }

    #[test]
    fn outer_keeps_the_left_operand_row_split() {
        let results = LocalCluster::run(2, |comm| {
            let a = DndArray::arange(4, Some(0), comm.clone()).unwrap();
            let b = DndArray::arange(3, Some(0), comm).unwrap();
            let o = outer(&a, &b).unwrap();
            (o.split(), o.to_global())
        });
        for (split, global) in results {
            assert_eq!(split, Some(0));
            for i in 0..4 {
                for j in 0..3 {
                    assert_eq!(global[(i, j)], (i * j) as f64);
                }
            }
        }
    }
}
