//! The partitioned dense array.
//!
//! A [`DndArray`] is a rank-1 or rank-2 dense array whose global content is
//! either replicated on every rank (`split == None`) or partitioned along
//! one axis into contiguous blocks, one block per rank (see
//! [`crate::partition`] for the layout convention). Each rank physically
//! holds only its local tile, a [`faer::Mat<f64>`]; everything global goes
//! through the array's [`Communicator`].
//!
//! The invariant maintained throughout: summing the local extents along the
//! split axis over all ranks yields the global extent, and unsplit arrays
//! hold byte-identical full copies everywhere. Shapes are immutable after
//! construction; tile contents may be mutated in place (the conjugate
//! gradient loop does so every iteration).
//!
//! Rank-1 arrays store their tile as an `n_local x 1` column; the shape
//! metadata is what distinguishes a vector from an `n x 1` matrix.

use crate::comm::Communicator;
use crate::dtype::DType;
use crate::error::{ArrayError, ArrayErrorKind};
use crate::partition;
use faer::Mat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Arc;

/// A dense array distributed over a one-dimensional process grid.
#[derive(Clone)]
pub struct DndArray {
    shape: Vec<usize>,
    split: Option<usize>,
    dtype: DType,
    tile: Mat<f64>,
    comm: Arc<dyn Communicator>,
}

impl std::fmt::Debug for DndArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DndArray")
            .field("shape", &self.shape)
            .field("split", &self.split)
            .field("dtype", &self.dtype)
            .field("tile", &self.tile)
            .finish_non_exhaustive()
    }
}

/// Copies a tile into a flat row-major buffer for the wire.
pub(crate) fn pack_tile(m: faer::MatRef<'_, f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            out.push(m[(i, j)]);
        }
    }
    out
}

/// Rebuilds a tile from a flat row-major buffer.
pub(crate) fn unpack_tile(rows: usize, cols: usize, data: &[f64]) -> Mat<f64> {
    debug_assert_eq!(rows * cols, data.len());
    Mat::from_fn(rows, cols, |i, j| data[i * cols + j])
}

fn validate_layout(shape: &[usize], split: Option<usize>) -> Result<(), ArrayError> {
    if shape.is_empty() || shape.len() > 2 {
        return Err(ArrayErrorKind::UnsupportedRank { ndim: shape.len() }.into());
    }
    if let Some(axis) = split {
        if axis >= shape.len() {
            return Err(ArrayErrorKind::Shape {
                axis,
                ndim: shape.len(),
            }
            .into());
        }
    }
    Ok(())
}

/// Local tile dimensions (rows, cols) for a layout on a given rank.
fn tile_dims(shape: &[usize], split: Option<usize>, size: usize, rank: usize) -> (usize, usize) {
    let rows = shape[0];
    let cols = if shape.len() == 2 { shape[1] } else { 1 };
    match split {
        None => (rows, cols),
        Some(0) => (partition::block_len(rows, size, rank), cols),
        Some(1) => (rows, partition::block_len(cols, size, rank)),
        Some(_) => unreachable!("split axis validated against rank"),
    }
}

impl DndArray {
    pub(crate) fn from_parts(
        shape: Vec<usize>,
        split: Option<usize>,
        dtype: DType,
        tile: Mat<f64>,
        comm: Arc<dyn Communicator>,
    ) -> Self {
        debug_assert_eq!(
            (tile.nrows(), tile.ncols()),
            tile_dims(&shape, split, comm.size(), comm.rank()),
            "tile dimensions disagree with the declared layout"
        );
        DndArray {
            shape,
            split,
            dtype,
            tile,
            comm,
        }
    }

    /// An array filled with a constant value.
    pub fn full(
        shape: &[usize],
        value: f64,
        split: Option<usize>,
        dtype: DType,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        validate_layout(shape, split)?;
        let (r, c) = tile_dims(shape, split, comm.size(), comm.rank());
        Ok(DndArray::from_parts(
            shape.to_vec(),
            split,
            dtype,
            Mat::from_fn(r, c, |_, _| value),
            comm,
        ))
    }

    pub fn zeros(
        shape: &[usize],
        split: Option<usize>,
        dtype: DType,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        Self::full(shape, 0.0, split, dtype, comm)
    }

    pub fn ones(
        shape: &[usize],
        split: Option<usize>,
        dtype: DType,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        Self::full(shape, 1.0, split, dtype, comm)
    }

    /// The n x n identity matrix.
    pub fn eye(
        n: usize,
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        let shape = [n, n];
        validate_layout(&shape, split)?;
        let (r, c) = tile_dims(&shape, split, comm.size(), comm.rank());
        let row0 = match split {
            Some(0) => partition::block_range(n, comm.size(), comm.rank()).start,
            _ => 0,
        };
        let col0 = match split {
            Some(1) => partition::block_range(n, comm.size(), comm.rank()).start,
            _ => 0,
        };
        let tile = Mat::from_fn(r, c, |i, j| if i + row0 == j + col0 { 1.0 } else { 0.0 });
        Ok(DndArray::from_parts(
            shape.to_vec(),
            split,
            DType::Float64,
            tile,
            comm,
        ))
    }

    /// The vector `[0, 1, ..., n-1]`.
    pub fn arange(
        n: usize,
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        let shape = [n];
        validate_layout(&shape, split)?;
        let start = match split {
            Some(0) => partition::block_range(n, comm.size(), comm.rank()).start,
            _ => 0,
        };
        let (r, _) = tile_dims(&shape, split, comm.size(), comm.rank());
        let tile = Mat::from_fn(r, 1, |i, _| (start + i) as f64);
        Ok(DndArray::from_parts(
            shape.to_vec(),
            split,
            DType::Int32,
            tile,
            comm,
        ))
    }

    /// Builds an array from caller-provided global data in row-major order.
    /// Every rank must pass identical data; each keeps only its own block.
    pub fn from_rows(
        shape: &[usize],
        data: &[f64],
        split: Option<usize>,
        dtype: DType,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ArrayError> {
        validate_layout(shape, split)?;
        let rows = shape[0];
        let cols = if shape.len() == 2 { shape[1] } else { 1 };
        if data.len() != rows * cols {
            return Err(ArrayErrorKind::InvalidArgument(format!(
                "data has {} elements but shape {:?} needs {}",
                data.len(),
                shape,
                rows * cols
            ))
            .into());
        }
        let row_range = local_axis_range(shape, split, comm.as_ref(), 0);
        let col_range = local_axis_range(shape, split, comm.as_ref(), 1);
        let tile = Mat::from_fn(row_range.len(), col_range.len(), |i, j| {
            data[(row_range.start + i) * cols + (col_range.start + j)]
        });
        Ok(DndArray::from_parts(
            shape.to_vec(),
            split,
            dtype,
            tile,
            comm,
        ))
    }

    /// A uniformly random array in `[0, 1)`, identical in global content on
    /// every rank: rank 0 draws, the values are broadcast, and each rank
    /// keeps its local block. With `seed == None` rank 0 uses OS entropy.
    pub fn random_uniform(
        shape: &[usize],
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
        seed: Option<u64>,
    ) -> Result<Self, ArrayError> {
        validate_layout(shape, split)?;
        let rows = shape[0];
        let cols = if shape.len() == 2 { shape[1] } else { 1 };
        let mut global = vec![0.0; rows * cols];
        if comm.rank() == 0 {
            match seed {
                Some(s) => {
                    let mut rng = StdRng::seed_from_u64(s);
                    global.iter_mut().for_each(|x| *x = rng.random());
                }
                None => {
                    let mut rng = rand::rng();
                    global.iter_mut().for_each(|x| *x = rng.random());
                }
            }
        }
        comm.broadcast(&mut global, 0);
        Self::from_rows(shape, &global, split, DType::Float64, comm)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Length of a rank-1 array.
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.shape.iter().product::<usize>() == 0
    }

    pub fn split(&self) -> Option<usize> {
        self.split
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn local_tile(&self) -> faer::MatRef<'_, f64> {
        self.tile.as_ref()
    }

    pub fn local_tile_mut(&mut self) -> faer::MatMut<'_, f64> {
        self.tile.as_mut()
    }

    /// Global indices this rank owns along `axis` (the full extent when the
    /// array is not split along `axis`).
    pub(crate) fn local_range(&self, axis: usize) -> Range<usize> {
        local_axis_range(&self.shape, self.split, self.comm.as_ref(), axis)
    }

    /// Total number of elements in the global array.
    pub fn global_numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Gathers the full global content into a local dense matrix (rank-1
    /// arrays come back as an `n x 1` column). Intended for small arrays,
    /// verification, and result extraction.
    pub fn to_global(&self) -> Mat<f64> {
        match self.split {
            None => self.tile.clone(),
            Some(_) => self
                .resplit(None)
                .expect("resplit to unsplit cannot fail on a valid array")
                .tile,
        }
    }

    /// Replaces this array's contents with `src`'s. Layouts must agree.
    pub(crate) fn assign_from(&mut self, src: &DndArray) {
        debug_assert_eq!(self.shape, src.shape);
        debug_assert_eq!(self.split, src.split);
        self.tile = src.tile.clone();
        self.dtype = src.dtype;
    }

    fn check_same_shape(&self, other: &DndArray) -> Result<(), ArrayError> {
        if self.shape != other.shape {
            return Err(ArrayErrorKind::InvalidArgument(format!(
                "operand shapes {:?} and {:?} do not match",
                self.shape, other.shape
            ))
            .into());
        }
        Ok(())
    }

    /// Element-wise combine against `other`, aligning `other` to this
    /// array's split first. For equal-shape operands the transfer costs tie,
    /// so the right-hand side is the one that moves.
    fn zip_with(
        &self,
        other: &DndArray,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<DndArray, ArrayError> {
        self.check_same_shape(other)?;
        let moved;
        let rhs = if other.split == self.split {
            other
        } else {
            moved = other.resplit(self.split)?;
            &moved
        };
        let tile = Mat::from_fn(self.tile.nrows(), self.tile.ncols(), |i, j| {
            op(self.tile[(i, j)], rhs.tile[(i, j)])
        });
        Ok(DndArray::from_parts(
            self.shape.clone(),
            self.split,
            self.dtype.promote(other.dtype),
            tile,
            Arc::clone(&self.comm),
        ))
    }

    pub fn add(&self, other: &DndArray) -> Result<DndArray, ArrayError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &DndArray) -> Result<DndArray, ArrayError> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Scalar multiple, `alpha * self`.
    pub fn scale(&self, alpha: f64) -> DndArray {
        let tile = Mat::from_fn(self.tile.nrows(), self.tile.ncols(), |i, j| {
            alpha * self.tile[(i, j)]
        });
        DndArray::from_parts(
            self.shape.clone(),
            self.split,
            self.dtype,
            tile,
            Arc::clone(&self.comm),
        )
    }

    /// In-place `self += alpha * other`. The workhorse of the CG update
    /// steps; avoids allocating a fresh array per iteration.
    pub fn axpy_in_place(&mut self, alpha: f64, other: &DndArray) -> Result<(), ArrayError> {
        self.check_same_shape(other)?;
        let moved;
        let rhs = if other.split == self.split {
            other
        } else {
            moved = other.resplit(self.split)?;
            &moved
        };
        for i in 0..self.tile.nrows() {
            for j in 0..self.tile.ncols() {
                self.tile[(i, j)] += alpha * rhs.tile[(i, j)];
            }
        }
        self.dtype = self.dtype.promote(other.dtype);
        Ok(())
    }

    /// Distributed inner product of two vectors: local partial dot plus a
    /// global sum when the data is partitioned.
    pub fn dot(&self, other: &DndArray) -> Result<f64, ArrayError> {
        if self.ndim() != 1 || other.ndim() != 1 {
            return Err(ArrayErrorKind::InvalidArgument(
                "dot is defined for 1D vectors".to_string(),
            )
            .into());
        }
        self.check_same_shape(other)?;
        let moved;
        let rhs = if other.split == self.split {
            other
        } else {
            moved = other.resplit(self.split)?;
            &moved
        };
        let mut local = 0.0;
        for i in 0..self.tile.nrows() {
            local += self.tile[(i, 0)] * rhs.tile[(i, 0)];
        }
        if self.split.is_some() {
            let mut buf = [local];
            self.comm.all_reduce_sum(&mut buf);
            local = buf[0];
        }
        Ok(local)
    }

    /// Euclidean (Frobenius) norm of the global array.
    pub fn norm(&self) -> f64 {
        let mut local = 0.0;
        for i in 0..self.tile.nrows() {
            for j in 0..self.tile.ncols() {
                local += self.tile[(i, j)] * self.tile[(i, j)];
            }
        }
        if self.split.is_some() {
            let mut buf = [local];
            self.comm.all_reduce_sum(&mut buf);
            local = buf[0];
        }
        local.sqrt()
    }

    /// Extracts column `j` of a rank-2 array as a vector sharing the array's
    /// row distribution. Only valid when columns are locally complete, i.e.
    /// the array is unsplit or split along axis 0.
    pub fn column(&self, j: usize) -> Result<DndArray, ArrayError> {
        if self.ndim() != 2 || self.split == Some(1) {
            return Err(ArrayErrorKind::InvalidArgument(
                "column extraction requires a 2D array with locally complete columns".to_string(),
            )
            .into());
        }
        let tile = Mat::from_fn(self.tile.nrows(), 1, |i, _| self.tile[(i, j)]);
        Ok(DndArray::from_parts(
            vec![self.shape[0]],
            self.split,
            self.dtype,
            tile,
            Arc::clone(&self.comm),
        ))
    }

    /// Writes a vector into column `j`. The vector must share the array's
    /// row distribution.
    pub fn set_column(&mut self, j: usize, v: &DndArray) -> Result<(), ArrayError> {
        if self.ndim() != 2 || self.split == Some(1) {
            return Err(ArrayErrorKind::InvalidArgument(
                "column assignment requires a 2D array with locally complete columns".to_string(),
            )
            .into());
        }
        let moved;
        let src = if v.split == self.split {
            v
        } else {
            moved = v.resplit(self.split)?;
            &moved
        };
        for i in 0..self.tile.nrows() {
            self.tile[(i, j)] = src.tile[(i, 0)];
        }
        Ok(())
    }
}

/// Global index range a rank owns along `axis` for a given layout. Axis 1
/// of a rank-1 array is the implicit singleton column.
fn local_axis_range(
    shape: &[usize],
    split: Option<usize>,
    comm: &dyn Communicator,
    axis: usize,
) -> Range<usize> {
    let extent = if axis < shape.len() { shape[axis] } else { 1 };
    if split == Some(axis) {
        partition::block_range(extent, comm.size(), comm.rank())
    } else {
        0..extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SelfComm;

    #[test]
    fn constructors_validate_rank_and_split() {
        let comm = SelfComm::new();
        assert!(DndArray::zeros(&[2, 2, 2], None, DType::Float64, comm.clone()).is_err());
        let err =
            DndArray::zeros(&[4, 4], Some(2), DType::Float64, comm.clone()).unwrap_err();
        assert!(err.is_shape_error());
        assert!(DndArray::zeros(&[4], Some(0), DType::Float64, comm).is_ok());
    }

    #[test]
    fn arange_and_eye_contents() {
        let comm = SelfComm::new();
        let v = DndArray::arange(4, None, comm.clone()).unwrap();
        assert_eq!(v.dtype(), DType::Int32);
        for i in 0..4 {
            assert_eq!(v.local_tile()[(i, 0)], i as f64);
        }
        let id = DndArray::eye(3, None, comm).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(id.local_tile()[(i, j)], if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn elementwise_ops_promote_dtype() {
        let comm = SelfComm::new();
        let a = DndArray::ones(&[3], None, DType::Int32, comm.clone()).unwrap();
        let b = DndArray::full(&[3], 2.5, None, DType::Float64, comm).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.dtype(), DType::Float64);
        assert_eq!(c.local_tile()[(1, 0)], 3.5);
    }

    #[test]
    fn dot_and_norm_on_a_single_rank() {
        let comm = SelfComm::new();
        let a = DndArray::from_rows(&[3], &[1.0, 2.0, 3.0], None, DType::Float64, comm.clone())
            .unwrap();
        let b = DndArray::from_rows(&[3], &[4.0, 5.0, 6.0], None, DType::Float64, comm).unwrap();
        assert_eq!(a.dot(&b).unwrap(), 32.0);
        assert!((a.norm() - 14.0f64.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn axpy_updates_in_place() {
        let comm = SelfComm::new();
        let mut x = DndArray::zeros(&[3], None, DType::Float64, comm.clone()).unwrap();
        let p = DndArray::from_rows(&[3], &[1.0, 2.0, 3.0], None, DType::Float64, comm).unwrap();
        x.axpy_in_place(2.0, &p).unwrap();
        assert_eq!(x.local_tile()[(2, 0)], 6.0);
    }

    #[test]
    fn column_round_trip() {
        let comm = SelfComm::new();
        let mut m = DndArray::zeros(&[3, 2], None, DType::Float64, comm.clone()).unwrap();
        let v = DndArray::from_rows(&[3], &[7.0, 8.0, 9.0], None, DType::Float64, comm).unwrap();
        m.set_column(1, &v).unwrap();
        let back = m.column(1).unwrap();
        assert_eq!(back.local_tile()[(0, 0)], 7.0);
        assert_eq!(back.local_tile()[(2, 0)], 9.0);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let m = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let packed = pack_tile(m.as_ref());
        assert_eq!(packed, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let back = unpack_tile(2, 3, &packed);
        assert_eq!(back, m);
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let comm = SelfComm::new();
        let a = DndArray::random_uniform(&[5], None, comm.clone(), Some(42)).unwrap();
        let b = DndArray::random_uniform(&[5], None, comm, Some(42)).unwrap();
        assert_eq!(a.local_tile(), b.local_tile());
    }
}
