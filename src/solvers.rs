//! Iterative Krylov-subspace solvers over partitioned arrays.
//!
//! Both routines drive every matrix-vector product through the distributed
//! [`matmul`] engine and every scalar through the distributed dot/norm
//! reductions, so they produce the same values under any split
//! configuration of their operands as a single-rank run on the gathered
//! data would.
//!
//! Shared numerical policy: the absolute tolerance `1e-10` governs both the
//! conjugate gradient convergence check and the Lanczos breakdown check.
//! Both thresholds compare globally reduced scalars, so every rank takes
//! the same branch and the collective call sequence stays aligned.

use crate::algorithms::matmul::{matmul, write_out};
use crate::array::DndArray;
use crate::dtype::DType;
use crate::error::{ArrayError, ArrayErrorKind};
use faer::Mat;
use std::sync::Arc;

/// Absolute residual tolerance shared by convergence and breakdown checks.
const TOLERANCE: f64 = 1e-10;

fn require_matrix_vector(a: &DndArray, v: &DndArray, name: &str) -> Result<(), ArrayError> {
    if a.ndim() != 2 {
        return Err(
            ArrayErrorKind::InvalidArgument("A needs to be a 2D matrix".to_string()).into(),
        );
    }
    if v.ndim() != 1 {
        return Err(ArrayErrorKind::InvalidArgument(format!(
            "{name} needs to be a 1D vector"
        ))
        .into());
    }
    Ok(())
}

/// Conjugate gradient method for the symmetric positive-definite system
/// `A x = b`.
///
/// Iterates at most `len(b)` times and terminates early once the absolute
/// residual norm drops below `1e-10`. Exhausting the iteration budget is
/// not an error: the last iterate is returned as-is and a warning is
/// logged, so callers solving ill-conditioned systems should check the
/// residual themselves.
pub fn cg(a: &DndArray, b: &DndArray, x0: &DndArray) -> Result<DndArray, ArrayError> {
    require_matrix_vector(a, b, "b")?;
    require_matrix_vector(a, x0, "x0")?;

    let mut x = x0.clone();
    let mut r = b.sub(&matmul(a, x0)?)?;
    let mut p = r.clone();
    let mut rs_old = r.dot(&r)?;

    for i in 0..b.len() {
        let ap = matmul(a, &p)?;
        let alpha = rs_old / p.dot(&ap)?;
        x.axpy_in_place(alpha, &p)?;
        r.axpy_in_place(-alpha, &ap)?;
        let rs_new = r.dot(&r)?;
        if rs_new.sqrt() < TOLERANCE {
            log::info!("residual reached tolerance at iteration {i}");
            return Ok(x);
        }
        p = r.add(&p.scale(rs_new / rs_old))?;
        rs_old = rs_new;
    }

    log::warn!(
        "conjugate gradient did not reach tolerance within {} iterations, returning last iterate",
        b.len()
    );
    Ok(x)
}

/// [`cg`] writing the solution into a pre-allocated output vector.
///
/// The buffer must match the solution's shape and split; on mismatch an
/// output-buffer error is returned and `out` is left untouched.
pub fn cg_out(
    a: &DndArray,
    b: &DndArray,
    x0: &DndArray,
    out: &mut DndArray,
) -> Result<(), ArrayError> {
    let x = cg(a, b, x0)?;
    write_out(out, &x)
}

/// Lanczos tridiagonalization of a symmetric matrix.
///
/// Returns `(V, T)` where `V` is `n x m` with orthonormal columns spanning
/// the Krylov subspace and `T` is the `m x m` symmetric tridiagonal matrix
/// of recurrence coefficients. `v0`, when given, is the unit-norm starting
/// vector; otherwise a random vector is drawn and normalized.
///
/// Every candidate basis vector is re-orthogonalized against all prior
/// columns (full modified Gram-Schmidt, not just on breakdown): finite
/// precision makes Lanczos vectors drift from orthogonality, and the
/// O(m^2) cost buys the `V^T V ~ I` guarantee the caller relies on. When
/// the recurrence breaks down (`|w| < 1e-10`) the subspace is reseeded with
/// a fresh random vector, orthogonalized the same way; the loop always
/// produces exactly `m` columns. The breakdown branch tests a globally
/// reduced norm, so all ranks reseed together.
///
/// `V` is built split along axis 0 when `A` is (keeping the Gram-Schmidt
/// inner loop local) and unsplit otherwise, but is always redistributed to
/// unsplit before returning, so callers get a locally complete basis.
pub fn lanczos(
    a: &DndArray,
    m: usize,
    v0: Option<&DndArray>,
) -> Result<(DndArray, DndArray), ArrayError> {
    if a.ndim() != 2 {
        return Err(
            ArrayErrorKind::InvalidArgument("A needs to be a 2D matrix".to_string()).into(),
        );
    }
    let n = a.shape()[0];
    if a.shape()[1] != n {
        return Err(
            ArrayErrorKind::InvalidArgument("input matrix A needs to be square".to_string())
                .into(),
        );
    }
    if m == 0 {
        return Err(ArrayErrorKind::InvalidArgument(
            "subspace dimension m must be at least 1".to_string(),
        )
        .into());
    }

    let comm = Arc::clone(a.comm());
    let v_split = if a.split() == Some(0) { Some(0) } else { None };
    let mut v = DndArray::zeros(&[n, m], v_split, a.dtype().promote(DType::Float64), comm)?;
    let mut t = Mat::<f64>::zeros(m, m);

    let v0 = match v0 {
        Some(given) => {
            if given.ndim() != 1 || given.len() != n {
                return Err(ArrayErrorKind::InvalidArgument(format!(
                    "v0 must be a 1D vector of length {n}"
                ))
                .into());
            }
            given.resplit(v_split)?
        }
        None => {
            let vr = DndArray::random_uniform(&[n], v_split, Arc::clone(a.comm()), None)?;
            let norm = vr.norm();
            vr.scale(1.0 / norm)
        }
    };

    let mut w = matmul(a, &v0)?;
    w.resplit_(v_split)?;
    let alpha = w.dot(&v0)?;
    w.axpy_in_place(-alpha, &v0)?;
    t[(0, 0)] = alpha;
    v.set_column(0, &v0)?;

    for i in 1..m {
        let beta = w.norm();
        let candidate = if beta.abs() < TOLERANCE {
            log::debug!("lanczos breakdown at iteration {i}, reseeding with a random vector");
            DndArray::random_uniform(&[n], v_split, Arc::clone(a.comm()), None)?
        } else {
            w.clone()
        };
        let vi = orthonormalize_against(candidate, &v, i);

        w = matmul(a, &vi)?;
        w.resplit_(v_split)?;
        let alpha = w.dot(&vi)?;
        let prev = v.column(i - 1)?;
        w.axpy_in_place(-alpha, &vi)?;
        w.axpy_in_place(-beta, &prev)?;

        t[(i - 1, i)] = beta;
        t[(i, i - 1)] = beta;
        t[(i, i)] = alpha;
        v.set_column(i, &vi)?;
    }

    v.resplit_(None)?;
    let t = DndArray::from_parts(
        vec![m, m],
        None,
        DType::Float64,
        t,
        Arc::clone(v.comm()),
    );
    Ok((v, t))
}

/// [`lanczos`] writing into pre-allocated output arrays.
///
/// `v_out` must be `n x m` unsplit, `t_out` must be `m x m` unsplit; on
/// mismatch an output-buffer error is returned and neither buffer is
/// mutated.
pub fn lanczos_out(
    a: &DndArray,
    m: usize,
    v0: Option<&DndArray>,
    v_out: &mut DndArray,
    t_out: &mut DndArray,
) -> Result<(), ArrayError> {
    let (v, t) = lanczos(a, m, v0)?;
    if v_out.shape() != v.shape() || v_out.split() != v.split() {
        return Err(ArrayErrorKind::OutputMismatch {
            expected_shape: v.shape().to_vec(),
            expected_split: v.split(),
            actual_shape: v_out.shape().to_vec(),
            actual_split: v_out.split(),
        }
        .into());
    }
    write_out(t_out, &t)?;
    write_out(v_out, &v)
}

/// Modified Gram-Schmidt sweep of `candidate` against the first `count`
/// columns of `basis`, followed by normalization.
///
/// Each projection coefficient is the ratio of two inner products,
/// all-reduced together as a 2-element buffer. When the arrays are
/// replicated the local products are already global and the all-reduce
/// scales both entries by the rank count, which the ratio cancels, so the
/// same code path serves split and unsplit layouts.
fn orthonormalize_against(mut candidate: DndArray, basis: &DndArray, count: usize) -> DndArray {
    debug_assert_eq!(candidate.split(), basis.split());
    let comm = Arc::clone(basis.comm());
    let basis_tile = basis.local_tile();
    for j in 0..count {
        let mut buf = [0.0, 0.0];
        {
            let tile = candidate.local_tile();
            for i in 0..tile.nrows() {
                buf[0] += tile[(i, 0)] * basis_tile[(i, j)];
                buf[1] += basis_tile[(i, j)] * basis_tile[(i, j)];
            }
        }
        comm.all_reduce_sum(&mut buf);
        let ratio = buf[0] / buf[1];
        let mut tile = candidate.local_tile_mut();
        for i in 0..tile.nrows() {
            tile[(i, 0)] -= ratio * basis_tile[(i, j)];
        }
    }
    let norm = candidate.norm();
    candidate.scale(1.0 / norm)
}
