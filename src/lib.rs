//! Distributed dense-array numerical primitives over a one-dimensional
//! process grid.
//!
//! This crate implements partitioned dense arrays whose global content is
//! split along one axis into contiguous per-rank blocks, together with the
//! distributed operations that make them useful: a redistribution engine
//! for moving data between split axes, a matrix multiplication engine
//! covering every split configuration of both operands, and Krylov
//! solvers (conjugate gradient and Lanczos tridiagonalization) built
//! entirely on those primitives. Results are numerically identical to a
//! single-rank computation on the gathered data, whatever the split.
//!
//! Local tiles are [`faer::Mat`] matrices; cross-rank effects go through
//! the [`comm::Communicator`] trait, with [`comm::SelfComm`] for
//! single-rank runs and [`comm::cluster::LocalCluster`] simulating a
//! multi-rank grid on threads.
//!
//! ## Example Usage
//!
//! Solving a symmetric positive-definite system with conjugate gradient
//! on a single rank:
//!
//! ```rust
//! use splitdense::{cg, matmul, DndArray, DType, SelfComm};
//!
//! let comm = SelfComm::new();
//!
//! // Tridiagonal SPD matrix.
//! let n: usize = 4;
//! let data: Vec<f64> = (0..n * n)
//!     .map(|x| {
//!         let (i, j) = (x / n, x % n);
//!         if i == j { 2.0 } else if i.abs_diff(j) == 1 { -1.0 } else { 0.0 }
//!     })
//!     .collect();
//! let a = DndArray::from_rows(&[n, n], &data, None, DType::Float64, comm.clone()).unwrap();
//! let b = DndArray::ones(&[n], None, DType::Float64, comm.clone()).unwrap();
//! let x0 = DndArray::zeros(&[n], None, DType::Float64, comm).unwrap();
//!
//! let x = cg(&a, &b, &x0).unwrap();
//! let residual = b.sub(&matmul(&a, &x).unwrap()).unwrap();
//! assert!(residual.norm() < 1e-9);
//! ```
//!
//! The same code runs unchanged on a split layout: construct the arrays
//! with `split = Some(0)` inside a [`comm::cluster::LocalCluster`] closure
//! and every product, reduction, and redistribution routes through the
//! communicator.

pub mod algorithms;
pub mod array;
pub mod comm;
pub mod dtype;
pub mod error;
pub mod ops;
pub mod partition;
pub mod redistribute;
pub mod solvers;
pub mod utils;

// The primary user-facing API.
pub use algorithms::matmul::{matmul, matmul_out, matmul_with};
pub use array::DndArray;
pub use comm::cluster::LocalCluster;
pub use comm::{Communicator, SelfComm};
pub use dtype::DType;
pub use error::ArrayError;
pub use ops::{outer, trace, transpose, tril, triu};
pub use solvers::{cg, cg_out, lanczos, lanczos_out};
