//! Core distributed algorithms.
//!
//! The split-case matrix multiplication engine lives in [`matmul`]; the
//! iterative solvers built on top of it are in [`crate::solvers`].

pub mod matmul;
