//! Supporting utilities for the experiment binaries and out-of-core
//! workflows.
//!
//! - **`prefetch`**: a background chunk loader that overlaps file or
//!   generator I/O with computation through an explicit double buffer.

pub mod prefetch;
