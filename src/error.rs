//! This module defines the custom error types for the library.
//!
//! All failure conditions that distributed array operations can report are
//! centralized in a single enum behind the public [`ArrayError`] wrapper.
//!
//! Every error here is raised *before* any communication is issued, and the
//! validation producing it is deterministic given identical arguments, so on
//! a multi-rank run either every rank raises or every rank proceeds. Once a
//! collective has started there is no recoverable error state: a fault in
//! the communication layer is fatal to the whole process group.
use thiserror::Error;

/// Represents all possible errors that can occur in a distributed array operation.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct ArrayError(#[from] pub(crate) ArrayErrorKind);

/// Private enum containing the distinct kinds of errors.
/// This separation allows for a clean `Display` implementation via [`thiserror`]
/// while keeping the set of variants free to evolve without breaking the API.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum ArrayErrorKind {
    /// An argument failed basic validation (wrong dimensionality for the
    /// operation, zero-length subspace request, and similar).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The inner dimensions of a matrix product disagree.
    #[error(
        "Dimension mismatch: left operand has inner dimension {lhs_inner} but right operand has {rhs_rows} rows."
    )]
    DimensionMismatch { lhs_inner: usize, rhs_rows: usize },

    /// The operation is only defined for arrays of rank 1 or 2.
    #[error("Operands of rank {ndim} are not supported; batched multiply is not implemented.")]
    UnsupportedRank { ndim: usize },

    /// A redistribution target is incompatible with the array's global shape.
    #[error("Shape error: split axis {axis} is out of range for an array of rank {ndim}.")]
    Shape { axis: usize, ndim: usize },

    /// A caller-supplied output buffer does not match the computed result.
    #[error(
        "Output buffer mismatch: expected shape {expected_shape:?} with split {expected_split:?}, got shape {actual_shape:?} with split {actual_split:?}."
    )]
    OutputMismatch {
        expected_shape: Vec<usize>,
        expected_split: Option<usize>,
        actual_shape: Vec<usize>,
        actual_split: Option<usize>,
    },
}

// Manually implement PartialEq for the public error type.
// We compare the inner `ArrayErrorKind`.
impl PartialEq for ArrayError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl ArrayError {
    /// True when the error reports an inner-dimension disagreement.
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self.0, ArrayErrorKind::DimensionMismatch { .. })
    }

    /// True when the error reports an output-buffer shape or split mismatch.
    pub fn is_output_mismatch(&self) -> bool {
        matches!(self.0, ArrayErrorKind::OutputMismatch { .. })
    }

    /// True when the error reports a redistribution target incompatible with
    /// the array's shape.
    pub fn is_shape_error(&self) -> bool {
        matches!(self.0, ArrayErrorKind::Shape { .. })
    }
}

// Unit tests to ensure error messages are formatted correctly.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = ArrayError(ArrayErrorKind::DimensionMismatch {
            lhs_inner: 25,
            rhs_rows: 42,
        });
        let expected_message =
            "Dimension mismatch: left operand has inner dimension 25 but right operand has 42 rows.";
        assert_eq!(error.to_string(), expected_message);
        assert!(error.is_dimension_mismatch());
    }

    #[test]
    fn test_unsupported_rank_error_message() {
        let error = ArrayError(ArrayErrorKind::UnsupportedRank { ndim: 3 });
        let expected_message =
            "Operands of rank 3 are not supported; batched multiply is not implemented.";
        assert_eq!(error.to_string(), expected_message);
    }

    #[test]
    fn test_shape_error_message() {
        let error = ArrayError(ArrayErrorKind::Shape { axis: 2, ndim: 2 });
        let expected_message = "Shape error: split axis 2 is out of range for an array of rank 2.";
        assert_eq!(error.to_string(), expected_message);
        assert!(error.is_shape_error());
    }

    #[test]
    fn test_invalid_argument_error_message() {
        let error = ArrayError(ArrayErrorKind::InvalidArgument(
            "b needs to be a 1D vector".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Invalid argument: b needs to be a 1D vector"
        );
    }

    #[test]
    fn test_output_mismatch_error_message() {
        let error = ArrayError(ArrayErrorKind::OutputMismatch {
            expected_shape: vec![4, 4],
            expected_split: Some(0),
            actual_shape: vec![4, 3],
            actual_split: None,
        });
        assert_eq!(
            error.to_string(),
            "Output buffer mismatch: expected shape [4, 4] with split Some(0), got shape [4, 3] with split None."
        );
        assert!(error.is_output_mismatch());
    }
}
