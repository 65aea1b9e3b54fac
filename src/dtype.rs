//! Logical element types and their promotion rules.
//!
//! Arrays carry a logical [`DType`] describing the element type of the global
//! data. When two arrays meet in a binary operation, both sides are promoted
//! to the least upper bound of their dtypes under a total order
//! (`Bool < UInt8 < Int16 < Int32 < Int64 < Float32 < Float64`) before any
//! local compute runs. The order is a pure function of the two dtypes, so
//! every rank resolves the same common type without communication.
//!
//! Physical tile storage is always `f64`; the dtype is metadata tracked
//! through operations, not a storage selector.

/// Logical element type of a distributed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    Bool,
    UInt8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Returns the common dtype two operands resolve to before local compute.
    ///
    /// The derived `Ord` follows declaration order, which is exactly the
    /// promotion total order: booleans below integer widths below float widths.
    pub fn promote(self, other: DType) -> DType {
        self.max(other)
    }

    /// True for the floating-point members of the order.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_is_the_total_order_lub() {
        assert_eq!(DType::Bool.promote(DType::Int32), DType::Int32);
        assert_eq!(DType::Int64.promote(DType::Float32), DType::Float32);
        assert_eq!(DType::Float32.promote(DType::Float64), DType::Float64);
        assert_eq!(DType::UInt8.promote(DType::Int16), DType::Int16);
        assert_eq!(DType::Float64.promote(DType::Bool), DType::Float64);
    }

    #[test]
    fn promotion_is_commutative_and_idempotent() {
        let all = [
            DType::Bool,
            DType::UInt8,
            DType::Int16,
            DType::Int32,
            DType::Int64,
            DType::Float32,
            DType::Float64,
        ];
        for &a in &all {
            assert_eq!(a.promote(a), a);
            for &b in &all {
                assert_eq!(a.promote(b), b.promote(a));
            }
        }
    }

    #[test]
    fn float_classification() {
        assert!(DType::Float32.is_float());
        assert!(DType::Float64.is_float());
        assert!(!DType::Int64.is_float());
        assert!(!DType::Bool.is_float());
    }
}
