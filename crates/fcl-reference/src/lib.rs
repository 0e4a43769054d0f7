#![forbid(unsafe_code)]

//! Trusted host-side semantics for the device `fmax` under test.
//!
//! The comparison is `lhs >= rhs` with the first operand winning ties, so
//! `fmax_reference(+0.0, -0.0)` is `+0.0` and `fmax_reference(-0.0, +0.0)` is
//! `-0.0`. NaN is not special-cased: a NaN on either side makes the
//! comparison false and the second operand is returned.

#[must_use]
pub fn fmax_reference(lhs: f32, rhs: f32) -> f32 {
    if lhs >= rhs { lhs } else { rhs }
}

/// Index of the lane group that output element `index` belongs to.
///
/// The second operand is broadcast per group, so this is also the index
/// into the scalar `b` array for that element.
#[must_use]
pub const fn group_index(index: usize, vector_width: usize) -> usize {
    index / vector_width
}

#[must_use]
pub const fn lane_index(index: usize, vector_width: usize) -> usize {
    index % vector_width
}

/// Operands compared for output element `index`: `(a[index], b[index / width])`.
///
/// Returns `None` when either array is too short or the width is zero.
#[must_use]
pub fn lane_operands(a: &[f32], b: &[f32], index: usize, vector_width: usize) -> Option<(f32, f32)> {
    if vector_width == 0 {
        return None;
    }
    let lhs = *a.get(index)?;
    let rhs = *b.get(group_index(index, vector_width))?;
    Some((lhs, rhs))
}

/// Bit-pattern equality; distinguishes `+0.0` from `-0.0`.
#[must_use]
pub fn bits_identical(lhs: f32, rhs: f32) -> bool {
    lhs.to_bits() == rhs.to_bits()
}

#[cfg(test)]
mod tests {
    use super::{bits_identical, fmax_reference, group_index, lane_index, lane_operands};

    #[test]
    fn larger_operand_wins() {
        assert_eq!(fmax_reference(1.0, 2.0), 2.0);
        assert_eq!(fmax_reference(3.5, -7.0), 3.5);
        assert_eq!(fmax_reference(-1.0, -0.5), -0.5);
    }

    #[test]
    fn ties_keep_first_operand_bits() {
        let pos_first = fmax_reference(0.0, -0.0);
        assert_eq!(pos_first.to_bits(), 0.0_f32.to_bits());
        let neg_first = fmax_reference(-0.0, 0.0);
        assert_eq!(neg_first.to_bits(), (-0.0_f32).to_bits());
    }

    #[test]
    fn nan_falls_through_to_second_operand() {
        assert_eq!(fmax_reference(f32::NAN, 4.0), 4.0);
        assert!(fmax_reference(4.0, f32::NAN).is_nan());
    }

    #[test]
    fn broadcast_addressing_uses_group_not_element() {
        assert_eq!(group_index(9, 4), 2);
        assert_eq!(lane_index(9, 4), 1);
        assert_eq!(group_index(10, 3), 3);
        assert_eq!(lane_index(10, 3), 1);

        let a: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..16).map(|i| 100.0 + i as f32).collect();
        assert_eq!(lane_operands(&a, &b, 9, 4), Some((9.0, 102.0)));
    }

    #[test]
    fn lane_operands_reject_out_of_range_and_zero_width() {
        let a = [1.0_f32, 2.0];
        let b = [0.0_f32];
        assert_eq!(lane_operands(&a, &b, 2, 1), None);
        assert_eq!(lane_operands(&a, &b, 1, 1), None);
        assert_eq!(lane_operands(&a, &b, 1, 2), Some((2.0, 0.0)));
        assert_eq!(lane_operands(&a, &b, 0, 0), None);
    }

    #[test]
    fn bit_identity_distinguishes_signed_zero() {
        assert!(bits_identical(1.5, 1.5));
        assert!(!bits_identical(0.0, -0.0));
        assert!(bits_identical(f32::NAN, f32::NAN));
    }
}
