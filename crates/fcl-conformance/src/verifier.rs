#![forbid(unsafe_code)]

use fcl_reference::{bits_identical, fmax_reference, group_index, lane_index, lane_operands};
use serde::{Deserialize, Serialize};

/// First divergent output element of a variant.
///
/// Values are kept as raw bit patterns so signed zeros and NaN payloads
/// survive serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchInfo {
    pub index: usize,
    pub element_count: usize,
    pub group: usize,
    pub lane: usize,
    pub expected_bits: u32,
    pub actual_bits: u32,
    pub lhs_bits: u32,
    pub rhs_bits: u32,
}

impl MismatchInfo {
    #[must_use]
    pub fn expected(&self) -> f32 {
        f32::from_bits(self.expected_bits)
    }

    #[must_use]
    pub fn actual(&self) -> f32 {
        f32::from_bits(self.actual_bits)
    }

    #[must_use]
    pub fn lhs(&self) -> f32 {
        f32::from_bits(self.lhs_bits)
    }

    #[must_use]
    pub fn rhs(&self) -> f32 {
        f32::from_bits(self.rhs_bits)
    }
}

impl std::fmt::Display for MismatchInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "discrepancy at {} (of {}) (vec {}, pos {}): expected {:?} [{:#010x}], got {:?} [{:#010x}] taking max of ({:?}, {:?})",
            self.index,
            self.element_count,
            self.group,
            self.lane,
            self.expected(),
            self.expected_bits,
            self.actual(),
            self.actual_bits,
            self.lhs(),
            self.rhs()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    InvalidWidth(usize),
    ShortBuffer {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },
    Mismatch(MismatchInfo),
}

impl VerifyError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidWidth(_) | Self::ShortBuffer { .. } => "fmax_verifier_precondition",
            Self::Mismatch(_) => "fmax_verification_mismatch",
        }
    }
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidWidth(width) => write!(f, "vector width must be > 0, got {width}"),
            Self::ShortBuffer {
                buffer,
                required,
                actual,
            } => write!(
                f,
                "{buffer} holds {actual} floats but verification needs {required}"
            ),
            Self::Mismatch(info) => write!(f, "{info}"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Checks `output[..n]` against the host reference, bit for bit.
///
/// Element `i` belongs to group `i / vector_width` and is expected to be
/// `input_a[i]` when `input_a[i] >= input_b[group]`, else `input_b[group]`.
/// A trailing partial group is checked up to `n` exactly. Stops at the
/// first divergence.
pub fn verify(
    input_a: &[f32],
    input_b: &[f32],
    output: &[f32],
    n: usize,
    vector_width: usize,
) -> Result<(), VerifyError> {
    if vector_width == 0 {
        return Err(VerifyError::InvalidWidth(vector_width));
    }
    let groups = n.div_ceil(vector_width);
    for (buffer, required, actual) in [
        ("input_a", n, input_a.len()),
        ("input_b", groups, input_b.len()),
        ("output", n, output.len()),
    ] {
        if actual < required {
            return Err(VerifyError::ShortBuffer {
                buffer,
                required,
                actual,
            });
        }
    }

    for (index, &actual) in output[..n].iter().enumerate() {
        let (lhs, rhs) = lane_operands(input_a, input_b, index, vector_width).ok_or(
            VerifyError::ShortBuffer {
                buffer: "input_b",
                required: groups,
                actual: input_b.len(),
            },
        )?;
        let expected = fmax_reference(lhs, rhs);
        if !bits_identical(expected, actual) {
            return Err(VerifyError::Mismatch(MismatchInfo {
                index,
                element_count: n,
                group: group_index(index, vector_width),
                lane: lane_index(index, vector_width),
                expected_bits: expected.to_bits(),
                actual_bits: actual.to_bits(),
                lhs_bits: lhs.to_bits(),
                rhs_bits: rhs.to_bits(),
            }));
        }
    }
    Ok(())
}
