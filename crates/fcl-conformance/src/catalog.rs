#![forbid(unsafe_code)]

/// Widths in the order they are exercised. Width 3 runs last because its
/// kernel addresses scalar pointers through `vload3`/`vstore3`.
pub const VECTOR_WIDTHS: [usize; 6] = [1, 2, 4, 8, 16, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantDescriptor {
    pub vector_width: usize,
    pub kernel_source: &'static str,
    pub entry_name: &'static str,
}

impl VariantDescriptor {
    /// Device type of the first operand, e.g. `float4`.
    #[must_use]
    pub fn type_name(&self) -> String {
        if self.vector_width == 1 {
            "float".to_string()
        } else {
            format!("float{}", self.vector_width)
        }
    }

    #[must_use]
    pub fn fixture_id(&self) -> String {
        format!("fmax_{}_float", self.type_name())
    }

    /// Output elements covered by a launch of `work_items`.
    #[must_use]
    pub const fn verified_elements(&self, work_items: usize) -> Option<usize> {
        work_items.checked_mul(self.vector_width)
    }
}

const FMAX_KERNEL: &str = r"__kernel void test_fmax(__global float *srcA, __global float *srcB, __global float *dst)
{
    int  tid = get_global_id(0);
    dst[tid] = fmax(srcA[tid], srcB[tid]);
}
";

const FMAX2_KERNEL: &str = r"__kernel void test_fmax2(__global float2 *srcA, __global float *srcB, __global float2 *dst)
{
    int  tid = get_global_id(0);
    dst[tid] = fmax(srcA[tid], srcB[tid]);
}
";

const FMAX4_KERNEL: &str = r"__kernel void test_fmax4(__global float4 *srcA, __global float *srcB, __global float4 *dst)
{
    int  tid = get_global_id(0);
    dst[tid] = fmax(srcA[tid], srcB[tid]);
}
";

const FMAX8_KERNEL: &str = r"__kernel void test_fmax8(__global float8 *srcA, __global float *srcB, __global float8 *dst)
{
    int  tid = get_global_id(0);
    dst[tid] = fmax(srcA[tid], srcB[tid]);
}
";

const FMAX16_KERNEL: &str = r"__kernel void test_fmax16(__global float16 *srcA, __global float *srcB, __global float16 *dst)
{
    int  tid = get_global_id(0);
    dst[tid] = fmax(srcA[tid], srcB[tid]);
}
";

const FMAX3_KERNEL: &str = r"__kernel void test_fmax3(__global float *srcA, __global float *srcB, __global float *dst)
{
    int  tid = get_global_id(0);
    vstore3(fmax(vload3(tid,srcA), srcB[tid]),tid,dst);
}
";

pub const VARIANT_CATALOG: [VariantDescriptor; 6] = [
    VariantDescriptor {
        vector_width: 1,
        kernel_source: FMAX_KERNEL,
        entry_name: "test_fmax",
    },
    VariantDescriptor {
        vector_width: 2,
        kernel_source: FMAX2_KERNEL,
        entry_name: "test_fmax2",
    },
    VariantDescriptor {
        vector_width: 4,
        kernel_source: FMAX4_KERNEL,
        entry_name: "test_fmax4",
    },
    VariantDescriptor {
        vector_width: 8,
        kernel_source: FMAX8_KERNEL,
        entry_name: "test_fmax8",
    },
    VariantDescriptor {
        vector_width: 16,
        kernel_source: FMAX16_KERNEL,
        entry_name: "test_fmax16",
    },
    VariantDescriptor {
        vector_width: 3,
        kernel_source: FMAX3_KERNEL,
        entry_name: "test_fmax3",
    },
];

#[must_use]
pub fn variant_catalog() -> &'static [VariantDescriptor] {
    &VARIANT_CATALOG
}

#[must_use]
pub fn descriptor_for_width(vector_width: usize) -> Option<&'static VariantDescriptor> {
    VARIANT_CATALOG
        .iter()
        .find(|descriptor| descriptor.vector_width == vector_width)
}

#[must_use]
pub fn max_width() -> usize {
    VECTOR_WIDTHS.iter().copied().max().unwrap_or(1)
}

/// Every shared buffer length is a multiple of this, the largest
/// power-of-two width, so each variant reads whole vectors.
#[must_use]
pub fn required_element_multiple() -> usize {
    VECTOR_WIDTHS
        .iter()
        .copied()
        .filter(|width| width.is_power_of_two())
        .max()
        .unwrap_or(1)
}

#[must_use]
pub fn element_count_for(work_items: usize) -> Option<usize> {
    work_items.checked_mul(required_element_multiple())
}
