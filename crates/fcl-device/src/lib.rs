#![forbid(unsafe_code)]

//! Device execution contract consumed by the conformance harness, plus a
//! host-emulated device that interprets the catalog's `fmax` kernels.

pub const DEVICE_REASON_CODES: [&str; 3] = [
    "device_allocation_failed",
    "device_compilation_failed",
    "device_execution_failed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Write,
    Bind,
    Launch,
    Read,
}

impl ExecutionStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Bind => "bind",
            Self::Launch => "launch",
            Self::Read => "read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    Allocation { requested: usize, detail: String },
    Compilation { entry: String, build_log: String },
    Execution { stage: ExecutionStage, detail: String },
}

impl DeviceError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Allocation { .. } => "device_allocation_failed",
            Self::Compilation { .. } => "device_compilation_failed",
            Self::Execution { .. } => "device_execution_failed",
        }
    }

    fn execution(stage: ExecutionStage, detail: impl Into<String>) -> Self {
        Self::Execution {
            stage,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allocation { requested, detail } => {
                write!(f, "buffer allocation of {requested} floats failed: {detail}")
            }
            Self::Compilation { entry, build_log } => {
                write!(f, "kernel '{entry}' failed to build: {build_log}")
            }
            Self::Execution { stage, detail } => {
                write!(f, "{} failed: {detail}", stage.as_str())
            }
        }
    }
}

impl std::error::Error for DeviceError {}

/// Synchronous compile/bind/launch/transfer surface of a compute runtime.
///
/// Every call returns only once the device work it issued has completed.
/// Handles are owned values; releasing one consumes it.
pub trait DeviceAdapter {
    type Buffer;
    type Kernel;

    fn device_name(&self) -> String;

    fn create_buffer(&mut self, len: usize) -> Result<Self::Buffer, DeviceError>;

    fn write_buffer(&mut self, buffer: &Self::Buffer, data: &[f32]) -> Result<(), DeviceError>;

    fn read_back(&mut self, buffer: &Self::Buffer, out: &mut [f32]) -> Result<(), DeviceError>;

    fn compile(&mut self, source: &str, entry: &str) -> Result<Self::Kernel, DeviceError>;

    fn bind_buffers(
        &mut self,
        kernel: &mut Self::Kernel,
        buffers: &[&Self::Buffer],
    ) -> Result<(), DeviceError>;

    fn launch(&mut self, kernel: &Self::Kernel, global_size: usize) -> Result<(), DeviceError>;

    fn release_buffer(&mut self, buffer: Self::Buffer);

    fn release_kernel(&mut self, kernel: Self::Kernel);
}

// ── kernel source parsing ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorAccess {
    /// `floatN` pointers indexed by work item.
    Aligned,
    /// Scalar pointers addressed through `vload3`/`vstore3`.
    Packed3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProgram {
    pub entry: String,
    pub vector_width: usize,
    pub access: VectorAccess,
}

impl KernelProgram {
    /// First `srcA`/`dst` element touched by work item `tid`.
    ///
    /// `vload3(tid, p)` reads `p[3 * tid..3 * tid + 3]`; a `floatN` pointer
    /// indexed by `tid` starts at `N * tid`.
    #[must_use]
    pub const fn lane_base(&self, tid: usize) -> Option<usize> {
        match self.access {
            VectorAccess::Packed3 => tid.checked_mul(3),
            VectorAccess::Aligned => tid.checked_mul(self.vector_width),
        }
    }

    fn access_label(&self) -> String {
        match self.access {
            VectorAccess::Packed3 => "vload3/vstore3".to_string(),
            VectorAccess::Aligned if self.vector_width == 1 => "float".to_string(),
            VectorAccess::Aligned => format!("float{}", self.vector_width),
        }
    }
}

fn parse_float_type(raw: &str) -> Option<usize> {
    let suffix = raw.strip_prefix("float")?;
    if suffix.is_empty() {
        return Some(1);
    }
    match suffix.parse::<usize>().ok()? {
        width @ (2 | 3 | 4 | 8 | 16) => Some(width),
        _ => None,
    }
}

fn parse_param_type(param: &str) -> Result<usize, String> {
    let tokens: Vec<&str> = param
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|token| !token.is_empty())
        .collect();
    match tokens.as_slice() {
        ["__global", ty, _name] | ["global", ty, _name] => {
            parse_float_type(ty).ok_or_else(|| format!("unsupported parameter type '{ty}'"))
        }
        _ => Err(format!("parameter '{}' is not a __global float pointer", param.trim())),
    }
}

/// Recognizes the `fmax(srcA, srcB) -> dst` kernel shape and its width.
pub fn parse_kernel_source(source: &str, entry: &str) -> Result<KernelProgram, String> {
    let header = format!("__kernel void {entry}(");
    let start = source
        .find(&header)
        .ok_or_else(|| format!("kernel entry '{entry}' not declared"))?;
    let after_header = &source[start + header.len()..];
    let close = after_header
        .find(')')
        .ok_or_else(|| "unterminated parameter list".to_string())?;
    let params: Vec<&str> = after_header[..close].split(',').collect();
    if params.len() != 3 {
        return Err(format!(
            "expected 3 parameters (srcA, srcB, dst), found {}",
            params.len()
        ));
    }
    let lhs_width = parse_param_type(params[0])?;
    let rhs_width = parse_param_type(params[1])?;
    let dst_width = parse_param_type(params[2])?;
    if rhs_width != 1 {
        return Err(format!("second operand must be scalar float, found float{rhs_width}"));
    }
    if lhs_width != dst_width {
        return Err(format!(
            "operand/result vector types disagree: float{lhs_width} vs float{dst_width}"
        ));
    }

    let body = &after_header[close..];
    if !body.contains('{') || !body.contains('}') {
        return Err("kernel body missing".to_string());
    }
    if !body.contains("fmax(") {
        return Err("kernel body does not call fmax".to_string());
    }

    let packed = body.contains("vload3(") && body.contains("vstore3(");
    let (vector_width, access) = match (packed, lhs_width) {
        (true, 1) => (3, VectorAccess::Packed3),
        (true, other) => {
            return Err(format!("vload3/vstore3 require scalar pointers, found float{other}"));
        }
        (false, 3) => {
            return Err("float3 pointers are not addressable; use vload3/vstore3".to_string());
        }
        (false, width) => (width, VectorAccess::Aligned),
    };

    Ok(KernelProgram {
        entry: entry.to_string(),
        vector_width,
        access,
    })
}

/// IEEE `fmax`: a NaN operand yields the other one; ties keep `x`.
#[must_use]
pub fn device_fmax(x: f32, y: f32) -> f32 {
    if x.is_nan() {
        y
    } else if y.is_nan() || x >= y {
        x
    } else {
        y
    }
}

// ── host-emulated device ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputCorruption {
    pub entry: String,
    pub indices: Vec<usize>,
}

/// Faults injected into [`HostDevice`] to exercise harness failure paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDeviceFaults {
    pub fail_compile: Option<String>,
    pub fail_launch: Option<String>,
    /// Kernel runs but leaves the output buffer untouched.
    pub skip_store: Option<String>,
    pub corrupt_output: Option<OutputCorruption>,
    pub max_buffers: Option<usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HostBuffer {
    id: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct HostKernel {
    id: usize,
    program: KernelProgram,
    args: Option<[usize; 3]>,
}

#[derive(Debug, Default)]
pub struct HostDevice {
    buffers: Vec<Option<Vec<f32>>>,
    kernels: Vec<bool>,
    faults: HostDeviceFaults,
    launches: usize,
}

impl HostDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_faults(faults: HostDeviceFaults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn live_kernels(&self) -> usize {
        self.kernels.iter().filter(|live| **live).count()
    }

    #[must_use]
    pub const fn launch_count(&self) -> usize {
        self.launches
    }

    fn slot(&self, id: usize, stage: ExecutionStage) -> Result<&Vec<f32>, DeviceError> {
        self.buffers
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| DeviceError::execution(stage, format!("buffer {id} is not live")))
    }

    fn slot_mut(&mut self, id: usize, stage: ExecutionStage) -> Result<&mut Vec<f32>, DeviceError> {
        self.buffers
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| DeviceError::execution(stage, format!("buffer {id} is not live")))
    }

    fn faulted(fault: Option<&String>, entry: &str) -> bool {
        fault.is_some_and(|target| target == entry)
    }
}

impl DeviceAdapter for HostDevice {
    type Buffer = HostBuffer;
    type Kernel = HostKernel;

    fn device_name(&self) -> String {
        "host-emulated".to_string()
    }

    fn create_buffer(&mut self, len: usize) -> Result<HostBuffer, DeviceError> {
        if len == 0 {
            return Err(DeviceError::Allocation {
                requested: len,
                detail: "zero-sized buffer".to_string(),
            });
        }
        if let Some(limit) = self.faults.max_buffers {
            if self.live_buffers() >= limit {
                return Err(DeviceError::Allocation {
                    requested: len,
                    detail: format!("device buffer limit {limit} reached"),
                });
            }
        }
        self.buffers.push(Some(vec![0.0; len]));
        Ok(HostBuffer {
            id: self.buffers.len() - 1,
        })
    }

    fn write_buffer(&mut self, buffer: &HostBuffer, data: &[f32]) -> Result<(), DeviceError> {
        let slot = self.slot_mut(buffer.id, ExecutionStage::Write)?;
        if data.len() > slot.len() {
            return Err(DeviceError::execution(
                ExecutionStage::Write,
                format!(
                    "write of {} floats exceeds buffer {} of {} floats",
                    data.len(),
                    buffer.id,
                    slot.len()
                ),
            ));
        }
        slot[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_back(&mut self, buffer: &HostBuffer, out: &mut [f32]) -> Result<(), DeviceError> {
        let slot = self.slot(buffer.id, ExecutionStage::Read)?;
        if out.len() > slot.len() {
            return Err(DeviceError::execution(
                ExecutionStage::Read,
                format!(
                    "read of {} floats exceeds buffer {} of {} floats",
                    out.len(),
                    buffer.id,
                    slot.len()
                ),
            ));
        }
        out.copy_from_slice(&slot[..out.len()]);
        Ok(())
    }

    fn compile(&mut self, source: &str, entry: &str) -> Result<HostKernel, DeviceError> {
        if Self::faulted(self.faults.fail_compile.as_ref(), entry) {
            return Err(DeviceError::Compilation {
                entry: entry.to_string(),
                build_log: "injected build failure".to_string(),
            });
        }
        let program = parse_kernel_source(source, entry).map_err(|build_log| {
            DeviceError::Compilation {
                entry: entry.to_string(),
                build_log,
            }
        })?;
        self.kernels.push(true);
        Ok(HostKernel {
            id: self.kernels.len() - 1,
            program,
            args: None,
        })
    }

    fn bind_buffers(
        &mut self,
        kernel: &mut HostKernel,
        buffers: &[&HostBuffer],
    ) -> Result<(), DeviceError> {
        let [a, b, dst] = buffers else {
            return Err(DeviceError::execution(
                ExecutionStage::Bind,
                format!(
                    "kernel '{}' takes 3 buffers, got {}",
                    kernel.program.entry,
                    buffers.len()
                ),
            ));
        };
        for buffer in [a, b, dst] {
            self.slot(buffer.id, ExecutionStage::Bind)?;
        }
        kernel.args = Some([a.id, b.id, dst.id]);
        Ok(())
    }

    fn launch(&mut self, kernel: &HostKernel, global_size: usize) -> Result<(), DeviceError> {
        let entry = kernel.program.entry.as_str();
        if !self.kernels.get(kernel.id).copied().unwrap_or(false) {
            return Err(DeviceError::execution(
                ExecutionStage::Launch,
                format!("kernel '{entry}' was released"),
            ));
        }
        if Self::faulted(self.faults.fail_launch.as_ref(), entry) {
            return Err(DeviceError::execution(
                ExecutionStage::Launch,
                format!("injected launch failure for '{entry}'"),
            ));
        }
        let [a_id, b_id, dst_id] = kernel.args.ok_or_else(|| {
            DeviceError::execution(
                ExecutionStage::Launch,
                format!("kernel '{entry}' has unbound arguments"),
            )
        })?;

        let program = &kernel.program;
        let width = program.vector_width;
        let lanes = program.lane_base(global_size).ok_or_else(|| {
            DeviceError::execution(ExecutionStage::Launch, "global size overflows lane count")
        })?;

        let a = self.slot(a_id, ExecutionStage::Launch)?;
        let b = self.slot(b_id, ExecutionStage::Launch)?;
        if a.len() < lanes || b.len() < global_size {
            return Err(DeviceError::execution(
                ExecutionStage::Launch,
                format!(
                    "'{entry}' ({}) with {global_size} work items reads past input bounds (srcA={} srcB={})",
                    program.access_label(),
                    a.len(),
                    b.len()
                ),
            ));
        }
        let results: Vec<f32> = a[..lanes]
            .chunks(width)
            .zip(b)
            .flat_map(|(group, &rhs)| group.iter().map(move |&lhs| device_fmax(lhs, rhs)))
            .collect();

        let skip_store = Self::faulted(self.faults.skip_store.as_ref(), entry);
        let corrupt = self
            .faults
            .corrupt_output
            .as_ref()
            .filter(|corruption| corruption.entry == entry)
            .map(|corruption| corruption.indices.clone())
            .unwrap_or_default();

        let dst = self.slot_mut(dst_id, ExecutionStage::Launch)?;
        if dst.len() < lanes {
            return Err(DeviceError::execution(
                ExecutionStage::Launch,
                format!(
                    "'{entry}' ({}) with {global_size} work items writes past dst bounds ({})",
                    program.access_label(),
                    dst.len()
                ),
            ));
        }
        if !skip_store {
            dst[..lanes].copy_from_slice(&results);
            for idx in corrupt.into_iter().filter(|&idx| idx < lanes) {
                dst[idx] = f32::from_bits(dst[idx].to_bits() ^ 1);
            }
        }
        self.launches += 1;
        Ok(())
    }

    fn release_buffer(&mut self, buffer: HostBuffer) {
        if let Some(slot) = self.buffers.get_mut(buffer.id) {
            *slot = None;
        }
    }

    fn release_kernel(&mut self, kernel: HostKernel) {
        if let Some(live) = self.kernels.get_mut(kernel.id) {
            *live = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DEVICE_REASON_CODES, DeviceAdapter, DeviceError, ExecutionStage, HostDevice,
        HostDeviceFaults, OutputCorruption, VectorAccess, device_fmax, parse_kernel_source,
    };

    const FMAX4: &str = "__kernel void test_fmax4(__global float4 *srcA, __global float *srcB, __global float4 *dst)\n{\n    int  tid = get_global_id(0);\n    dst[tid] = fmax(srcA[tid], srcB[tid]);\n}\n";
    const FMAX3: &str = "__kernel void test_fmax3(__global float *srcA, __global float *srcB, __global float *dst)\n{\n    int  tid = get_global_id(0);\n    vstore3(fmax(vload3(tid,srcA), srcB[tid]),tid,dst);\n}\n";

    #[test]
    fn reason_codes_cover_every_error_kind() {
        let errors = [
            DeviceError::Allocation {
                requested: 1,
                detail: String::new(),
            },
            DeviceError::Compilation {
                entry: "k".to_string(),
                build_log: String::new(),
            },
            DeviceError::Execution {
                stage: ExecutionStage::Launch,
                detail: String::new(),
            },
        ];
        for (err, code) in errors.iter().zip(DEVICE_REASON_CODES) {
            assert_eq!(err.reason_code(), code);
        }
    }

    #[test]
    fn parses_aligned_and_packed_kernels() {
        let four = parse_kernel_source(FMAX4, "test_fmax4").expect("float4 kernel");
        assert_eq!(four.vector_width, 4);
        assert_eq!(four.access, VectorAccess::Aligned);

        let three = parse_kernel_source(FMAX3, "test_fmax3").expect("vload3 kernel");
        assert_eq!(three.vector_width, 3);
        assert_eq!(three.access, VectorAccess::Packed3);
    }

    #[test]
    fn rejects_wrong_entry_and_malformed_sources() {
        let err = parse_kernel_source(FMAX4, "test_fmax8").expect_err("entry missing");
        assert!(err.contains("not declared"), "{err}");

        let vector_b = FMAX4.replace("__global float *srcB", "__global float4 *srcB");
        let err = parse_kernel_source(&vector_b, "test_fmax4").expect_err("vector srcB");
        assert!(err.contains("scalar"), "{err}");

        let no_fmax = FMAX4.replace("fmax(", "fmin(");
        let err = parse_kernel_source(&no_fmax, "test_fmax4").expect_err("no fmax");
        assert!(err.contains("fmax"), "{err}");

        let float3 = FMAX4.replace("float4", "float3");
        assert!(parse_kernel_source(&float3, "test_fmax4").is_err());
    }

    #[test]
    fn device_fmax_follows_ieee_rules() {
        assert_eq!(device_fmax(f32::NAN, 2.0), 2.0);
        assert_eq!(device_fmax(2.0, f32::NAN), 2.0);
        assert_eq!(device_fmax(0.0, -0.0).to_bits(), 0.0_f32.to_bits());
        assert_eq!(device_fmax(-3.0, 1.0), 1.0);
    }

    #[test]
    fn launch_broadcasts_second_operand_per_work_item() {
        let mut device = HostDevice::new();
        let a = device.create_buffer(8).expect("a");
        let b = device.create_buffer(8).expect("b");
        let dst = device.create_buffer(8).expect("dst");
        device
            .write_buffer(&a, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
            .expect("upload a");
        device
            .write_buffer(&b, &[2.5, 5.5, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0])
            .expect("upload b");

        let mut kernel = device.compile(FMAX4, "test_fmax4").expect("compile");
        device.bind_buffers(&mut kernel, &[&a, &b, &dst]).expect("bind");
        device.launch(&kernel, 2).expect("launch");

        let mut out = vec![0.0; 8];
        device.read_back(&dst, &mut out).expect("read");
        assert_eq!(out, vec![2.5, 2.5, 2.5, 3.0, 5.5, 5.5, 6.0, 7.0]);
        assert_eq!(device.launch_count(), 1);
    }

    #[test]
    fn launch_past_bounds_is_an_execution_error() {
        let mut device = HostDevice::new();
        let a = device.create_buffer(6).expect("a");
        let b = device.create_buffer(6).expect("b");
        let dst = device.create_buffer(6).expect("dst");
        let mut kernel = device.compile(FMAX3, "test_fmax3").expect("compile");
        device.bind_buffers(&mut kernel, &[&a, &b, &dst]).expect("bind");
        device.launch(&kernel, 2).expect("two groups of three fit");
        let err = device.launch(&kernel, 3).expect_err("third group overruns");
        assert!(matches!(
            err,
            DeviceError::Execution {
                stage: ExecutionStage::Launch,
                ..
            }
        ));
        assert!(err.to_string().contains("vload3/vstore3"), "{err}");
    }

    #[test]
    fn lane_base_follows_access_mode() {
        let four = parse_kernel_source(FMAX4, "test_fmax4").expect("float4 kernel");
        assert_eq!(four.lane_base(5), Some(20));
        let three = parse_kernel_source(FMAX3, "test_fmax3").expect("vload3 kernel");
        assert_eq!(three.lane_base(5), Some(15));
        assert_eq!(four.lane_base(usize::MAX), None);
    }

    #[test]
    fn unbound_kernel_cannot_launch() {
        let mut device = HostDevice::new();
        let kernel = device.compile(FMAX4, "test_fmax4").expect("compile");
        let err = device.launch(&kernel, 1).expect_err("unbound");
        assert!(err.to_string().contains("unbound"), "{err}");
    }

    #[test]
    fn injected_faults_surface_as_typed_errors() {
        let mut device = HostDevice::with_faults(HostDeviceFaults {
            fail_compile: Some("test_fmax4".to_string()),
            max_buffers: Some(1),
            ..HostDeviceFaults::default()
        });
        let err = device.compile(FMAX4, "test_fmax4").expect_err("injected");
        assert_eq!(err.reason_code(), "device_compilation_failed");

        let _first = device.create_buffer(4).expect("first buffer");
        let err = device.create_buffer(4).expect_err("limit");
        assert_eq!(err.reason_code(), "device_allocation_failed");
    }

    #[test]
    fn corruption_flips_requested_elements_only() {
        let mut device = HostDevice::with_faults(HostDeviceFaults {
            corrupt_output: Some(OutputCorruption {
                entry: "test_fmax4".to_string(),
                indices: vec![5, 100],
            }),
            ..HostDeviceFaults::default()
        });
        let a = device.create_buffer(8).expect("a");
        let b = device.create_buffer(8).expect("b");
        let dst = device.create_buffer(8).expect("dst");
        device.write_buffer(&a, &[1.0; 8]).expect("upload a");
        let mut kernel = device.compile(FMAX4, "test_fmax4").expect("compile");
        device.bind_buffers(&mut kernel, &[&a, &b, &dst]).expect("bind");
        device.launch(&kernel, 2).expect("launch");
        let mut out = vec![0.0; 8];
        device.read_back(&dst, &mut out).expect("read");
        for (idx, value) in out.iter().enumerate() {
            if idx == 5 {
                assert_ne!(value.to_bits(), 1.0_f32.to_bits());
            } else {
                assert_eq!(*value, 1.0);
            }
        }
    }

    #[test]
    fn released_handles_are_tracked() {
        let mut device = HostDevice::new();
        let a = device.create_buffer(4).expect("a");
        let kernel = device.compile(FMAX4, "test_fmax4").expect("compile");
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.live_kernels(), 1);
        device.release_buffer(a);
        device.release_kernel(kernel);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_kernels(), 0);
    }
}
