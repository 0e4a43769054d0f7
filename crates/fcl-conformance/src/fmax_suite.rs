#![forbid(unsafe_code)]

use crate::catalog::{VariantDescriptor, element_count_for, variant_catalog};
use crate::verifier::{MismatchInfo, VerifyError, verify};
use crate::{FmaxLogEntry, SuiteReport, maybe_append_fmax_log};
use fcl_device::{DeviceAdapter, DeviceError};
use fcl_random::{DEFAULT_RNG_SEED, FloatRange, InputPair, TestVectorGenerator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const FMAX_SUITE: &str = "fmax_vector_widths";
pub const DEFAULT_WORK_ITEMS: usize = 1024;
/// Upper bound on the launch size; no buffer of a run exceeds 64 Mi floats.
pub const MAX_WORK_ITEMS: usize = 1 << 22;
pub const RUN_REPORT_SCHEMA_VERSION: u8 = 1;
/// Quiet NaN with a recognizable payload, written over the output buffer
/// before every launch.
pub const POISON_BITS: u32 = 0x7fc0_dead;

#[derive(Debug, Clone, PartialEq)]
pub struct FmaxRunConfig {
    pub seed: u64,
    pub work_items: usize,
    pub range: FloatRange,
    pub poison_output: bool,
    pub env_fingerprint: String,
}

impl Default for FmaxRunConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_RNG_SEED,
            work_items: DEFAULT_WORK_ITEMS,
            range: FloatRange::default(),
            poison_output: true,
            env_fingerprint: default_env_fingerprint(),
        }
    }
}

impl FmaxRunConfig {
    pub fn element_count(&self) -> Result<usize, String> {
        if self.work_items == 0 {
            return Err("work_items must be > 0".to_string());
        }
        if self.work_items > MAX_WORK_ITEMS {
            return Err(format!(
                "work_items={} exceeds the limit of {MAX_WORK_ITEMS}",
                self.work_items
            ));
        }
        element_count_for(self.work_items)
            .ok_or_else(|| format!("work_items={} overflows buffer sizing", self.work_items))
    }
}

#[must_use]
pub fn default_env_fingerprint() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    BuffersAllocated,
    DataUploaded,
    Compiled { vector_width: usize },
    Launched { vector_width: usize },
    ReadBack { vector_width: usize },
    Verified { vector_width: usize },
    Failed,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FmaxFailure {
    Allocation {
        detail: String,
    },
    Compilation {
        vector_width: usize,
        entry: String,
        detail: String,
    },
    Execution {
        vector_width: Option<usize>,
        detail: String,
    },
    VerificationMismatch {
        vector_width: usize,
        mismatch: MismatchInfo,
    },
}

impl FmaxFailure {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Allocation { .. } => "fmax_allocation_failed",
            Self::Compilation { .. } => "fmax_compilation_failed",
            Self::Execution { .. } => "fmax_execution_failed",
            Self::VerificationMismatch { .. } => "fmax_verification_mismatch",
        }
    }

    fn from_device(err: DeviceError, descriptor: Option<&VariantDescriptor>) -> Self {
        let vector_width = descriptor.map(|d| d.vector_width);
        match err {
            DeviceError::Allocation { .. } => Self::Allocation {
                detail: err.to_string(),
            },
            DeviceError::Compilation { ref entry, .. } => Self::Compilation {
                vector_width: vector_width.unwrap_or_default(),
                entry: entry.clone(),
                detail: err.to_string(),
            },
            DeviceError::Execution { .. } => Self::Execution {
                vector_width,
                detail: err.to_string(),
            },
        }
    }

    fn from_verify(err: VerifyError, vector_width: usize) -> Self {
        match err {
            VerifyError::Mismatch(mismatch) => Self::VerificationMismatch {
                vector_width,
                mismatch,
            },
            other => Self::Execution {
                vector_width: Some(vector_width),
                detail: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for FmaxFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allocation { detail } => write!(f, "allocation failed: {detail}"),
            Self::Compilation {
                vector_width,
                detail,
                ..
            } => write!(f, "float{vector_width} compilation failed: {detail}"),
            Self::Execution {
                vector_width: Some(width),
                detail,
            } => write!(f, "float{width} execution failed: {detail}"),
            Self::Execution {
                vector_width: None,
                detail,
            } => write!(f, "execution failed: {detail}"),
            Self::VerificationMismatch {
                vector_width,
                mismatch,
            } => write!(f, "float{vector_width} verification failed: {mismatch}"),
        }
    }
}

impl std::error::Error for FmaxFailure {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOutcome {
    pub vector_width: usize,
    pub entry_name: String,
    pub element_count: usize,
    pub passed: bool,
    pub reason_code: String,
    pub detail: Option<String>,
}

impl VariantOutcome {
    /// `FMAX float4,float test passed`
    #[must_use]
    pub fn summary_line(&self) -> String {
        let ty = if self.vector_width == 1 {
            "float".to_string()
        } else {
            format!("float{}", self.vector_width)
        };
        let verdict = if self.passed { "passed" } else { "failed" };
        format!("FMAX {ty},float test {verdict}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmaxRunReport {
    pub schema_version: u8,
    pub suite: String,
    pub device: String,
    pub seed: u64,
    pub work_items: usize,
    pub element_count: usize,
    pub input_sha256: String,
    pub status: String,
    pub variants: Vec<VariantOutcome>,
    pub failure: Option<FmaxFailure>,
    pub transitions: Vec<RunState>,
}

impl FmaxRunReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.variants.len() == variant_catalog().len()
    }

    #[must_use]
    pub fn to_suite_report(&self) -> SuiteReport {
        let mut failures: Vec<String> = self
            .variants
            .iter()
            .filter(|outcome| !outcome.passed)
            .map(|outcome| {
                format!(
                    "{}: {}",
                    outcome.summary_line(),
                    outcome.detail.as_deref().unwrap_or("no detail")
                )
            })
            .collect();
        if failures.is_empty() {
            if let Some(failure) = &self.failure {
                failures.push(failure.to_string());
            }
        }
        SuiteReport {
            suite: FMAX_SUITE,
            case_count: variant_catalog().len(),
            pass_count: self.variants.iter().filter(|outcome| outcome.passed).count(),
            failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferSlot(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VariantSlot(usize);

struct CompiledVariant<K> {
    descriptor: &'static VariantDescriptor,
    kernel: K,
}

/// Device resources of one run.
///
/// Buffers and compiled variants live in indexed arenas owned by the
/// session and are all released when it drops, whichever way the run ends.
pub struct DeviceSession<'a, D: DeviceAdapter> {
    device: &'a mut D,
    buffers: Vec<D::Buffer>,
    variants: Vec<CompiledVariant<D::Kernel>>,
}

impl<'a, D: DeviceAdapter> DeviceSession<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self {
            device,
            buffers: Vec::new(),
            variants: Vec::new(),
        }
    }

    fn allocate(&mut self, len: usize) -> Result<BufferSlot, DeviceError> {
        let buffer = self.device.create_buffer(len)?;
        self.buffers.push(buffer);
        Ok(BufferSlot(self.buffers.len() - 1))
    }

    fn upload(&mut self, slot: BufferSlot, data: &[f32]) -> Result<(), DeviceError> {
        self.device.write_buffer(&self.buffers[slot.0], data)
    }

    fn read_back(&mut self, slot: BufferSlot, out: &mut [f32]) -> Result<(), DeviceError> {
        self.device.read_back(&self.buffers[slot.0], out)
    }

    fn compile(
        &mut self,
        descriptor: &'static VariantDescriptor,
    ) -> Result<VariantSlot, DeviceError> {
        let kernel = self
            .device
            .compile(descriptor.kernel_source, descriptor.entry_name)?;
        self.variants.push(CompiledVariant { descriptor, kernel });
        Ok(VariantSlot(self.variants.len() - 1))
    }

    fn bind(&mut self, variant: VariantSlot, slots: &[BufferSlot]) -> Result<(), DeviceError> {
        let buffers: Vec<&D::Buffer> = slots.iter().map(|slot| &self.buffers[slot.0]).collect();
        self.device
            .bind_buffers(&mut self.variants[variant.0].kernel, &buffers)
    }

    fn launch(&mut self, variant: VariantSlot, global_size: usize) -> Result<(), DeviceError> {
        self.device
            .launch(&self.variants[variant.0].kernel, global_size)
    }

    fn descriptor(&self, variant: VariantSlot) -> &'static VariantDescriptor {
        self.variants[variant.0].descriptor
    }
}

impl<D: DeviceAdapter> Drop for DeviceSession<'_, D> {
    fn drop(&mut self) {
        for variant in self.variants.drain(..) {
            self.device.release_kernel(variant.kernel);
        }
        for buffer in self.buffers.drain(..) {
            self.device.release_buffer(buffer);
        }
    }
}

struct RunBuffers {
    input_a: BufferSlot,
    input_b: BufferSlot,
    output: BufferSlot,
}

/// Runs every catalog variant against `device` in order.
///
/// Device and verification failures end the run early and are recorded in
/// the returned report; `Err` is reserved for invalid configuration and
/// structured-log I/O failures.
pub fn run_fmax_conformance<D: DeviceAdapter>(
    device: &mut D,
    config: &FmaxRunConfig,
) -> Result<FmaxRunReport, String> {
    let element_count = config.element_count()?;
    let inputs = TestVectorGenerator::new(config.seed, config.range).generate(element_count);

    let mut report = FmaxRunReport {
        schema_version: RUN_REPORT_SCHEMA_VERSION,
        suite: FMAX_SUITE.to_string(),
        device: device.device_name(),
        seed: config.seed,
        work_items: config.work_items,
        element_count,
        input_sha256: inputs.sha256_hex(),
        status: "fail".to_string(),
        variants: Vec::new(),
        failure: None,
        transitions: vec![RunState::Init],
    };

    let outcome = {
        let mut session = DeviceSession::new(device);
        drive_variants(&mut session, config, &inputs, &mut report)
    };

    if let Some(failure) = outcome? {
        report.transitions.push(RunState::Failed);
        report.failure = Some(failure);
    }
    report.transitions.push(RunState::Finalized);
    if report.passed() {
        report.status = "pass".to_string();
    }
    Ok(report)
}

fn drive_variants<D: DeviceAdapter>(
    session: &mut DeviceSession<'_, D>,
    config: &FmaxRunConfig,
    inputs: &InputPair,
    report: &mut FmaxRunReport,
) -> Result<Option<FmaxFailure>, String> {
    let buffers = match prepare_buffers(session, inputs, report) {
        Ok(buffers) => buffers,
        Err(err) => return Ok(Some(FmaxFailure::from_device(err, None))),
    };

    let poison = config
        .poison_output
        .then(|| vec![f32::from_bits(POISON_BITS); inputs.len()]);
    let mut output = vec![0.0_f32; inputs.len()];

    for descriptor in variant_catalog() {
        let verdict = run_variant(
            session,
            &buffers,
            descriptor,
            config,
            inputs,
            poison.as_deref(),
            &mut output,
            report,
        );
        let outcome = variant_outcome(descriptor, config.work_items, verdict.as_ref().err());
        maybe_append_fmax_log(&log_entry(config, descriptor, &outcome))?;
        report.variants.push(outcome);
        if let Err(failure) = verdict {
            return Ok(Some(failure));
        }
    }
    Ok(None)
}

fn prepare_buffers<D: DeviceAdapter>(
    session: &mut DeviceSession<'_, D>,
    inputs: &InputPair,
    report: &mut FmaxRunReport,
) -> Result<RunBuffers, DeviceError> {
    let len = inputs.len();
    let buffers = RunBuffers {
        input_a: session.allocate(len)?,
        input_b: session.allocate(len)?,
        output: session.allocate(len)?,
    };
    report.transitions.push(RunState::BuffersAllocated);

    session.upload(buffers.input_a, &inputs.a)?;
    session.upload(buffers.input_b, &inputs.b)?;
    report.transitions.push(RunState::DataUploaded);
    Ok(buffers)
}

#[allow(clippy::too_many_arguments)]
fn run_variant<D: DeviceAdapter>(
    session: &mut DeviceSession<'_, D>,
    buffers: &RunBuffers,
    descriptor: &'static VariantDescriptor,
    config: &FmaxRunConfig,
    inputs: &InputPair,
    poison: Option<&[f32]>,
    output: &mut [f32],
    report: &mut FmaxRunReport,
) -> Result<(), FmaxFailure> {
    let vector_width = descriptor.vector_width;
    let device_err = |err| FmaxFailure::from_device(err, Some(descriptor));

    let variant = session.compile(descriptor).map_err(device_err)?;
    session
        .bind(variant, &[buffers.input_a, buffers.input_b, buffers.output])
        .map_err(device_err)?;
    report.transitions.push(RunState::Compiled { vector_width });

    if let Some(poison) = poison {
        session.upload(buffers.output, poison).map_err(device_err)?;
    }
    session
        .launch(variant, config.work_items)
        .map_err(device_err)?;
    report.transitions.push(RunState::Launched { vector_width });

    session
        .read_back(buffers.output, output)
        .map_err(device_err)?;
    report.transitions.push(RunState::ReadBack { vector_width });

    let n = session
        .descriptor(variant)
        .verified_elements(config.work_items)
        .ok_or_else(|| FmaxFailure::Execution {
            vector_width: Some(vector_width),
            detail: "verified element count overflows".to_string(),
        })?;
    verify(&inputs.a, &inputs.b, output, n, vector_width)
        .map_err(|err| FmaxFailure::from_verify(err, vector_width))?;
    report.transitions.push(RunState::Verified { vector_width });
    Ok(())
}

fn variant_outcome(
    descriptor: &VariantDescriptor,
    work_items: usize,
    failure: Option<&FmaxFailure>,
) -> VariantOutcome {
    VariantOutcome {
        vector_width: descriptor.vector_width,
        entry_name: descriptor.entry_name.to_string(),
        element_count: descriptor.verified_elements(work_items).unwrap_or(0),
        passed: failure.is_none(),
        reason_code: failure
            .map_or("fmax_variant_passed", FmaxFailure::reason_code)
            .to_string(),
        detail: failure.map(ToString::to_string),
    }
}

fn log_entry(
    config: &FmaxRunConfig,
    descriptor: &VariantDescriptor,
    outcome: &VariantOutcome,
) -> FmaxLogEntry {
    FmaxLogEntry {
        suite: FMAX_SUITE,
        fixture_id: descriptor.fixture_id(),
        seed: config.seed,
        mode: "strict".to_string(),
        env_fingerprint: config.env_fingerprint.clone(),
        artifact_refs: vec![format!(
            "crates/fcl-conformance/src/catalog.rs#{}",
            descriptor.entry_name
        )],
        reason_code: outcome.reason_code.clone(),
        vector_width: outcome.vector_width,
        entry_name: outcome.entry_name.clone(),
        element_count: outcome.element_count,
        passed: outcome.passed,
        detail: outcome.detail.clone(),
    }
}

pub fn write_run_report(path: &Path, report: &FmaxRunReport) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let raw = serde_json::to_string_pretty(report)
        .map_err(|err| format!("failed to serialize fmax run report: {err}"))?;
    fs::write(path, raw).map_err(|err| format!("failed writing {}: {err}", path.display()))
}

pub fn load_run_report(path: &Path) -> Result<FmaxRunReport, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|err| format!("invalid fmax run report {}: {err}", path.display()))
}
