#![forbid(unsafe_code)]

pub mod catalog;
pub mod fmax_suite;
pub mod verifier;

use crate::catalog::variant_catalog;
use crate::fmax_suite::{
    DEFAULT_WORK_ITEMS, FmaxRunConfig, MAX_WORK_ITEMS, run_fmax_conformance,
};
use fcl_device::{HostDevice, device_fmax};
use fcl_random::DEFAULT_RNG_SEED;
use fcl_reference::fmax_reference;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const FMAX_REASON_CODES: [&str; 5] = [
    "fmax_variant_passed",
    "fmax_allocation_failed",
    "fmax_compilation_failed",
    "fmax_execution_failed",
    "fmax_verification_mismatch",
];

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub report_root: PathBuf,
    pub seed: u64,
    pub work_items: usize,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            report_root: repo_root.join("artifacts/reports"),
            seed: DEFAULT_RNG_SEED,
            work_items: DEFAULT_WORK_ITEMS,
        }
    }

    /// `default_paths()` overlaid with `FCL_RANDOM_SEED` and `FCL_WORK_ITEMS`.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self::default_paths();
        if let Some(raw) = std::env::var_os("FCL_RANDOM_SEED") {
            let raw = raw.to_string_lossy();
            cfg.seed = parse_seed(&raw).map_err(|err| format!("FCL_RANDOM_SEED: {err}"))?;
        }
        if let Some(raw) = std::env::var_os("FCL_WORK_ITEMS") {
            let raw = raw.to_string_lossy();
            cfg.work_items =
                parse_work_items(&raw).map_err(|err| format!("FCL_WORK_ITEMS: {err}"))?;
        }
        Ok(cfg)
    }

    #[must_use]
    pub fn fmax_run_config(&self) -> FmaxRunConfig {
        FmaxRunConfig {
            seed: self.seed,
            work_items: self.work_items,
            ..FmaxRunConfig::default()
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

/// Accepts decimal or `0x`-prefixed hex.
pub fn parse_seed(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid seed '{trimmed}': {err}"))
}

pub fn parse_work_items(raw: &str) -> Result<usize, String> {
    let trimmed = raw.trim();
    match trimmed.parse::<usize>() {
        Ok(0) => Err("work item count must be > 0".to_string()),
        Ok(value) if value > MAX_WORK_ITEMS => Err(format!(
            "work item count {value} exceeds the limit of {MAX_WORK_ITEMS}"
        )),
        Ok(value) => Ok(value),
        Err(err) => Err(format!("invalid work item count '{trimmed}': {err}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub variant_count: usize,
    pub work_items: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

/// One JSON line per executed variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FmaxLogEntry {
    pub suite: &'static str,
    pub fixture_id: String,
    pub seed: u64,
    pub mode: String,
    pub env_fingerprint: String,
    pub artifact_refs: Vec<String>,
    pub reason_code: String,
    pub vector_width: usize,
    pub entry_name: String,
    pub element_count: usize,
    pub passed: bool,
    pub detail: Option<String>,
}

impl FmaxLogEntry {
    #[must_use]
    pub fn is_replay_complete(&self) -> bool {
        !self.fixture_id.trim().is_empty()
            && !self.mode.trim().is_empty()
            && !self.env_fingerprint.trim().is_empty()
            && !self.reason_code.trim().is_empty()
            && !self.artifact_refs.is_empty()
            && self
                .artifact_refs
                .iter()
                .all(|artifact| !artifact.trim().is_empty())
    }
}

static FMAX_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

pub fn set_fmax_log_path(path: Option<PathBuf>) {
    let cell = FMAX_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

pub(crate) fn maybe_append_fmax_log(entry: &FmaxLogEntry) -> Result<(), String> {
    let configured = FMAX_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os("FCL_FMAX_LOG_PATH").map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing fmax log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending fmax log {}: {err}", path.display()))
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = fs::read_dir(&config.fixture_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .count();

    HarnessReport {
        suite: "smoke",
        fixture_count,
        variant_count: variant_catalog().len(),
        work_items: config.work_items,
    }
}

#[derive(Debug, Deserialize)]
struct FmaxReferenceCase {
    id: String,
    lhs: String,
    rhs: String,
    expected: String,
    #[serde(default)]
    reason_code: String,
}

fn load_fmax_reference_cases(fixture_root: &Path) -> Result<Vec<FmaxReferenceCase>, String> {
    let path = fixture_root.join("fmax_reference_cases.json");
    let raw = fs::read_to_string(&path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("invalid json: {err}"))
}

fn parse_bits(case_id: &str, raw: &str) -> Result<u32, String> {
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("{case_id}: bit pattern '{raw}' must start with 0x"))?;
    u32::from_str_radix(hex, 16)
        .map_err(|err| format!("{case_id}: invalid bit pattern '{raw}': {err}"))
}

/// Hand-picked operand pairs checked against the host reference and the
/// emulated device arithmetic, bit for bit.
pub fn run_fmax_reference_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let cases = load_fmax_reference_cases(&config.fixture_root)?;

    let mut report = SuiteReport {
        suite: "fmax_reference",
        case_count: cases.len(),
        pass_count: 0,
        failures: Vec::new(),
    };

    for case in cases {
        let lhs = f32::from_bits(parse_bits(&case.id, &case.lhs)?);
        let rhs = f32::from_bits(parse_bits(&case.id, &case.rhs)?);
        let expected = parse_bits(&case.id, &case.expected)?;

        let reference = fmax_reference(lhs, rhs).to_bits();
        let device = device_fmax(lhs, rhs).to_bits();
        if reference == expected && device == expected {
            report.pass_count += 1;
        } else {
            let reason = if case.reason_code.trim().is_empty() {
                "unspecified"
            } else {
                case.reason_code.trim()
            };
            report.failures.push(format!(
                "{} ({reason}): expected={expected:#010x} reference={reference:#010x} device={device:#010x}",
                case.id
            ));
        }
    }

    Ok(report)
}

/// Full orchestrated run against [`HostDevice`].
pub fn run_fmax_device_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let run_config = config.fmax_run_config();
    let mut device = HostDevice::new();
    let report = run_fmax_conformance(&mut device, &run_config)?;
    if device.live_buffers() != 0 || device.live_kernels() != 0 {
        return Err(format!(
            "device resources leaked: buffers={} kernels={}",
            device.live_buffers(),
            device.live_kernels()
        ));
    }
    Ok(report.to_suite_report())
}

pub fn run_all_core_suites(config: &HarnessConfig) -> Result<Vec<SuiteReport>, String> {
    Ok(vec![
        run_fmax_reference_suite(config)?,
        run_fmax_device_suite(config)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::{
        FMAX_REASON_CODES, FmaxLogEntry, HarnessConfig, parse_seed, parse_work_items,
        run_all_core_suites, run_fmax_device_suite, run_fmax_reference_suite, run_smoke,
        set_fmax_log_path,
    };
    use crate::fmax_suite::FmaxFailure;
    use crate::verifier::MismatchInfo;
    use serde_json::Value;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn smoke_harness_finds_fixtures() {
        let cfg = HarnessConfig::default_paths();
        let report = run_smoke(&cfg);
        assert_eq!(report.suite, "smoke");
        assert!(report.fixture_count >= 1, "expected at least one fixture");
        assert_eq!(report.variant_count, 6);
    }

    #[test]
    fn reference_fixture_suite_passes() {
        let cfg = HarnessConfig::default_paths();
        let suite = run_fmax_reference_suite(&cfg).expect("reference suite should run");
        assert!(suite.case_count >= 10);
        assert!(suite.all_passed(), "failures={:?}", suite.failures);
    }

    #[test]
    fn device_suite_passes_on_host_device() {
        let mut cfg = HarnessConfig::default_paths();
        cfg.work_items = 64;
        let suite = run_fmax_device_suite(&cfg).expect("device suite should run");
        assert_eq!(suite.case_count, 6);
        assert!(suite.all_passed(), "failures={:?}", suite.failures);
    }

    #[test]
    fn core_suites_cover_reference_and_device() {
        let mut cfg = HarnessConfig::default_paths();
        cfg.work_items = 32;
        let suites = run_all_core_suites(&cfg).expect("core suites should execute");
        let names: Vec<&str> = suites.iter().map(|suite| suite.suite).collect();
        assert_eq!(names, ["fmax_reference", "fmax_vector_widths"]);
    }

    #[test]
    fn seed_and_work_item_parsing() {
        assert_eq!(parse_seed("42"), Ok(42));
        assert_eq!(parse_seed(" 0xC0DE_CAFE "), Ok(0xC0DE_CAFE));
        assert!(parse_seed("seed").is_err());
        assert_eq!(parse_work_items("128"), Ok(128));
        assert!(parse_work_items("0").is_err());
        assert!(parse_work_items("-4").is_err());
        assert!(parse_work_items(&(usize::MAX / 32).to_string()).is_err());
    }

    #[test]
    fn failure_reason_codes_are_registered() {
        let mismatch = MismatchInfo {
            index: 0,
            element_count: 1,
            group: 0,
            lane: 0,
            expected_bits: 0,
            actual_bits: 1,
            lhs_bits: 0,
            rhs_bits: 0,
        };
        let failures = [
            FmaxFailure::Allocation {
                detail: String::new(),
            },
            FmaxFailure::Compilation {
                vector_width: 4,
                entry: "test_fmax4".to_string(),
                detail: String::new(),
            },
            FmaxFailure::Execution {
                vector_width: None,
                detail: String::new(),
            },
            FmaxFailure::VerificationMismatch {
                vector_width: 1,
                mismatch,
            },
        ];
        for failure in &failures {
            assert!(
                FMAX_REASON_CODES.contains(&failure.reason_code()),
                "{} is not registered",
                failure.reason_code()
            );
        }
    }

    #[test]
    fn replay_completeness_requires_every_field() {
        let entry = FmaxLogEntry {
            suite: "fmax_vector_widths",
            fixture_id: "fmax_float_float".to_string(),
            seed: 1,
            mode: "strict".to_string(),
            env_fingerprint: "linux-x86_64".to_string(),
            artifact_refs: vec!["crates/fcl-conformance/src/catalog.rs#test_fmax".to_string()],
            reason_code: "fmax_variant_passed".to_string(),
            vector_width: 1,
            entry_name: "test_fmax".to_string(),
            element_count: 16,
            passed: true,
            detail: None,
        };
        assert!(entry.is_replay_complete());

        let mut missing_refs = entry.clone();
        missing_refs.artifact_refs.clear();
        assert!(!missing_refs.is_replay_complete());

        let mut blank_env = entry;
        blank_env.env_fingerprint = "  ".to_string();
        assert!(!blank_env.is_replay_complete());
    }

    #[test]
    fn device_suite_emits_structured_logs_with_required_fields() {
        let mut cfg = HarnessConfig::default_paths();
        let ts_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        // Unique seed so lines from concurrently running tests can be told apart.
        cfg.seed = 0x5EED_0000_0000 ^ u64::from(std::process::id());
        cfg.work_items = 16;
        let log_path = std::env::temp_dir().join(format!(
            "fcl_fmax_suite_{}_{}.jsonl",
            std::process::id(),
            ts_nanos
        ));
        let _ = fs::remove_file(&log_path);
        set_fmax_log_path(Some(log_path.clone()));

        let suite = run_fmax_device_suite(&cfg).expect("device suite should run");
        assert!(suite.all_passed(), "failures={:?}", suite.failures);

        let raw = fs::read_to_string(&log_path).expect("fmax log should exist");
        let mut widths = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            let value: Value = serde_json::from_str(line).expect("log line must be valid json");
            let obj = value.as_object().expect("log line must be json object");
            if obj.get("seed").and_then(Value::as_u64) != Some(cfg.seed) {
                continue;
            }
            assert!(
                obj.get("fixture_id")
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.starts_with("fmax_float"))
            );
            assert_eq!(obj.get("mode").and_then(Value::as_str), Some("strict"));
            assert!(
                obj.get("env_fingerprint")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.trim().is_empty())
            );
            assert!(
                obj.get("artifact_refs")
                    .and_then(Value::as_array)
                    .is_some_and(|refs| !refs.is_empty())
            );
            assert_eq!(
                obj.get("reason_code").and_then(Value::as_str),
                Some("fmax_variant_passed")
            );
            assert_eq!(obj.get("passed").and_then(Value::as_bool), Some(true));
            let width = obj
                .get("vector_width")
                .and_then(Value::as_u64)
                .expect("vector_width");
            assert_eq!(
                obj.get("element_count").and_then(Value::as_u64),
                Some(16 * width)
            );
            widths.push(width);
        }
        assert_eq!(widths, [1, 2, 4, 8, 16, 3]);
        set_fmax_log_path(None);
        let _ = fs::remove_file(log_path);
    }
}
