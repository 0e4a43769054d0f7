use std::path::Path;

use fcl_conformance::fmax_suite::{FmaxRunConfig, RunState, run_fmax_conformance};
use fcl_conformance::{HarnessConfig, run_all_core_suites, run_smoke};
use fcl_device::{HostDevice, HostDeviceFaults, OutputCorruption};

#[test]
fn smoke_report_is_stable() {
    let cfg = HarnessConfig::default_paths();
    let report = run_smoke(&cfg);
    assert_eq!(report.suite, "smoke");
    assert!(report.fixture_count >= 1);
    assert_eq!(report.variant_count, 6);

    let fixture_path = cfg.fixture_root.join("fmax_reference_cases.json");
    assert!(Path::new(&fixture_path).exists());
}

#[test]
fn core_conformance_suites_pass() {
    let mut cfg = HarnessConfig::default_paths();
    cfg.work_items = 128;
    let suites = run_all_core_suites(&cfg).expect("core suites should execute");

    for suite in suites {
        assert!(
            suite.all_passed(),
            "suite {} failed with {:?}",
            suite.suite,
            suite.failures
        );
    }
}

#[test]
fn default_run_prints_one_passing_line_per_width() {
    let mut device = HostDevice::new();
    let report =
        run_fmax_conformance(&mut device, &FmaxRunConfig::default()).expect("default run");
    let lines: Vec<String> = report
        .variants
        .iter()
        .map(|outcome| outcome.summary_line())
        .collect();
    assert_eq!(
        lines,
        [
            "FMAX float,float test passed",
            "FMAX float2,float test passed",
            "FMAX float4,float test passed",
            "FMAX float8,float test passed",
            "FMAX float16,float test passed",
            "FMAX float3,float test passed",
        ]
    );
    assert_eq!(report.element_count, 1024 * 16);
    assert_eq!(report.input_sha256.len(), 64);
}

#[test]
fn mismatch_on_one_width_fails_the_whole_run() {
    let mut device = HostDevice::with_faults(HostDeviceFaults {
        corrupt_output: Some(OutputCorruption {
            entry: "test_fmax16".to_string(),
            indices: vec![1000],
        }),
        ..HostDeviceFaults::default()
    });
    let config = FmaxRunConfig {
        work_items: 100,
        ..FmaxRunConfig::default()
    };
    let report = run_fmax_conformance(&mut device, &config).expect("run");
    assert!(!report.passed());
    assert_eq!(report.status, "fail");
    assert_eq!(report.variants.len(), 5);
    assert_eq!(report.transitions.last(), Some(&RunState::Finalized));
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_kernels(), 0);
}
