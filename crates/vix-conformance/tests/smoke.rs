use vix_conformance::{HarnessConfig, run_vector_insert_suite};
use vix_device::HostDevice;
use vix_dtype::INSERT_CASES;

fn small_config() -> HarnessConfig {
    HarnessConfig {
        num_elements: 257,
        ..HarnessConfig::default_paths()
    }
}

#[test]
fn every_insert_case_passes_on_the_host_device() {
    let report = run_vector_insert_suite(&small_config(), &INSERT_CASES, |_| HostDevice::new())
        .expect("suite should execute");
    assert!(report.all_passed(), "failures: {:?}", report.failures);
    assert_eq!(report.case_count, 6);
    assert_eq!(report.pass_count, 6);
    assert_eq!(report.ledger.events().len(), 6);

    let names: Vec<&str> = report.cases.iter().map(|case| case.case.as_str()).collect();
    assert_eq!(
        names,
        [
            "vector_half8_insert",
            "vector_int4_insert",
            "vector_float4_insert",
            "vector_long2_insert",
            "vector_double2_insert",
            "vector_char16_insert",
        ]
    );
    for (case, shape) in report.cases.iter().zip(INSERT_CASES) {
        assert_eq!(case.trials, shape.width(), "{}", case.case);
    }
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let sequential = run_vector_insert_suite(&small_config(), &INSERT_CASES, |_| HostDevice::new())
        .expect("sequential suite");
    let parallel_config = HarnessConfig {
        parallel: true,
        ..small_config()
    };
    let parallel = run_vector_insert_suite(&parallel_config, &INSERT_CASES, |_| HostDevice::new())
        .expect("parallel suite");

    assert!(parallel.all_passed());
    for (a, b) in sequential.cases.iter().zip(&parallel.cases) {
        assert_eq!(a.case, b.case);
        assert_eq!(a.input_sha256, b.input_sha256);
        assert_eq!(a.reference_sha256, b.reference_sha256);
    }
}
