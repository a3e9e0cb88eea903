#![forbid(unsafe_code)]

//! One `vector_<type><width>_insert` instantiation from gate to verdict.
//!
//! A case walks `Init -> Gated -> Compiled -> ReferenceBuilt -> Trial(k)...`
//! and ends in exactly one of pass, skip or fail. The first fault of any kind
//! is terminal; nothing is retried. Buffers acquired by a case are released
//! before it returns, whatever the outcome.

use half::f16;
use serde::Serialize;
use std::time::Instant;
use vix_device::{AccessMode, BufferHandle, ComputeDevice, KernelArg, KernelHandle};
use vix_dtype::{Lane, ScalarKind, VectorShape, encode_lanes};
use vix_random::DeterministicRng;
use vix_runtime::{EvidenceLedger, GateDecision, decide_and_record, skip_message};

use crate::artifacts::sha256_hex;
use crate::logging::{log_error, log_info};
use crate::oracle::{ReferenceSet, build_reference_seeded, generate_inputs};
use crate::trial::{DeviceBindings, InsertFailure, TrialRecord, resource, run_trials};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStage {
    Init,
    Gated,
    Compiled,
    ReferenceBuilt,
    Trial(usize),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Pass {
        trials: usize,
    },
    Skip {
        extension: &'static str,
        message: String,
    },
    Fail(InsertFailure),
}

impl CaseOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "pass",
            Self::Skip { .. } => "skip",
            Self::Fail(_) => "fail",
        }
    }

    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&InsertFailure> {
        match self {
            Self::Fail(failure) => Some(failure),
            _ => None,
        }
    }

    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "insert_pass",
            Self::Skip { .. } => "insert_extension_unavailable",
            Self::Fail(failure) => failure.reason_code(),
        }
    }
}

/// Size and seed of one case's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseParams {
    pub num_elements: usize,
    pub seed: u64,
}

/// Everything a finished case knows about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRun {
    pub shape: VectorShape,
    pub device_name: String,
    pub seed: u64,
    pub num_elements: usize,
    /// Last stage entered before the verdict.
    pub stage: CaseStage,
    pub outcome: CaseOutcome,
    pub trials: Vec<TrialRecord>,
    pub input_sha256: Option<String>,
    pub reference_sha256: Option<String>,
    pub elapsed_ms: u128,
}

impl CaseRun {
    #[must_use]
    pub fn case_name(&self) -> String {
        self.shape.kernel_name()
    }
}

/// Runs `shape` with inputs and reference drawn from `params.seed`.
///
/// Input and reference generators both start from the run seed, each in its
/// own stream state.
pub fn run_insert_case<D>(
    device: &mut D,
    shape: VectorShape,
    params: CaseParams,
    ledger: &mut EvidenceLedger,
) -> CaseRun
where
    D: ComputeDevice + ?Sized,
{
    match shape.kind() {
        ScalarKind::Char => run_seeded::<D, i8>(device, shape, params, ledger),
        ScalarKind::Int => run_seeded::<D, i32>(device, shape, params, ledger),
        ScalarKind::Long => run_seeded::<D, i64>(device, shape, params, ledger),
        ScalarKind::Half => run_seeded::<D, f16>(device, shape, params, ledger),
        ScalarKind::Float => run_seeded::<D, f32>(device, shape, params, ledger),
        ScalarKind::Double => run_seeded::<D, f64>(device, shape, params, ledger),
    }
}

fn run_seeded<D, T>(
    device: &mut D,
    shape: VectorShape,
    params: CaseParams,
    ledger: &mut EvidenceLedger,
) -> CaseRun
where
    D: ComputeDevice + ?Sized,
    T: Lane,
{
    let inputs: Vec<T> = generate_inputs(
        &mut DeterministicRng::new(params.seed),
        params.num_elements,
    );
    run_insert_case_with_data(device, shape, params.seed, inputs, ledger, |inputs, width| {
        build_reference_seeded(inputs, width, &mut DeterministicRng::new(params.seed))
    })
}

/// Runs `shape` over explicit `inputs`; `build_reference` is called after the
/// kernel compiles, with the inputs and the vector width.
pub fn run_insert_case_with_data<D, T>(
    device: &mut D,
    shape: VectorShape,
    seed: u64,
    inputs: Vec<T>,
    ledger: &mut EvidenceLedger,
    build_reference: impl FnOnce(&[T], usize) -> ReferenceSet<T>,
) -> CaseRun
where
    D: ComputeDevice + ?Sized,
    T: Lane,
{
    let started = Instant::now();
    let mut run = CaseRun {
        shape,
        device_name: device.device_name(),
        seed,
        num_elements: inputs.len(),
        stage: CaseStage::Init,
        outcome: CaseOutcome::Pass { trials: 0 },
        trials: Vec::new(),
        input_sha256: None,
        reference_sha256: None,
        elapsed_ms: 0,
    };
    run.outcome = match drive(device, &mut run, &inputs, ledger, build_reference) {
        Ok(outcome) => outcome,
        Err(failure) => {
            log_error(&format!("{}: {failure}", shape.kernel_name()));
            CaseOutcome::Fail(failure)
        }
    };
    run.elapsed_ms = started.elapsed().as_millis();
    run
}

fn drive<D, T>(
    device: &mut D,
    run: &mut CaseRun,
    inputs: &[T],
    ledger: &mut EvidenceLedger,
    build_reference: impl FnOnce(&[T], usize) -> ReferenceSet<T>,
) -> Result<CaseOutcome, InsertFailure>
where
    D: ComputeDevice + ?Sized,
    T: Lane,
{
    let shape = run.shape;
    if T::KIND != shape.kind() {
        return Err(InsertFailure::Layout(format!(
            "{} lanes cannot drive {}",
            T::KIND,
            shape.kernel_name()
        )));
    }
    if inputs.is_empty() {
        return Err(InsertFailure::Layout("no input elements".to_string()));
    }
    let input_bytes = encode_lanes(inputs);
    run.input_sha256 = Some(sha256_hex(&input_bytes));

    let decision = decide_and_record(ledger, shape, device.address_bits(), |extension| {
        device.extension_available(extension)
    });
    run.stage = CaseStage::Gated;
    match decision {
        GateDecision::Continue => {}
        GateDecision::Skip { extension } => {
            let message = skip_message(shape.kind(), extension);
            log_info(&message);
            return Ok(CaseOutcome::Skip { extension, message });
        }
        GateDecision::Fail { reason } => return Err(InsertFailure::Gate { reason }),
    }

    let name = shape.kernel_name();
    let program = device
        .compile_kernel(&name)
        .map_err(resource("compile_kernel"))?;
    let kernel = device
        .create_kernel(program, &name)
        .map_err(resource("create_kernel"))?;
    run.stage = CaseStage::Compiled;

    let reference = build_reference(inputs, shape.width());
    if reference.width() != shape.width() {
        return Err(InsertFailure::Layout(format!(
            "reference width {} does not match {}",
            reference.width(),
            shape.kernel_name()
        )));
    }
    if reference.len() != inputs.len() {
        return Err(InsertFailure::Layout(format!(
            "reference holds {} records for {} inputs",
            reference.len(),
            inputs.len()
        )));
    }
    run.reference_sha256 = Some(sha256_hex(&encode_lanes(reference.lanes())));
    run.stage = CaseStage::ReferenceBuilt;

    let mut acquired = Vec::with_capacity(2);
    let result = with_buffers(
        device,
        &mut acquired,
        run,
        kernel,
        &input_bytes,
        inputs,
        &reference,
    );
    for buffer in acquired {
        if let Err(err) = device.release_buffer(buffer) {
            log_error(&format!("{name}: releasing {buffer} failed: {err}"));
        }
    }
    result
}

fn with_buffers<D, T>(
    device: &mut D,
    acquired: &mut Vec<BufferHandle>,
    run: &mut CaseRun,
    kernel: KernelHandle,
    input_bytes: &[u8],
    inputs: &[T],
    reference: &ReferenceSet<T>,
) -> Result<CaseOutcome, InsertFailure>
where
    D: ComputeDevice + ?Sized,
    T: Lane,
{
    let output_bytes = inputs.len() * run.shape.vector_bytes();
    let input = device
        .allocate_buffer(input_bytes.len(), AccessMode::ReadOnly)
        .map_err(resource("allocate_buffer"))?;
    acquired.push(input);
    let output = device
        .allocate_buffer(output_bytes, AccessMode::ReadWrite)
        .map_err(resource("allocate_buffer"))?;
    acquired.push(output);

    device
        .write_buffer(input, 0, input_bytes)
        .map_err(resource("write_buffer"))?;
    device
        .bind_argument(kernel, 0, KernelArg::Buffer(input))
        .map_err(resource("bind_argument"))?;
    device
        .bind_argument(kernel, 1, KernelArg::Buffer(output))
        .map_err(resource("bind_argument"))?;

    let bindings = DeviceBindings {
        kernel,
        input,
        output,
    };
    let stage = &mut run.stage;
    let trials = &mut run.trials;
    run_trials(device, &bindings, inputs, reference, |record| {
        *stage = CaseStage::Trial(record.lane_index);
        trials.push(*record);
    })?;
    run.stage = CaseStage::Done;
    Ok(CaseOutcome::Pass {
        trials: run.trials.len(),
    })
}
