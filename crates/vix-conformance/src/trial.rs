#![forbid(unsafe_code)]

use serde::Serialize;
use thiserror::Error;
use vix_device::{BufferHandle, ComputeDevice, DeviceError, KernelArg, KernelHandle};
use vix_dtype::{Lane, ShapeError, decode_lanes_into, encode_lanes};

use crate::oracle::{ReferenceSet, expected_lane, first_mismatch};

pub const INSERT_REASON_CODES: [&str; 4] = [
    "insert_resource_failure",
    "insert_lane_mismatch",
    "insert_gate_rejected",
    "insert_layout_invalid",
];

/// Why an insert case stopped short of `pass`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsertFailure {
    #[error("{operation} failed: {source}")]
    Resource {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("Values do not match at location {element} for vector position {lane_index}")]
    Mismatch {
        element: usize,
        lane_index: usize,
        lane: usize,
        expected: String,
        observed: String,
        expected_record: Vec<u8>,
        observed_record: Vec<u8>,
    },
    #[error("gate rejected case: {reason}")]
    Gate { reason: String },
    #[error("inconsistent case layout: {0}")]
    Layout(String),
}

impl InsertFailure {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Resource { .. } => "insert_resource_failure",
            Self::Mismatch { .. } => "insert_lane_mismatch",
            Self::Gate { .. } => "insert_gate_rejected",
            Self::Layout(_) => "insert_layout_invalid",
        }
    }

    /// `(element, insertion index)` of a correctness failure.
    #[must_use]
    pub const fn mismatch_location(&self) -> Option<(usize, usize)> {
        match self {
            Self::Mismatch {
                element,
                lane_index,
                ..
            } => Some((*element, *lane_index)),
            _ => None,
        }
    }
}

impl From<ShapeError> for InsertFailure {
    fn from(err: ShapeError) -> Self {
        Self::Layout(err.to_string())
    }
}

/// Maps a device error onto the operation that raised it.
pub(crate) fn resource(operation: &'static str) -> impl FnOnce(DeviceError) -> InsertFailure {
    move |source| InsertFailure::Resource { operation, source }
}

/// Device objects one case owns for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBindings {
    pub kernel: KernelHandle,
    pub input: BufferHandle,
    pub output: BufferHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialRecord {
    pub lane_index: usize,
    pub elements_checked: usize,
    pub passed: bool,
}

/// Runs one trial per insertion index, ascending, and stops at the first
/// failure of any kind.
///
/// Each trial resets the output region to the reference, binds the lane index
/// as argument 2, dispatches one work item per element, reads the region
/// back and compares every lane. Resetting first means a kernel that skips
/// the write leaves a reference value behind, which differs from the input.
pub fn run_trials<D, T>(
    device: &mut D,
    bindings: &DeviceBindings,
    inputs: &[T],
    reference: &ReferenceSet<T>,
    mut on_trial: impl FnMut(&TrialRecord),
) -> Result<Vec<TrialRecord>, InsertFailure>
where
    D: ComputeDevice + ?Sized,
    T: Lane,
{
    if reference.len() != inputs.len() {
        return Err(InsertFailure::Layout(format!(
            "{} inputs but {} reference records",
            inputs.len(),
            reference.len()
        )));
    }

    let width = reference.width();
    let reference_bytes = encode_lanes(reference.lanes());
    let mut observed_bytes = vec![0u8; reference_bytes.len()];
    let mut observed = reference.lanes().to_vec();
    let mut records = Vec::with_capacity(width);

    for lane_index in 0..width {
        device
            .write_buffer(bindings.output, 0, &reference_bytes)
            .map_err(resource("write_buffer"))?;
        let lane_arg = i32::try_from(lane_index)
            .map_err(|_| InsertFailure::Layout(format!("lane index {lane_index} exceeds i32")))?;
        device
            .bind_argument(bindings.kernel, 2, KernelArg::Int(lane_arg))
            .map_err(resource("bind_argument"))?;
        device
            .dispatch(bindings.kernel, inputs.len())
            .map_err(resource("dispatch"))?;
        device
            .read_buffer(bindings.output, 0, &mut observed_bytes)
            .map_err(resource("read_buffer"))?;
        decode_lanes_into(&observed_bytes, &mut observed)?;

        let comparison = first_mismatch(reference, inputs, lane_index, &observed);
        let record = TrialRecord {
            lane_index,
            elements_checked: comparison.elements_checked,
            passed: comparison.mismatch.is_none(),
        };
        on_trial(&record);
        records.push(record);

        if let Some(mismatch) = comparison.mismatch {
            let element = mismatch.element;
            let expected_record: Vec<T> = (0..width)
                .map(|lane| expected_lane(reference, inputs, element, lane, lane_index))
                .collect();
            let observed_record = &observed[element * width..(element + 1) * width];
            return Err(InsertFailure::Mismatch {
                element,
                lane_index,
                lane: mismatch.lane,
                expected: mismatch.expected.render(),
                observed: mismatch.observed.render(),
                expected_record: encode_lanes(&expected_record),
                observed_record: encode_lanes(observed_record),
            });
        }
    }

    Ok(records)
}
