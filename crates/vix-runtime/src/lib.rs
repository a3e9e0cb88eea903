#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use vix_dtype::{ScalarKind, VectorShape};

/// Outcome of the pre-flight guard that runs before any device resource is
/// acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Continue,
    Skip { extension: &'static str },
    Fail { reason: String },
}

impl GateDecision {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Skip { .. } => "skip",
            Self::Fail { .. } => "fail",
        }
    }

    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Human-readable line announcing a skipped scalar type.
#[must_use]
pub fn skip_message(kind: ScalarKind, extension: &str) -> String {
    format!(
        "Extension {extension} not supported; skipping {} tests.",
        kind.name()
    )
}

#[must_use]
pub fn gate_scalar_kind(kind: ScalarKind, available: impl Fn(&str) -> bool) -> GateDecision {
    match kind.required_extension() {
        Some(extension) if !available(extension) => GateDecision::Skip { extension },
        _ => GateDecision::Continue,
    }
}

/// Device pointer widths that have pre-compiled modules (`.spv32`, `.spv64`).
pub const SUPPORTED_ADDRESS_BITS: [u32; 2] = [32, 64];

/// Full pre-flight check for one case: the device must have modules for its
/// address width, then the scalar kind's extension must be present.
#[must_use]
pub fn gate_case(
    shape: VectorShape,
    address_bits: u32,
    available: impl Fn(&str) -> bool,
) -> GateDecision {
    if !SUPPORTED_ADDRESS_BITS.contains(&address_bits) {
        return GateDecision::Fail {
            reason: format!(
                "no IL module for {} on a {address_bits}-bit device",
                shape.kernel_name()
            ),
        };
    }
    gate_scalar_kind(shape.kind(), available)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionEvent {
    pub ts_millis: u128,
    pub case: String,
    pub decision: GateDecision,
    pub note: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EvidenceLedger {
    events: Vec<DecisionEvent>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: DecisionEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[DecisionEvent] {
        &self.events
    }

    #[must_use]
    pub fn last(&self) -> Option<&DecisionEvent> {
        self.events.last()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event.decision, GateDecision::Skip { .. }))
            .count()
    }
}

pub fn decide_and_record(
    ledger: &mut EvidenceLedger,
    shape: VectorShape,
    address_bits: u32,
    available: impl Fn(&str) -> bool,
) -> GateDecision {
    let decision = gate_case(shape, address_bits, available);
    let note = match &decision {
        GateDecision::Skip { extension } => skip_message(shape.kind(), extension),
        GateDecision::Continue => match shape.kind().required_extension() {
            Some(extension) => format!("{extension} available"),
            None => "no extension required".to_string(),
        },
        GateDecision::Fail { reason } => reason.clone(),
    };
    let ts_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    ledger.record(DecisionEvent {
        ts_millis,
        case: shape.kernel_name(),
        decision: decision.clone(),
        note,
    });
    decision
}
