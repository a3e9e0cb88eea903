#![forbid(unsafe_code)]

//! Device capability contract consumed by the vector insert harness.
//!
//! The harness never talks to a driver directly. It compiles, allocates,
//! transfers and dispatches through [`ComputeDevice`], so a real runtime and
//! the host-memory [`HostDevice`] are interchangeable. Every call is
//! synchronous: when it returns, the device work it describes is complete.

mod host;
mod il;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub use host::{DeviceStats, HostDevice, HostKernel, InsertKernel, KernelLaunch};
pub use il::{IlModule, IlModuleStore, SPIRV_MAGIC, validate_spirv_header};

macro_rules! handle {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle!(ProgramHandle, "program");
handle!(KernelHandle, "kernel");
handle!(BufferHandle, "buffer");

/// How kernels may touch a buffer. Host transfers are always allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    #[must_use]
    pub const fn kernel_writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(BufferHandle),
    Int(i32),
}

impl KernelArg {
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Int(_) => "int",
        }
    }
}

pub const DEVICE_REASON_CODES: [&str; 16] = [
    "device_program_not_found",
    "device_module_io_failed",
    "device_module_invalid",
    "device_kernel_not_found",
    "device_program_unknown",
    "device_kernel_unknown",
    "device_buffer_unknown",
    "device_buffer_size_invalid",
    "device_allocation_too_large",
    "device_transfer_out_of_range",
    "device_arg_index_invalid",
    "device_arg_missing",
    "device_arg_type_mismatch",
    "device_read_only_violation",
    "device_global_size_invalid",
    "device_lane_index_invalid",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no IL module for `{name}` at {}", path.display())]
    ProgramNotFound { name: String, path: PathBuf },
    #[error("failed reading IL module {}: {message}", path.display())]
    ModuleIo { path: PathBuf, message: String },
    #[error("IL module `{name}` is invalid: {reason}")]
    InvalidModule { name: String, reason: &'static str },
    #[error("kernel entry point `{0}` not found")]
    KernelNotFound(String),
    #[error("{0} does not exist")]
    UnknownProgram(ProgramHandle),
    #[error("{0} does not exist")]
    UnknownKernel(KernelHandle),
    #[error("{0} does not exist")]
    UnknownBuffer(BufferHandle),
    #[error("buffer size must be > 0")]
    InvalidBufferSize,
    #[error("allocation of {requested} bytes exceeds device limit {limit}")]
    AllocationTooLarge { requested: usize, limit: usize },
    #[error("transfer range [{offset}..{}] exceeds capacity {capacity}", offset + len)]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("argument index {index} exceeds kernel arity {arity}")]
    InvalidArgIndex { index: u32, arity: u32 },
    #[error("kernel argument {0} was never bound")]
    MissingArgument(u32),
    #[error("kernel argument {index} must be a {expected}, got a {actual}")]
    ArgumentType {
        index: u32,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("kernel wrote to read-only {0}")]
    ReadOnlyViolation(BufferHandle),
    #[error("global work size must be > 0")]
    InvalidGlobalSize,
    #[error("lane index {lane} is outside vector width {width}")]
    InvalidLaneIndex { lane: i64, width: usize },
}

impl DeviceError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::ProgramNotFound { .. } => "device_program_not_found",
            Self::ModuleIo { .. } => "device_module_io_failed",
            Self::InvalidModule { .. } => "device_module_invalid",
            Self::KernelNotFound(_) => "device_kernel_not_found",
            Self::UnknownProgram(_) => "device_program_unknown",
            Self::UnknownKernel(_) => "device_kernel_unknown",
            Self::UnknownBuffer(_) => "device_buffer_unknown",
            Self::InvalidBufferSize => "device_buffer_size_invalid",
            Self::AllocationTooLarge { .. } => "device_allocation_too_large",
            Self::OutOfRange { .. } => "device_transfer_out_of_range",
            Self::InvalidArgIndex { .. } => "device_arg_index_invalid",
            Self::MissingArgument(_) => "device_arg_missing",
            Self::ArgumentType { .. } => "device_arg_type_mismatch",
            Self::ReadOnlyViolation(_) => "device_read_only_violation",
            Self::InvalidGlobalSize => "device_global_size_invalid",
            Self::InvalidLaneIndex { .. } => "device_lane_index_invalid",
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Synchronous compute device: program compilation, buffers, argument
/// binding and one-dimensional dispatch.
pub trait ComputeDevice {
    fn device_name(&self) -> String;

    fn extension_available(&self, extension: &str) -> bool;

    /// Pointer width of the device, which selects `.spv32` or `.spv64` modules.
    fn address_bits(&self) -> u32 {
        64
    }

    /// Compiles the IL module registered under `name`.
    fn compile_kernel(&mut self, name: &str) -> DeviceResult<ProgramHandle>;

    fn create_kernel(&mut self, program: ProgramHandle, name: &str) -> DeviceResult<KernelHandle>;

    fn allocate_buffer(
        &mut self,
        size_bytes: usize,
        access: AccessMode,
    ) -> DeviceResult<BufferHandle>;

    /// Blocking host-to-device copy of `data` at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8])
    -> DeviceResult<()>;

    /// Blocking device-to-host copy filling `out` from `offset`.
    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [u8],
    ) -> DeviceResult<()>;

    fn bind_argument(&mut self, kernel: KernelHandle, index: u32, arg: KernelArg)
    -> DeviceResult<()>;

    /// Runs `kernel` over `global_size` work items and waits for completion.
    fn dispatch(&mut self, kernel: KernelHandle, global_size: usize) -> DeviceResult<()>;

    fn release_buffer(&mut self, buffer: BufferHandle) -> DeviceResult<()>;
}
