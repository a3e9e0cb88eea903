use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use vix_dtype::{FP16_EXTENSION, FP64_EXTENSION, VectorShape};

use crate::il::IlModuleStore;
use crate::{
    AccessMode, BufferHandle, ComputeDevice, DeviceError, DeviceResult, KernelArg, KernelHandle,
    ProgramHandle,
};

/// Call counters for a [`HostDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub compiles: u64,
    pub kernels_created: u64,
    pub allocations: u64,
    pub releases: u64,
    pub writes: u64,
    pub reads: u64,
    pub arguments_bound: u64,
    pub dispatches: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

#[derive(Debug)]
struct HostBuffer {
    access: AccessMode,
    bytes: Vec<u8>,
}

struct HostProgram {
    name: String,
}

struct HostKernelInstance {
    name: String,
    behavior: Arc<dyn HostKernel>,
    args: BTreeMap<u32, KernelArg>,
}

/// Kernel body executed on the host when a [`HostDevice`] dispatches.
pub trait HostKernel: Send + Sync {
    fn arity(&self) -> u32;

    fn execute(&self, launch: &mut KernelLaunch<'_>) -> DeviceResult<()>;
}

/// View of one dispatch handed to a [`HostKernel`]: bound arguments plus the
/// device's buffer table.
pub struct KernelLaunch<'a> {
    global_size: usize,
    args: &'a BTreeMap<u32, KernelArg>,
    buffers: &'a mut HashMap<BufferHandle, HostBuffer>,
}

impl KernelLaunch<'_> {
    #[must_use]
    pub const fn global_size(&self) -> usize {
        self.global_size
    }

    fn arg(&self, index: u32) -> DeviceResult<KernelArg> {
        self.args
            .get(&index)
            .copied()
            .ok_or(DeviceError::MissingArgument(index))
    }

    pub fn int_arg(&self, index: u32) -> DeviceResult<i32> {
        match self.arg(index)? {
            KernelArg::Int(value) => Ok(value),
            other => Err(DeviceError::ArgumentType {
                index,
                expected: "int",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn buffer_arg(&self, index: u32) -> DeviceResult<BufferHandle> {
        match self.arg(index)? {
            KernelArg::Buffer(handle) => Ok(handle),
            other => Err(DeviceError::ArgumentType {
                index,
                expected: "buffer",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn buffer_len(&self, buffer: BufferHandle) -> DeviceResult<usize> {
        self.buffers
            .get(&buffer)
            .map(|buf| buf.bytes.len())
            .ok_or(DeviceError::UnknownBuffer(buffer))
    }

    /// Runs `body` with `src` readable and `dst` writable.
    ///
    /// When both handles name the same buffer, `body` sees a snapshot of it
    /// as `src`.
    pub fn read_write(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        body: impl FnOnce(&[u8], &mut [u8]) -> DeviceResult<()>,
    ) -> DeviceResult<()> {
        let mut target = self
            .buffers
            .remove(&dst)
            .ok_or(DeviceError::UnknownBuffer(dst))?;
        let outcome = if !target.access.kernel_writable() {
            Err(DeviceError::ReadOnlyViolation(dst))
        } else if src == dst {
            let snapshot = target.bytes.clone();
            body(&snapshot, &mut target.bytes)
        } else {
            match self.buffers.get(&src) {
                Some(source) => body(&source.bytes, &mut target.bytes),
                None => Err(DeviceError::UnknownBuffer(src)),
            }
        };
        self.buffers.insert(dst, target);
        outcome
    }
}

/// Built-in body for every `vector_<type><width>_insert` entry point.
///
/// Arguments: `0` input scalars, `1` output vectors, `2` lane index. Work
/// item `i` copies input scalar `i` into lane `arg2` of output vector `i`
/// and leaves the other lanes untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertKernel {
    shape: VectorShape,
}

impl InsertKernel {
    #[must_use]
    pub const fn new(shape: VectorShape) -> Self {
        Self { shape }
    }

    #[must_use]
    pub const fn shape(&self) -> VectorShape {
        self.shape
    }
}

impl HostKernel for InsertKernel {
    fn arity(&self) -> u32 {
        3
    }

    fn execute(&self, launch: &mut KernelLaunch<'_>) -> DeviceResult<()> {
        let input = launch.buffer_arg(0)?;
        let output = launch.buffer_arg(1)?;
        let lane = launch.int_arg(2)?;
        let width = self.shape.width();
        let lane = usize::try_from(lane)
            .ok()
            .filter(|lane| *lane < width)
            .ok_or(DeviceError::InvalidLaneIndex {
                lane: i64::from(lane),
                width,
            })?;

        let global = launch.global_size();
        let item = self.shape.kind().item_size();
        let stride = self.shape.vector_bytes();
        launch.read_write(input, output, |src, dst| {
            if src.len() < global * item {
                return Err(DeviceError::OutOfRange {
                    offset: 0,
                    len: global * item,
                    capacity: src.len(),
                });
            }
            if dst.len() < global * stride {
                return Err(DeviceError::OutOfRange {
                    offset: 0,
                    len: global * stride,
                    capacity: dst.len(),
                });
            }
            for (scalar, vector) in src
                .chunks_exact(item)
                .zip(dst.chunks_exact_mut(stride))
                .take(global)
            {
                vector[lane * item..(lane + 1) * item].copy_from_slice(scalar);
            }
            Ok(())
        })
    }
}

/// Device that keeps buffers in host memory and runs kernels as Rust code.
///
/// Entry points resolve first against kernels registered with
/// [`HostDevice::with_kernel`], then against the insert family by name.
pub struct HostDevice {
    name: String,
    extensions: BTreeSet<String>,
    address_bits: u32,
    max_allocation: Option<usize>,
    modules: Option<IlModuleStore>,
    registered: HashMap<String, Arc<dyn HostKernel>>,
    programs: HashMap<ProgramHandle, HostProgram>,
    kernels: HashMap<KernelHandle, HostKernelInstance>,
    buffers: HashMap<BufferHandle, HostBuffer>,
    next_handle: u64,
    stats: DeviceStats,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDevice")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .field("address_bits", &self.address_bits)
            .field("live_buffers", &self.buffers.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl HostDevice {
    /// A 64-bit host device advertising half and double precision.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "vix host device".to_string(),
            extensions: [FP16_EXTENSION, FP64_EXTENSION]
                .into_iter()
                .map(str::to_string)
                .collect(),
            address_bits: 64,
            max_allocation: None,
            modules: None,
            registered: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            buffers: HashMap::new(),
            next_handle: 1,
            stats: DeviceStats::default(),
        }
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn without_extension(mut self, extension: &str) -> Self {
        self.extensions.remove(extension);
        self
    }

    #[must_use]
    pub const fn with_address_bits(mut self, bits: u32) -> Self {
        self.address_bits = bits;
        self
    }

    /// Caps a single allocation, like a device's maximum allocation size.
    #[must_use]
    pub const fn with_max_allocation(mut self, bytes: usize) -> Self {
        self.max_allocation = Some(bytes);
        self
    }

    /// Requires every compiled program to exist as a valid module in `store`.
    #[must_use]
    pub fn with_module_store(mut self, store: IlModuleStore) -> Self {
        self.modules = Some(store);
        self
    }

    #[must_use]
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: impl HostKernel + 'static) -> Self {
        self.registered.insert(name.into(), Arc::new(kernel));
        self
    }

    #[must_use]
    pub const fn stats(&self) -> DeviceStats {
        self.stats
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Bound arguments of a kernel, for inspection.
    #[must_use]
    pub fn kernel_args(&self, kernel: KernelHandle) -> Option<&BTreeMap<u32, KernelArg>> {
        self.kernels.get(&kernel).map(|instance| &instance.args)
    }

    fn next(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn resolve_kernel(&self, name: &str) -> DeviceResult<Arc<dyn HostKernel>> {
        if let Some(kernel) = self.registered.get(name) {
            return Ok(Arc::clone(kernel));
        }
        VectorShape::parse_kernel_name(name)
            .map(|shape| Arc::new(InsertKernel::new(shape)) as Arc<dyn HostKernel>)
            .map_err(|_| DeviceError::KernelNotFound(name.to_string()))
    }

    fn buffer(&self, handle: BufferHandle) -> DeviceResult<&HostBuffer> {
        self.buffers
            .get(&handle)
            .ok_or(DeviceError::UnknownBuffer(handle))
    }
}

fn check_range(offset: usize, len: usize, capacity: usize) -> DeviceResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(DeviceError::OutOfRange {
            offset,
            len,
            capacity,
        }),
    }
}

impl ComputeDevice for HostDevice {
    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn extension_available(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }

    fn address_bits(&self) -> u32 {
        self.address_bits
    }

    fn compile_kernel(&mut self, name: &str) -> DeviceResult<ProgramHandle> {
        self.stats.compiles += 1;
        if let Some(store) = &self.modules {
            store.load(name, self.address_bits)?;
        }
        let handle = ProgramHandle(self.next());
        self.programs.insert(
            handle,
            HostProgram {
                name: name.to_string(),
            },
        );
        Ok(handle)
    }

    fn create_kernel(&mut self, program: ProgramHandle, name: &str) -> DeviceResult<KernelHandle> {
        let program_name = self
            .programs
            .get(&program)
            .map(|p| p.name.clone())
            .ok_or(DeviceError::UnknownProgram(program))?;
        // Each insert module exports exactly one entry point named after it.
        if program_name != name && !self.registered.contains_key(name) {
            return Err(DeviceError::KernelNotFound(name.to_string()));
        }
        let behavior = self.resolve_kernel(name)?;
        self.stats.kernels_created += 1;
        let handle = KernelHandle(self.next());
        self.kernels.insert(
            handle,
            HostKernelInstance {
                name: name.to_string(),
                behavior,
                args: BTreeMap::new(),
            },
        );
        Ok(handle)
    }

    fn allocate_buffer(
        &mut self,
        size_bytes: usize,
        access: AccessMode,
    ) -> DeviceResult<BufferHandle> {
        if size_bytes == 0 {
            return Err(DeviceError::InvalidBufferSize);
        }
        if let Some(limit) = self.max_allocation
            && size_bytes > limit
        {
            return Err(DeviceError::AllocationTooLarge {
                requested: size_bytes,
                limit,
            });
        }
        self.stats.allocations += 1;
        let handle = BufferHandle(self.next());
        self.buffers.insert(
            handle,
            HostBuffer {
                access,
                bytes: vec![0u8; size_bytes],
            },
        );
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> DeviceResult<()> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        check_range(offset, data.len(), target.bytes.len())?;
        target.bytes[offset..offset + data.len()].copy_from_slice(data);
        self.stats.writes += 1;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: usize,
        out: &mut [u8],
    ) -> DeviceResult<()> {
        let source = self.buffer(buffer)?;
        check_range(offset, out.len(), source.bytes.len())?;
        out.copy_from_slice(&source.bytes[offset..offset + out.len()]);
        self.stats.reads += 1;
        self.stats.bytes_read += out.len() as u64;
        Ok(())
    }

    fn bind_argument(
        &mut self,
        kernel: KernelHandle,
        index: u32,
        arg: KernelArg,
    ) -> DeviceResult<()> {
        if let KernelArg::Buffer(handle) = arg {
            self.buffer(handle)?;
        }
        let instance = self
            .kernels
            .get_mut(&kernel)
            .ok_or(DeviceError::UnknownKernel(kernel))?;
        let arity = instance.behavior.arity();
        if index >= arity {
            return Err(DeviceError::InvalidArgIndex { index, arity });
        }
        instance.args.insert(index, arg);
        self.stats.arguments_bound += 1;
        Ok(())
    }

    fn dispatch(&mut self, kernel: KernelHandle, global_size: usize) -> DeviceResult<()> {
        if global_size == 0 {
            return Err(DeviceError::InvalidGlobalSize);
        }
        let instance = self
            .kernels
            .get(&kernel)
            .ok_or(DeviceError::UnknownKernel(kernel))?;
        if let Some(missing) = (0..instance.behavior.arity()).find(|i| !instance.args.contains_key(i))
        {
            return Err(DeviceError::MissingArgument(missing));
        }
        let behavior = Arc::clone(&instance.behavior);
        let mut launch = KernelLaunch {
            global_size,
            args: &instance.args,
            buffers: &mut self.buffers,
        };
        behavior.execute(&mut launch)?;
        self.stats.dispatches += 1;
        Ok(())
    }

    fn release_buffer(&mut self, buffer: BufferHandle) -> DeviceResult<()> {
        self.buffers
            .remove(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        self.stats.releases += 1;
        Ok(())
    }
}

impl HostDevice {
    /// Entry-point name a kernel handle was created for.
    #[must_use]
    pub fn kernel_name(&self, kernel: KernelHandle) -> Option<&str> {
        self.kernels.get(&kernel).map(|k| k.name.as_str())
    }
}
