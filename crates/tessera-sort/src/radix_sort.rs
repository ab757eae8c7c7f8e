//! The radix sort engine.

use crate::configs::{KEY_BITS, N_RADIX, SINGLE_PASS_THRESHOLD, SINGLE_SORT_WG_SIZE};
use crate::error::{Result, SortError};
use crate::launch::LaunchParams;
use crate::provisioning::{resolve_kernels, KernelRole, KernelSource, KernelSourceKind, KernelTable};
use crate::scan::{ScanAlgorithm, ScanEngine};
use std::mem::size_of;
use std::sync::Arc;
use tessera_gpu::{Device, DeviceBuffer, DeviceProperties, DevicePtr, KernelArg, Runtime, Stream};

/// Parallel key and value arrays of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyValueSoA {
    pub key: DevicePtr,
    pub value: DevicePtr,
}

/// Caller buffers of one sort, keys-only or key/value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Keys(DevicePtr),
    Pairs(KeyValueSoA),
}

impl Slot {
    fn key(self) -> DevicePtr {
        match self {
            Self::Keys(key) => key,
            Self::Pairs(pair) => pair.key,
        }
    }

    fn pointers(self) -> Vec<DevicePtr> {
        match self {
            Self::Keys(key) => vec![key],
            Self::Pairs(pair) => vec![pair.key, pair.value],
        }
    }

    /// Whether any array of `self` shares a byte with any array of `other`,
    /// every array holding `bytes` bytes.
    fn overlaps(self, other: Self, bytes: u64) -> bool {
        self.pointers().into_iter().any(|a| {
            other
                .pointers()
                .into_iter()
                .any(|b| a.0 < b.0.saturating_add(bytes) && b.0 < a.0.saturating_add(bytes))
        })
    }
}

/// Device radix sort for 32-bit keys, optionally carrying 32-bit values.
///
/// Kernels and launch geometry are resolved once at construction. Scratch
/// buffers are owned by the engine and reused by every sort, so one engine
/// serves one stream at a time.
pub struct RadixSort {
    runtime: Arc<dyn Runtime>,
    device: Device,
    properties: DeviceProperties,
    kernels: KernelTable,
    params: LaunchParams,
    histogram: DeviceBuffer<i32>,
    scan: ScanEngine,
}

impl RadixSort {
    /// Engine using the default kernel source and scan.
    pub fn new(runtime: Arc<dyn Runtime>, device: Device) -> Result<Self> {
        Self::builder(runtime, device).build()
    }

    pub fn builder(runtime: Arc<dyn Runtime>, device: Device) -> RadixSortBuilder {
        RadixSortBuilder::new(runtime, device)
    }

    /// Launch geometry chosen for the device.
    pub fn launch_params(&self) -> &LaunchParams {
        &self.params
    }

    /// Strategy the kernels were obtained with.
    pub fn kernel_source_kind(&self) -> KernelSourceKind {
        self.kernels.source()
    }

    pub fn scan_algorithm(&self) -> ScanAlgorithm {
        self.scan.algorithm()
    }

    pub fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn device_properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// Sort `n` keys from `src` into `dst` on bits `[start_bit, end_bit)`.
    ///
    /// The multi-pass path uses `src` as scratch, so its contents are
    /// unspecified afterwards.
    pub fn sort_keys(
        &mut self,
        src: DevicePtr,
        dst: DevicePtr,
        n: usize,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        self.sort(
            Slot::Keys(src),
            Slot::Keys(dst),
            n,
            start_bit,
            end_bit,
            stream,
        )
    }

    /// Sort `n` key/value pairs from `src` into `dst` by key bits
    /// `[start_bit, end_bit)`. Pairs with equal keys keep their order.
    pub fn sort_pairs(
        &mut self,
        src: KeyValueSoA,
        dst: KeyValueSoA,
        n: usize,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        self.sort(
            Slot::Pairs(src),
            Slot::Pairs(dst),
            n,
            start_bit,
            end_bit,
            stream,
        )
    }

    fn sort(
        &mut self,
        src: Slot,
        dst: Slot,
        n: usize,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if start_bit >= end_bit || end_bit > KEY_BITS {
            return Err(SortError::InvalidBitRange {
                start: start_bit,
                end: end_bit,
            });
        }
        let n32 = i32::try_from(n).map_err(|_| SortError::InputTooLarge(n))?;

        if (n32 as u32) < SINGLE_PASS_THRESHOLD {
            return self.sort_single_pass(src, dst, n32, start_bit, end_bit, stream);
        }

        if src.overlaps(dst, (n * size_of::<u32>()) as u64) {
            return Err(SortError::AliasedBuffers);
        }

        let slots = [src, dst];
        let mut active = 0;
        let items_per_block = self.params.items_per_block(n32 as u32) as i32;

        for bit in (start_bit..end_bit).step_by(N_RADIX as usize) {
            let pass_end = (bit + N_RADIX).min(end_bit);
            let from = slots[active];
            let to = slots[1 - active];

            self.count(from.key(), n32, items_per_block, bit, pass_end, stream)?;
            self.scan.run(
                self.runtime.as_ref(),
                &self.kernels,
                &self.params,
                &self.histogram,
                stream,
            )?;
            self.scatter(from, to, n32, items_per_block, bit, pass_end, stream)?;

            active = 1 - active;
        }

        // An even number of passes leaves the result in the source slot.
        if active == 0 {
            let bytes = n * size_of::<u32>();
            match (src, dst) {
                (Slot::Pairs(src), Slot::Pairs(dst)) => {
                    self.runtime
                        .copy_dtod_async(dst.key, src.key, bytes, stream)?;
                    self.runtime
                        .copy_dtod_async(dst.value, src.value, bytes, stream)?;
                }
                (src, dst) => {
                    self.runtime
                        .copy_dtod_async(dst.key(), src.key(), bytes, stream)?;
                }
            }
        }
        Ok(())
    }

    fn sort_single_pass(
        &self,
        src: Slot,
        dst: Slot,
        n: i32,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        let bits = [
            KernelArg::I32(n),
            KernelArg::from(start_bit),
            KernelArg::from(end_bit),
        ];
        let (role, mut args) = match (src, dst) {
            (Slot::Pairs(src), Slot::Pairs(dst)) => (
                KernelRole::SortSinglePassKv,
                vec![
                    KernelArg::Ptr(src.key),
                    KernelArg::Ptr(src.value),
                    KernelArg::Ptr(dst.key),
                    KernelArg::Ptr(dst.value),
                ],
            ),
            (src, dst) => (
                KernelRole::SortSinglePass,
                vec![KernelArg::Ptr(src.key()), KernelArg::Ptr(dst.key())],
            ),
        };
        args.extend(bits);
        self.runtime.launch_1d(
            self.kernels.get(role),
            SINGLE_SORT_WG_SIZE,
            SINGLE_SORT_WG_SIZE,
            &args,
            0,
            stream,
        )?;
        Ok(())
    }

    fn count(
        &self,
        keys: DevicePtr,
        n: i32,
        items_per_block: i32,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        let args = [
            KernelArg::Ptr(keys),
            KernelArg::Ptr(self.histogram.as_ptr()),
            KernelArg::I32(n),
            KernelArg::I32(items_per_block),
            KernelArg::from(start_bit),
            KernelArg::from(end_bit),
            KernelArg::from(self.params.count_blocks),
        ];
        self.runtime.launch_1d(
            self.kernels.get(KernelRole::Count),
            self.params.count_blocks * self.params.count_block_size,
            self.params.count_block_size,
            &args,
            0,
            stream,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn scatter(
        &self,
        from: Slot,
        to: Slot,
        n: i32,
        items_per_block: i32,
        start_bit: u32,
        end_bit: u32,
        stream: Stream,
    ) -> Result<()> {
        let (role, mut args) = match (from, to) {
            (Slot::Pairs(from), Slot::Pairs(to)) => (
                KernelRole::SortKv,
                vec![
                    KernelArg::Ptr(from.key),
                    KernelArg::Ptr(from.value),
                    KernelArg::Ptr(to.key),
                    KernelArg::Ptr(to.value),
                ],
            ),
            (from, to) => (
                KernelRole::Sort,
                vec![KernelArg::Ptr(from.key()), KernelArg::Ptr(to.key())],
            ),
        };
        args.extend([
            KernelArg::Ptr(self.histogram.as_ptr()),
            KernelArg::I32(n),
            KernelArg::I32(items_per_block),
            KernelArg::from(start_bit),
            KernelArg::from(end_bit),
            KernelArg::from(self.params.count_blocks),
        ]);
        self.runtime.launch_1d(
            self.kernels.get(role),
            self.params.count_blocks * self.params.sort_block_size,
            self.params.sort_block_size,
            &args,
            0,
            stream,
        )?;
        Ok(())
    }
}

/// Builder for a [`RadixSort`].
pub struct RadixSortBuilder {
    runtime: Arc<dyn Runtime>,
    device: Device,
    kernel_source: KernelSource,
    scan_algorithm: ScanAlgorithm,
    log_kernels: bool,
    stream: Stream,
}

impl RadixSortBuilder {
    pub fn new(runtime: Arc<dyn Runtime>, device: Device) -> Self {
        Self {
            runtime,
            device,
            kernel_source: KernelSource::default(),
            scan_algorithm: ScanAlgorithm::default(),
            log_kernels: false,
            stream: Stream::DEFAULT,
        }
    }

    /// Set how the kernels are obtained.
    pub fn kernel_source(mut self, source: KernelSource) -> Self {
        self.kernel_source = source;
        self
    }

    /// Set the histogram scan.
    pub fn scan_algorithm(mut self, algorithm: ScanAlgorithm) -> Self {
        self.scan_algorithm = algorithm;
        self
    }

    /// Log the resource footprint of every kernel once resolved.
    pub fn log_kernels(mut self, enable: bool) -> Self {
        self.log_kernels = enable;
        self
    }

    /// Stream the scratch buffers are allocated on.
    pub fn stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    /// Resolve kernels, compute the launch geometry and allocate scratch.
    pub fn build(self) -> Result<RadixSort> {
        let properties = self.runtime.device_properties(self.device)?;
        let sizes = self.kernel_source.block_sizes(&properties)?;
        let params = LaunchParams::compute(&properties, sizes);

        tracing::info!(
            "Configuring radix sort on {} ({:?} kernels, {:?} scan)",
            properties.name,
            self.kernel_source.kind(),
            self.scan_algorithm
        );

        let kernels = resolve_kernels(
            self.runtime.as_ref(),
            self.device,
            &properties,
            &self.kernel_source,
            &params,
            self.log_kernels,
        )?;

        let mut histogram = DeviceBuffer::new(Arc::clone(&self.runtime));
        histogram.resize_async(params.histogram_len(), false, self.stream)?;
        let scan = ScanEngine::new(
            Arc::clone(&self.runtime),
            self.scan_algorithm,
            &params,
            self.stream,
        )?;

        tracing::info!(
            "Radix sort ready: {} count blocks of {}, {} scan blocks of {}",
            params.count_blocks,
            params.count_block_size,
            params.scan_blocks,
            params.scan_block_size
        );

        Ok(RadixSort {
            runtime: self.runtime,
            device: self.device,
            properties,
            kernels,
            params,
            histogram,
            scan,
        })
    }
}
