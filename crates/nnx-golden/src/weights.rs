//! Weight memory layout codecs
//!
//! Each accelerator fetches weights from its weight memory in a fixed bit
//! order. A [`WeightLayout`] turns a canonical `(Cout, Cin, H, W)` tensor of
//! unsigned `bits`-wide weights into exactly that byte stream, and back.
//!
//! All variants share the same skeleton: input channels are split into
//! subtiles of `cin_subtile` (zero-padded), each weight is unrolled LSB-first
//! into bit planes, and every `(Cout, CinMajor)` pair owns one contiguous
//! block of bits. The variants differ only in block size and in where a
//! `(plane, spatial, cin_minor)` bit lands inside its block:
//!
//! | Variant | Kernel | Block bits | Offset of (plane, spatial, minor) |
//! |---------|--------|-----------|-----------------------------------|
//! | NE16 | any | `bits·HW·16` | `(plane·HW + spatial)·16 + minor` |
//! | Neureka | 3×3 | `bits·256` | `plane·256 + spatial·28 + minor` |
//! | Neureka | 1×1 | `256` | `(minor/4)·32 + plane·4 + minor%4` |
//! | Neureka v2 | any | `bits·HW·32` | `(plane·HW + spatial)·32 + minor` |
//!
//! Bits are packed into bytes LSB-first.

use crate::error::{NnxError, Result};
use crate::integer::IntegerType;
use crate::shapes::KernelShape;
use crate::tensor::Tensor;
use crate::testcase::TestCase;
use bytes::Bytes;
use nnx_chip::layout::{
    cin_subtile, NE16_CIN_SUBTILE, NEUREKA_1X1_LANE, NEUREKA_1X1_PLANES, NEUREKA_CIN_SUBTILE_3X3,
    NEUREKA_V2_CIN_SUBTILE, NEUREKA_WEIGHT_BANDWIDTH,
};
use nnx_chip::{Accelerator, WeightMemory};
use std::fmt;
use std::path::Path;

/// Smallest weight bit width the codecs accept
pub const MIN_WEIGHT_BITS: u32 = 2;

/// Largest weight bit width the codecs accept
pub const MAX_WEIGHT_BITS: u32 = 8;

/// Dimensions of a canonical weight tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightDims {
    /// Output channels
    pub cout: usize,
    /// Input channels per group
    pub cin: usize,
    /// Kernel extent
    pub kernel: KernelShape,
}

impl WeightDims {
    /// Read rank-4 `(Cout, Cin, H, W)` dimensions
    ///
    /// # Errors
    ///
    /// Returns a shape error for any other rank.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match *dims {
            [cout, cin, height, width] => Ok(Self {
                cout,
                cin,
                kernel: KernelShape { height, width },
            }),
            _ => Err(NnxError::shape(format!(
                "weight must be rank 4 (Cout, Cin, H, W), got {} dimension(s)",
                dims.len()
            ))),
        }
    }

    /// As a `(Cout, Cin, H, W)` array
    pub const fn to_array(self) -> [usize; 4] {
        [self.cout, self.cin, self.kernel.height, self.kernel.width]
    }

    /// Cout and Cin exchanged, the view depthwise weights are coded in
    #[must_use]
    pub const fn swapped(self) -> Self {
        Self {
            cout: self.cin,
            cin: self.cout,
            kernel: self.kernel,
        }
    }

    /// Element count
    pub const fn len(self) -> usize {
        self.cout * self.cin * self.kernel.area()
    }

    /// Whether any dimension is zero
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for WeightDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.cout, self.cin, self.kernel.height, self.kernel.width
        )
    }
}

/// Bit-level weight layout of one accelerator variant
///
/// Implementors only describe where bits go; encoding, decoding and length
/// computation are shared.
pub trait WeightLayout: fmt::Debug + Send + Sync {
    /// Variant this layout belongs to
    fn accelerator(&self) -> Accelerator;

    /// Bits owned by one `(Cout, CinMajor)` block
    fn block_bits(&self, kernel: KernelShape, bits: u32) -> usize;

    /// Position of a `(plane, spatial, minor)` bit inside its block
    fn bit_offset(&self, kernel: KernelShape, plane: usize, spatial: usize, minor: usize) -> usize;

    /// Input channels per subtile for `kernel`
    fn cin_subtile(&self, kernel: KernelShape) -> usize {
        cin_subtile(self.accelerator(), kernel.height)
    }

    /// Weight-memory destinations this variant can fetch from
    fn supported_wmem(&self) -> &'static [WeightMemory] {
        self.accelerator().limits().weight_memories
    }

    /// Fail unless `wmem` is supported
    ///
    /// # Errors
    ///
    /// Returns [`NnxError::UnsupportedWeightMemory`] listing the valid ones.
    fn check_wmem(&self, wmem: WeightMemory) -> Result<()> {
        let supported = self.supported_wmem();
        if supported.contains(&wmem) {
            Ok(())
        } else {
            Err(NnxError::UnsupportedWeightMemory {
                requested: wmem,
                supported: supported.to_vec(),
            })
        }
    }

    /// Encoded byte length for a canonical weight of `dims`
    ///
    /// # Errors
    ///
    /// Returns error on an unsupported kernel or bit width.
    fn encoded_len(&self, dims: WeightDims, bits: u32, depthwise: bool) -> Result<usize> {
        let dims = if depthwise { dims.swapped() } else { dims };
        Ok(Plan::new(self, dims, bits)?.byte_len())
    }

    /// Encode unsigned weights into the hardware byte order
    ///
    /// # Errors
    ///
    /// Returns error on wrong rank, unsupported kernel or bit width, or an
    /// element outside `[0, 2^bits)`.
    fn encode(&self, weight: &Tensor, bits: u32, depthwise: bool) -> Result<Bytes> {
        let dims = WeightDims::from_dims(weight.dims())?;
        let plan_dims = if depthwise { dims.swapped() } else { dims };
        let plan = Plan::new(self, plan_dims, bits)?;

        let limit = 1i64 << bits;
        if let Some(index) = weight.data().iter().position(|&v| !(0..limit).contains(&v)) {
            return Err(NnxError::ValueOutOfRange {
                value: weight.data()[index],
                index,
                min: 0,
                max: i128::from(limit - 1),
            });
        }

        let data = if depthwise {
            swap_channels(weight.data(), dims)
        } else {
            weight.data().to_vec()
        };

        let mut out = vec![0u8; plan.byte_len()];
        let hw = plan_dims.kernel.area();
        for (flat, &value) in data.iter().enumerate() {
            let (co, ci, s) = (flat / (plan_dims.cin * hw), (flat / hw) % plan_dims.cin, flat % hw);
            for plane in 0..bits as usize {
                if (value >> plane) & 1 == 1 {
                    let pos = plan.position(self, co, ci, plane, s);
                    out[pos / 8] |= 1 << (pos % 8);
                }
            }
        }

        tracing::debug!(
            "Encoded {} weight {dims} at {bits} bit(s) into {} bytes",
            self.accelerator(),
            out.len()
        );
        Ok(Bytes::from(out))
    }

    /// Decode the hardware byte order back into canonical unsigned weights
    ///
    /// # Errors
    ///
    /// Returns error on unsupported kernel or bit width, or when `bytes` does
    /// not have the encoded length for `dims`.
    fn decode(&self, bytes: &[u8], bits: u32, dims: WeightDims, depthwise: bool) -> Result<Tensor> {
        let plan_dims = if depthwise { dims.swapped() } else { dims };
        let plan = Plan::new(self, plan_dims, bits)?;
        if bytes.len() != plan.byte_len() {
            return Err(NnxError::shape(format!(
                "{} weight {dims} at {bits} bit(s) encodes to {} bytes, got {}",
                self.accelerator(),
                plan.byte_len(),
                bytes.len()
            )));
        }

        let hw = plan_dims.kernel.area();
        let mut data = vec![0i64; plan_dims.len()];
        for (flat, value) in data.iter_mut().enumerate() {
            let (co, ci, s) = (flat / (plan_dims.cin * hw), (flat / hw) % plan_dims.cin, flat % hw);
            for plane in 0..bits as usize {
                let pos = plan.position(self, co, ci, plane, s);
                if (bytes[pos / 8] >> (pos % 8)) & 1 == 1 {
                    *value |= 1 << plane;
                }
            }
        }

        let data = if depthwise {
            swap_channels(&data, plan_dims)
        } else {
            data
        };
        Tensor::new(IntegerType::new(false, bits)?, dims.to_array(), data)
    }
}

/// Block geometry of one encode/decode call
struct Plan {
    dims: WeightDims,
    bits: u32,
    subtile: usize,
    cin_major: usize,
    block_bits: usize,
}

impl Plan {
    fn new<L: WeightLayout + ?Sized>(layout: &L, dims: WeightDims, bits: u32) -> Result<Self> {
        check_bits(bits)?;
        if dims.kernel != KernelShape::K1X1 && dims.kernel != KernelShape::K3X3 {
            return Err(NnxError::shape(format!(
                "weight kernel {} is not 1x1 or 3x3",
                dims.kernel
            )));
        }
        let subtile = layout.cin_subtile(dims.kernel);
        Ok(Self {
            dims,
            bits,
            subtile,
            cin_major: dims.cin.div_ceil(subtile),
            block_bits: layout.block_bits(dims.kernel, bits),
        })
    }

    fn byte_len(&self) -> usize {
        (self.dims.cout * self.cin_major * self.block_bits).div_ceil(8)
    }

    fn position<L: WeightLayout + ?Sized>(
        &self,
        layout: &L,
        co: usize,
        ci: usize,
        plane: usize,
        spatial: usize,
    ) -> usize {
        let (major, minor) = (ci / self.subtile, ci % self.subtile);
        (co * self.cin_major + major) * self.block_bits
            + layout.bit_offset(self.dims.kernel, plane, spatial, minor)
    }
}

fn check_bits(bits: u32) -> Result<()> {
    if (MIN_WEIGHT_BITS..=MAX_WEIGHT_BITS).contains(&bits) {
        Ok(())
    } else {
        Err(NnxError::BitWidth { bits })
    }
}

/// Transpose the two leading axes of a `(A, B, H, W)` buffer
fn swap_channels(data: &[i64], dims: WeightDims) -> Vec<i64> {
    let hw = dims.kernel.area();
    let mut out = vec![0; data.len()];
    for a in 0..dims.cout {
        for b in 0..dims.cin {
            let src = (a * dims.cin + b) * hw;
            let dst = (b * dims.cout + a) * hw;
            out[dst..dst + hw].copy_from_slice(&data[src..src + hw]);
        }
    }
    out
}

/// NE16: 16-channel subtiles, dense bit planes
#[derive(Debug, Clone, Copy, Default)]
pub struct Ne16Layout;

impl WeightLayout for Ne16Layout {
    fn accelerator(&self) -> Accelerator {
        Accelerator::Ne16
    }

    fn block_bits(&self, kernel: KernelShape, bits: u32) -> usize {
        bits as usize * kernel.area() * NE16_CIN_SUBTILE
    }

    fn bit_offset(&self, kernel: KernelShape, plane: usize, spatial: usize, minor: usize) -> usize {
        (plane * kernel.area() + spatial) * NE16_CIN_SUBTILE + minor
    }
}

/// Neureka: 256-bit weight port, 4-lane tiling for 1×1
#[derive(Debug, Clone, Copy, Default)]
pub struct NeurekaLayout;

impl WeightLayout for NeurekaLayout {
    fn accelerator(&self) -> Accelerator {
        Accelerator::Neureka
    }

    fn block_bits(&self, kernel: KernelShape, bits: u32) -> usize {
        if kernel == KernelShape::K1X1 {
            NEUREKA_WEIGHT_BANDWIDTH
        } else {
            bits as usize * NEUREKA_WEIGHT_BANDWIDTH
        }
    }

    fn bit_offset(&self, kernel: KernelShape, plane: usize, spatial: usize, minor: usize) -> usize {
        if kernel == KernelShape::K1X1 {
            let tile = minor / NEUREKA_1X1_LANE;
            let lane = minor % NEUREKA_1X1_LANE;
            (tile * NEUREKA_1X1_PLANES + plane) * NEUREKA_1X1_LANE + lane
        } else {
            plane * NEUREKA_WEIGHT_BANDWIDTH + spatial * NEUREKA_CIN_SUBTILE_3X3 + minor
        }
    }
}

/// Neureka v2: 32-channel subtiles, 288-bit rows for 3×3
#[derive(Debug, Clone, Copy, Default)]
pub struct NeurekaV2Layout;

impl WeightLayout for NeurekaV2Layout {
    fn accelerator(&self) -> Accelerator {
        Accelerator::NeurekaV2
    }

    fn block_bits(&self, kernel: KernelShape, bits: u32) -> usize {
        bits as usize * kernel.area() * NEUREKA_V2_CIN_SUBTILE
    }

    fn bit_offset(&self, kernel: KernelShape, plane: usize, spatial: usize, minor: usize) -> usize {
        (plane * kernel.area() + spatial) * NEUREKA_V2_CIN_SUBTILE + minor
    }
}

static NE16: Ne16Layout = Ne16Layout;
static NEUREKA: NeurekaLayout = NeurekaLayout;
static NEUREKA_V2: NeurekaV2Layout = NeurekaV2Layout;

/// Codec for `accelerator`
pub fn layout_for(accelerator: Accelerator) -> &'static dyn WeightLayout {
    match accelerator {
        Accelerator::Ne16 => &NE16,
        Accelerator::Neureka => &NEUREKA,
        Accelerator::NeurekaV2 => &NEUREKA_V2,
    }
}

/// Shift signed weights into the unsigned domain the codecs take
/// (`w + 2^(bits-1)`)
///
/// # Errors
///
/// Returns error if `weight` is not of a signed type.
pub fn to_unsigned(weight: &Tensor) -> Result<Tensor> {
    let dtype = weight.dtype();
    if !dtype.is_signed() {
        return Err(NnxError::InvalidIntegerType {
            name: format!("{dtype} (weight offset expects a signed type)"),
        });
    }
    let offset = 1i64 << (dtype.bits() - 1);
    let data = weight.data().iter().map(|&w| w + offset).collect();
    Tensor::new(IntegerType::new(false, dtype.bits())?, weight.shape().clone(), data)
}

/// Inverse of [`to_unsigned`]
///
/// # Errors
///
/// Returns error if `weight` is not of an unsigned type.
pub fn to_signed(weight: &Tensor) -> Result<Tensor> {
    let dtype = weight.dtype();
    if dtype.is_signed() {
        return Err(NnxError::InvalidIntegerType {
            name: format!("{dtype} (weight offset removal expects an unsigned type)"),
        });
    }
    let offset = 1i64 << (dtype.bits() - 1);
    let data = weight.data().iter().map(|&w| w - offset).collect();
    Tensor::new(IntegerType::new(true, dtype.bits())?, weight.shape().clone(), data)
}

/// Encoded weights ready for a weight memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedWeights {
    /// Encoded bytes
    pub data: Bytes,
    /// Destination memory
    pub wmem: WeightMemory,
    /// Bits per weight
    pub bits: u32,
    /// Canonical weight dimensions
    pub dims: WeightDims,
    /// Coded with Cout/Cin swapped
    pub depthwise: bool,
}

impl PackedWeights {
    /// Linker section of the destination memory
    pub const fn section(&self) -> &'static str {
        self.wmem.section()
    }

    /// Write the raw bytes to `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn write_bin<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), &self.data)?;
        tracing::info!(
            "Wrote {} packed weight bytes to {}",
            self.data.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Decode back to canonical unsigned weights
    ///
    /// # Errors
    ///
    /// Returns error if the bytes do not match the recorded dimensions.
    pub fn unpack(&self, accelerator: Accelerator) -> Result<Tensor> {
        layout_for(accelerator).decode(&self.data, self.bits, self.dims, self.depthwise)
    }
}

/// Offset, encode and tag the weight of `case` for the accelerator its
/// configuration was validated against
///
/// # Errors
///
/// Returns error if the destination memory is not supported by the
/// accelerator or the weight cannot be encoded.
pub fn pack_weights(case: &TestCase) -> Result<PackedWeights> {
    let conf = case.configuration();
    let layout = layout_for(conf.accelerator());
    layout.check_wmem(conf.wmem())?;

    let weight = case
        .weight()
        .ok_or_else(|| NnxError::missing_tensor("weight", "nothing to pack"))?;
    let unsigned = to_unsigned(weight)?;
    let bits = unsigned.dtype().bits();
    let depthwise = conf.depthwise();
    let data = layout.encode(&unsigned, bits, depthwise)?;

    Ok(PackedWeights {
        data,
        wmem: conf.wmem(),
        bits,
        dims: WeightDims::from_dims(unsigned.dims())?,
        depthwise,
    })
}
