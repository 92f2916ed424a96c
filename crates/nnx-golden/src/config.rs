//! Test configuration and its invariants
//!
//! A [`RawTestConfiguration`] is whatever a JSON or TOML file says. A
//! [`TestConfiguration`] is a raw configuration that passed every invariant
//! check for one accelerator; the functional model and the codecs only ever
//! see the latter.
//!
//! Checks run in a fixed order and every failing one is reported, so a bad
//! configuration file can be fixed in one pass.

use crate::error::{NnxError, Result};
use crate::integer::IntegerType;
use crate::shapes::{conv_output_size, KernelShape, Padding, Stride};
use nnx_chip::{Accelerator, WeightMemory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Configuration fields as read from a file, not yet validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTestConfiguration {
    /// Input rows
    pub in_height: usize,
    /// Input columns
    pub in_width: usize,
    /// Input channels
    pub in_channel: usize,
    /// Output channels
    pub out_channel: usize,
    /// Input zero padding
    pub padding: Padding,
    /// Kernel extent
    pub kernel_shape: KernelShape,
    /// One filter per input channel
    pub depthwise: bool,
    /// Convolution stride
    pub stride: Stride,
    /// Input activation type
    pub in_type: IntegerType,
    /// Output activation type
    pub out_type: IntegerType,
    /// Weight type
    pub weight_type: IntegerType,
    /// Per-channel scale type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_type: Option<IntegerType>,
    /// Per-channel bias type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias_type: Option<IntegerType>,
    /// Normalization/quantization stage enabled
    pub has_norm_quant: bool,
    /// Bias stage enabled
    pub has_bias: bool,
    /// ReLU stage enabled
    pub has_relu: bool,
    /// Weight-memory destination
    #[serde(default, with = "wmem_name")]
    pub wmem: WeightMemory,
}

impl RawTestConfiguration {
    /// Parse from a JSON document
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON or missing fields.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    ///
    /// Returns error on malformed TOML or missing fields.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read a `.json` or `.toml` configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or has another
    /// extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        tracing::debug!("Reading configuration from {}", path.display());

        match ext.as_deref() {
            Some("json") => Self::from_json_str(&std::fs::read_to_string(path)?),
            Some("toml") => Self::from_toml_str(&std::fs::read_to_string(path)?),
            _ => Err(NnxError::UnsupportedConfigFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Serialize as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

mod wmem_name {
    use nnx_chip::WeightMemory;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(wmem: &WeightMemory, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(wmem.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<WeightMemory, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a configuration invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Spatial sizes and channel counts are positive
    PositiveDimensions,
    /// Kernel shape is one the accelerator supports
    KernelShape,
    /// Stride is one the accelerator supports
    Stride,
    /// Input type is supported
    InType,
    /// Output type is supported
    OutType,
    /// Weight type is supported
    WeightType,
    /// Scale type is supported
    ScaleType,
    /// Bias type is supported
    BiasType,
    /// Weight memory is one the accelerator can fetch from
    WeightMemory,
    /// Depthwise runs on 3×3 kernels only
    DepthwiseKernel,
    /// Depthwise keeps the channel count
    DepthwiseChannels,
    /// 1×1 kernels take no padding
    PaddingWith1x1,
    /// Stride 2×2 needs an even output channel count
    StrideOutChannels,
    /// ReLU needs norm/quant
    ReluNeedsNormQuant,
    /// Bias needs norm/quant
    BiasNeedsNormQuant,
    /// Norm/quant needs a scale type
    ScaleTypeRequired,
    /// Bias needs a bias type
    BiasTypeRequired,
    /// Without norm/quant the output is the raw accumulator
    AccumulatorOutput,
    /// Output is unsigned after ReLU, signed otherwise
    OutputSignedness,
    /// The kernel fits in the padded input
    OutputExtent,
}

impl Rule {
    /// Kebab-case identifier
    pub const fn name(self) -> &'static str {
        match self {
            Self::PositiveDimensions => "positive-dimensions",
            Self::KernelShape => "kernel-shape",
            Self::Stride => "stride",
            Self::InType => "in-type",
            Self::OutType => "out-type",
            Self::WeightType => "weight-type",
            Self::ScaleType => "scale-type",
            Self::BiasType => "bias-type",
            Self::WeightMemory => "weight-memory",
            Self::DepthwiseKernel => "depthwise-kernel",
            Self::DepthwiseChannels => "depthwise-channels",
            Self::PaddingWith1x1 => "padding-with-1x1",
            Self::StrideOutChannels => "stride-out-channels",
            Self::ReluNeedsNormQuant => "relu-needs-norm-quant",
            Self::BiasNeedsNormQuant => "bias-needs-norm-quant",
            Self::ScaleTypeRequired => "scale-type-required",
            Self::BiasTypeRequired => "bias-type-required",
            Self::AccumulatorOutput => "accumulator-output",
            Self::OutputSignedness => "output-signedness",
            Self::OutputExtent => "output-extent",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One violated invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Which invariant
    pub rule: Rule,
    /// What was wrong, with the offending values
    pub message: String,
}

impl Violation {
    fn new(rule: Rule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

type Check = fn(Accelerator, &RawTestConfiguration) -> Option<Violation>;

/// Invariant checks in evaluation order
const CHECKS: &[Check] = &[
    check_positive_dimensions,
    check_kernel_shape,
    check_stride,
    check_in_type,
    check_out_type,
    check_weight_type,
    check_scale_type,
    check_bias_type,
    check_weight_memory,
    check_depthwise_kernel,
    check_depthwise_channels,
    check_padding_with_1x1,
    check_stride_out_channels,
    check_relu_needs_norm_quant,
    check_bias_needs_norm_quant,
    check_scale_type_required,
    check_bias_type_required,
    check_accumulator_output,
    check_output_signedness,
    check_output_extent,
];

fn implies(a: bool, b: bool) -> bool {
    !a || b
}

fn check_positive_dimensions(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let fields = [
        ("in_height", c.in_height),
        ("in_width", c.in_width),
        ("in_channel", c.in_channel),
        ("out_channel", c.out_channel),
        ("kernel_shape.height", c.kernel_shape.height),
        ("kernel_shape.width", c.kernel_shape.width),
        ("stride.height", c.stride.height),
        ("stride.width", c.stride.width),
    ];
    let zero: Vec<&str> = fields
        .iter()
        .filter(|(_, v)| *v == 0)
        .map(|(name, _)| *name)
        .collect();
    (!zero.is_empty()).then(|| {
        Violation::new(
            Rule::PositiveDimensions,
            format!("Fields must be positive: {}", zero.join(", ")),
        )
    })
}

fn check_kernel_shape(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let kernels = accel.limits().kernels;
    let ok = c.kernel_shape.side().is_some_and(|s| kernels.contains(&s));
    (!ok).then(|| {
        Violation::new(
            Rule::KernelShape,
            format!(
                "Unsupported kernel shape {} on {accel}. Supported: {}",
                c.kernel_shape,
                squares(kernels)
            ),
        )
    })
}

fn check_stride(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let strides = accel.limits().strides;
    let ok = c.stride.side().is_some_and(|s| strides.contains(&s));
    (!ok).then(|| {
        Violation::new(
            Rule::Stride,
            format!(
                "Unsupported stride {} on {accel}. Supported: {}",
                c.stride,
                squares(strides)
            ),
        )
    })
}

fn squares(sides: &[usize]) -> String {
    sides
        .iter()
        .map(|s| format!("{s}x{s}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_type(
    rule: Rule,
    field: &str,
    accel: Accelerator,
    ty: Option<IntegerType>,
    allowed: &[&str],
) -> Option<Violation> {
    let ty = ty?;
    let name = ty.to_string();
    (!allowed.contains(&name.as_str())).then(|| {
        Violation::new(
            rule,
            format!(
                "Unsupported {field} {name} on {accel}. Supported types: {}",
                allowed.join(", ")
            ),
        )
    })
}

fn check_in_type(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    check_type(Rule::InType, "in_type", accel, Some(c.in_type), accel.limits().in_types)
}

fn check_out_type(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    check_type(Rule::OutType, "out_type", accel, Some(c.out_type), accel.limits().out_types)
}

fn check_weight_type(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let limits = accel.limits();
    check_type(Rule::WeightType, "weight_type", accel, Some(c.weight_type), limits.weight_types)
}

fn check_scale_type(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    check_type(Rule::ScaleType, "scale_type", accel, c.scale_type, accel.limits().scale_types)
}

fn check_bias_type(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    check_type(Rule::BiasType, "bias_type", accel, c.bias_type, accel.limits().bias_types)
}

fn check_weight_memory(accel: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let supported = accel.limits().weight_memories;
    (!supported.contains(&c.wmem)).then(|| {
        let names: Vec<&str> = supported.iter().map(|w| w.name()).collect();
        Violation::new(
            Rule::WeightMemory,
            format!(
                "Unsupported weight memory {} on {accel}. Supported: {}",
                c.wmem,
                names.join(", ")
            ),
        )
    })
}

fn check_depthwise_kernel(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.depthwise, c.kernel_shape == KernelShape::K3X3)).then(|| {
        Violation::new(
            Rule::DepthwiseKernel,
            format!(
                "Depthwise supported only on 3x3 kernel shape. Given kernel shape {}",
                c.kernel_shape
            ),
        )
    })
}

fn check_depthwise_channels(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.depthwise, c.in_channel == c.out_channel)).then(|| {
        Violation::new(
            Rule::DepthwiseChannels,
            format!(
                "Input and output channel should be the same in a depthwise layer. \
                 Input channel: {}, output channel: {}",
                c.in_channel, c.out_channel
            ),
        )
    })
}

fn check_padding_with_1x1(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.kernel_shape == KernelShape::K1X1, c.padding.is_zero())).then(|| {
        Violation::new(
            Rule::PaddingWith1x1,
            format!("No padding on 1x1 kernel. Given padding {}", c.padding),
        )
    })
}

fn check_stride_out_channels(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.stride == Stride::S2X2, c.out_channel % 2 == 0)).then(|| {
        Violation::new(
            Rule::StrideOutChannels,
            format!(
                "With stride 2x2 supported only even output channel sizes. Given output channel {}",
                c.out_channel
            ),
        )
    })
}

fn check_relu_needs_norm_quant(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.has_relu, c.has_norm_quant)).then(|| {
        Violation::new(
            Rule::ReluNeedsNormQuant,
            "Relu flag can only be enabled when norm_quant is enabled",
        )
    })
}

fn check_bias_needs_norm_quant(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.has_bias, c.has_norm_quant)).then(|| {
        Violation::new(
            Rule::BiasNeedsNormQuant,
            "Bias flag can only be enabled when norm_quant is enabled",
        )
    })
}

fn check_scale_type_required(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (c.has_norm_quant && c.scale_type.is_none())
        .then(|| Violation::new(Rule::ScaleTypeRequired, "Scale type was not provided"))
}

fn check_bias_type_required(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (c.has_norm_quant && c.has_bias && c.bias_type.is_none())
        .then(|| Violation::new(Rule::BiasTypeRequired, "Bias type was not provided"))
}

fn check_accumulator_output(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(!c.has_norm_quant, c.out_type == IntegerType::ACCUMULATOR)).then(|| {
        Violation::new(
            Rule::AccumulatorOutput,
            format!(
                "Without quantization, the output type has to be equal to the accumulator \
                 type {}. Given output type {}",
                IntegerType::ACCUMULATOR,
                c.out_type
            ),
        )
    })
}

fn check_output_signedness(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    (!implies(c.has_norm_quant, c.has_relu != c.out_type.is_signed())).then(|| {
        Violation::new(
            Rule::OutputSignedness,
            format!(
                "Output type has to be unsigned when there is relu, otherwise signed. \
                 Given output type {} and has_relu {}",
                c.out_type, c.has_relu
            ),
        )
    })
}

fn check_output_extent(_: Accelerator, c: &RawTestConfiguration) -> Option<Violation> {
    let p = &c.padding;
    let h = conv_output_size(c.in_height, p.top, p.bottom, c.kernel_shape.height, c.stride.height);
    let w = conv_output_size(c.in_width, p.left, p.right, c.kernel_shape.width, c.stride.width);
    // A zero dimension is already reported by check_positive_dimensions
    let dims_positive = c.in_height > 0 && c.in_width > 0;
    (dims_positive && (h.is_none() || w.is_none())).then(|| {
        Violation::new(
            Rule::OutputExtent,
            format!(
                "Kernel {} does not fit in input {}x{} with padding {}",
                c.kernel_shape, c.in_height, c.in_width, p
            ),
        )
    })
}

/// Every violated invariant of `raw` on `accelerator`, in check order
pub fn violations(accelerator: Accelerator, raw: &RawTestConfiguration) -> Vec<Violation> {
    CHECKS.iter().filter_map(|check| check(accelerator, raw)).collect()
}

/// A configuration that satisfies every invariant for its accelerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfiguration {
    accelerator: Accelerator,
    raw: RawTestConfiguration,
    out_height: usize,
    out_width: usize,
}

impl TestConfiguration {
    /// Validate `raw` against every invariant for `accelerator`
    ///
    /// # Errors
    ///
    /// Returns [`NnxError::InvalidConfiguration`] listing every violation.
    pub fn new(accelerator: Accelerator, raw: RawTestConfiguration) -> Result<Self> {
        let violations = violations(accelerator, &raw);
        if !violations.is_empty() {
            tracing::debug!(
                "Rejected {accelerator} configuration with {} violation(s)",
                violations.len()
            );
            return Err(NnxError::InvalidConfiguration { violations });
        }

        let p = &raw.padding;
        let out_height = conv_output_size(raw.in_height, p.top, p.bottom, raw.kernel_shape.height, raw.stride.height);
        let out_width = conv_output_size(raw.in_width, p.left, p.right, raw.kernel_shape.width, raw.stride.width);
        let (Some(out_height), Some(out_width)) = (out_height, out_width) else {
            return Err(NnxError::shape("output extent is empty"));
        };

        Ok(Self {
            accelerator,
            raw,
            out_height,
            out_width,
        })
    }

    /// Read and validate a `.json` or `.toml` configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or violates an
    /// invariant.
    pub fn from_path<P: AsRef<Path>>(accelerator: Accelerator, path: P) -> Result<Self> {
        Self::new(accelerator, RawTestConfiguration::from_path(path)?)
    }

    /// Target accelerator
    pub const fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    /// Underlying fields
    pub const fn raw(&self) -> &RawTestConfiguration {
        &self.raw
    }

    /// Input rows
    pub const fn in_height(&self) -> usize {
        self.raw.in_height
    }

    /// Input columns
    pub const fn in_width(&self) -> usize {
        self.raw.in_width
    }

    /// Input channels
    pub const fn in_channel(&self) -> usize {
        self.raw.in_channel
    }

    /// Output channels
    pub const fn out_channel(&self) -> usize {
        self.raw.out_channel
    }

    /// Output rows
    pub const fn out_height(&self) -> usize {
        self.out_height
    }

    /// Output columns
    pub const fn out_width(&self) -> usize {
        self.out_width
    }

    /// Input zero padding
    pub const fn padding(&self) -> Padding {
        self.raw.padding
    }

    /// Kernel extent
    pub const fn kernel_shape(&self) -> KernelShape {
        self.raw.kernel_shape
    }

    /// Convolution stride
    pub const fn stride(&self) -> Stride {
        self.raw.stride
    }

    /// Depthwise layer
    pub const fn depthwise(&self) -> bool {
        self.raw.depthwise
    }

    /// Convolution groups (`in_channel` when depthwise, else 1)
    pub const fn groups(&self) -> usize {
        if self.raw.depthwise {
            self.raw.in_channel
        } else {
            1
        }
    }

    /// Input activation type
    pub const fn in_type(&self) -> IntegerType {
        self.raw.in_type
    }

    /// Output activation type
    pub const fn out_type(&self) -> IntegerType {
        self.raw.out_type
    }

    /// Weight type
    pub const fn weight_type(&self) -> IntegerType {
        self.raw.weight_type
    }

    /// Scale type, present whenever norm/quant is on
    pub const fn scale_type(&self) -> Option<IntegerType> {
        self.raw.scale_type
    }

    /// Bias type, present whenever bias is on
    pub const fn bias_type(&self) -> Option<IntegerType> {
        self.raw.bias_type
    }

    /// Normalization/quantization enabled
    pub const fn has_norm_quant(&self) -> bool {
        self.raw.has_norm_quant
    }

    /// Bias enabled
    pub const fn has_bias(&self) -> bool {
        self.raw.has_bias
    }

    /// ReLU enabled
    pub const fn has_relu(&self) -> bool {
        self.raw.has_relu
    }

    /// Weight-memory destination
    pub const fn wmem(&self) -> WeightMemory {
        self.raw.wmem
    }

    /// Input tensor shape `(1, Cin, H, W)`
    pub fn input_dims(&self) -> [usize; 4] {
        [1, self.in_channel(), self.in_height(), self.in_width()]
    }

    /// Weight tensor shape `(Cout, Cin / groups, kh, kw)`
    pub fn weight_dims(&self) -> [usize; 4] {
        let k = self.kernel_shape();
        let cin = if self.depthwise() { 1 } else { self.in_channel() };
        [self.out_channel(), cin, k.height, k.width]
    }

    /// Per-channel scale/bias shape `(1, Cout, 1, 1)`
    pub fn channel_dims(&self) -> [usize; 4] {
        [1, self.out_channel(), 1, 1]
    }

    /// Output tensor shape `(1, Cout, Ho, Wo)`
    pub fn output_dims(&self) -> [usize; 4] {
        [1, self.out_channel(), self.out_height(), self.out_width()]
    }
}
