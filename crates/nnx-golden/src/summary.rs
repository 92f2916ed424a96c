//! Per-layer parameter summary
//!
//! The flat set of numbers firmware needs to program one layer for a test
//! case. Header emitters consume this; it carries no formatting of its own
//! beyond `Display` and JSON.

use crate::error::{NnxError, Result};
use crate::shapes::{Padding, Stride};
use crate::testcase::TestCase;
use serde::Serialize;
use std::fmt;

/// Geometry and element domain of an activation tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivationSummary {
    /// Rows
    pub height: usize,
    /// Columns
    pub width: usize,
    /// Channels
    pub channel: usize,
    /// Signed element type
    pub signed: bool,
    /// Element bit width
    pub bits: u32,
}

/// Weight geometry and encoding offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeightSummary {
    /// Kernel rows
    pub height: usize,
    /// Kernel columns
    pub width: usize,
    /// Input channels per group
    pub channel_in: usize,
    /// Output channels
    pub channel_out: usize,
    /// Weight bit width
    pub bits: u32,
    /// Value added back to a decoded weight, `-2^(bits-1)`
    pub offset: i64,
}

/// Everything needed to program one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    /// Input activations
    pub input: ActivationSummary,
    /// Output activations
    pub output: ActivationSummary,
    /// Weights
    pub weight: WeightSummary,
    /// Scale bit width, 0 without scale
    pub scale_bits: u32,
    /// Bias bit width, 0 without bias
    pub bias_bits: u32,
    /// Input padding
    pub padding: Padding,
    /// Stride
    pub stride: Stride,
    /// Convolution groups
    pub groups: usize,
    /// Requantization right shift
    pub outshift: i64,
    /// Norm/quant enabled
    pub has_norm_quant: bool,
    /// Bias enabled
    pub has_bias: bool,
    /// ReLU enabled
    pub has_relu: bool,
    /// Weight memory name
    pub wmem: &'static str,
    /// Linker section of the weight memory
    pub wmem_section: &'static str,
}

impl LayerSummary {
    /// Summarize a valid test case
    ///
    /// # Errors
    ///
    /// Returns error if a required tensor is missing or not rank 4.
    pub fn from_case(case: &TestCase) -> Result<Self> {
        case.check_valid()?;
        let conf = case.configuration();
        let missing = |name| NnxError::missing_tensor(name, "required for a layer summary");

        let input = rank4("input", case.input().ok_or_else(|| missing("input"))?.dims())?;
        let output = rank4("output", case.output().ok_or_else(|| missing("output"))?.dims())?;
        let weight = rank4("weight", case.weight().ok_or_else(|| missing("weight"))?.dims())?;

        let weight_bits = conf.weight_type().bits();
        Ok(Self {
            input: ActivationSummary {
                height: input[2],
                width: input[3],
                channel: input[1],
                signed: conf.in_type().is_signed(),
                bits: conf.in_type().bits(),
            },
            output: ActivationSummary {
                height: output[2],
                width: output[3],
                channel: output[1],
                signed: conf.out_type().is_signed(),
                bits: conf.out_type().bits(),
            },
            weight: WeightSummary {
                height: weight[2],
                width: weight[3],
                channel_in: weight[1],
                channel_out: weight[0],
                bits: weight_bits,
                offset: -(1i64 << (weight_bits - 1)),
            },
            scale_bits: conf.scale_type().map_or(0, |t| t.bits()),
            bias_bits: conf.bias_type().map_or(0, |t| t.bits()),
            padding: conf.padding(),
            stride: conf.stride(),
            groups: conf.groups(),
            outshift: case.global_shift_value(),
            has_norm_quant: conf.has_norm_quant(),
            has_bias: conf.has_bias(),
            has_relu: conf.has_relu(),
            wmem: conf.wmem().name(),
            wmem_section: conf.wmem().section(),
        })
    }
}

fn rank4(name: &'static str, dims: &[usize]) -> Result<[usize; 4]> {
    match *dims {
        [n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(NnxError::shape(format!("{name} must be rank 4, got {dims:?}"))),
    }
}

impl fmt::Display for ActivationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} {}int{}",
            self.height,
            self.width,
            self.channel,
            if self.signed { "" } else { "u" },
            self.bits
        )
    }
}

impl fmt::Display for LayerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "input:    {}", self.input)?;
        writeln!(f, "output:   {}", self.output)?;
        writeln!(
            f,
            "weight:   {}x{} {} -> {} int{} (offset {})",
            self.weight.height,
            self.weight.width,
            self.weight.channel_in,
            self.weight.channel_out,
            self.weight.bits,
            self.weight.offset
        )?;
        writeln!(f, "scale:    {} bit(s)", self.scale_bits)?;
        writeln!(f, "bias:     {} bit(s)", self.bias_bits)?;
        writeln!(f, "padding:  {}", self.padding)?;
        writeln!(f, "stride:   {}", self.stride)?;
        writeln!(f, "groups:   {}", self.groups)?;
        writeln!(f, "outshift: {}", self.outshift)?;
        writeln!(
            f,
            "flags:    norm_quant={} bias={} relu={}",
            self.has_norm_quant, self.has_bias, self.has_relu
        )?;
        write!(f, "wmem:     {} ({})", self.wmem, self.wmem_section)
    }
}
