//! Bit-exact integer model of the accelerator datapath
//!
//! ```text
//! input ─pad─► conv (i64) ─wrap─► int32 acc ─┬─────────────────────────────► output (int32)
//!                                             └─► ×scale ─► +bias ─► relu ─► >>shift ─► sat(out_type)
//! ```
//!
//! Every cast in the pipeline is one of the two [`IntegerType`] casts:
//! wraparound where the hardware drops high bits, saturation where it clamps.

use crate::config::TestConfiguration;
use crate::error::{NnxError, Result};
use crate::integer::IntegerType;
use crate::shapes::{conv_output_size, Padding, Stride};
use crate::tensor::Tensor;

/// Largest selectable global shift
pub const MAX_GLOBAL_SHIFT: u8 = u8::MAX;

/// Datapath settings of one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    /// Input zero padding
    pub padding: Padding,
    /// Convolution stride
    pub stride: Stride,
    /// One filter per input channel
    pub depthwise: bool,
    /// Output type after requantization
    pub out_type: IntegerType,
    /// Type the scaled accumulator is cast to around the bias add
    pub bias_type: Option<IntegerType>,
    /// Requantization enabled
    pub has_norm_quant: bool,
    /// Bias add enabled
    pub has_bias: bool,
    /// ReLU enabled
    pub has_relu: bool,
}

impl From<&TestConfiguration> for ConvParams {
    fn from(conf: &TestConfiguration) -> Self {
        Self {
            padding: conf.padding(),
            stride: conf.stride(),
            depthwise: conf.depthwise(),
            out_type: conf.out_type(),
            bias_type: conf.bias_type(),
            has_norm_quant: conf.has_norm_quant(),
            has_bias: conf.has_bias(),
            has_relu: conf.has_relu(),
        }
    }
}

/// Tensors a layer consumes
#[derive(Debug, Clone, Copy)]
pub struct Operands<'a> {
    /// `(N, Cin, H, W)` activations
    pub input: &'a Tensor,
    /// `(Cout, Cin / groups, kh, kw)` signed weights
    pub weight: &'a Tensor,
    /// `(1, Cout, 1, 1)` per-channel scale
    pub scale: Option<&'a Tensor>,
    /// `(1, Cout, 1, 1)` per-channel bias
    pub bias: Option<&'a Tensor>,
}

/// Zero-padded strided cross-correlation, accumulated in 64 bits and wrapped
/// to the 32-bit accumulator
///
/// Depthwise weights are `(C, 1, kh, kw)` and produce channel `c` from input
/// channel `c` only.
///
/// # Errors
///
/// Returns a shape error if the tensors are not rank 4 or disagree on
/// channel counts, or if the kernel does not fit in the padded input.
pub fn accumulate(
    input: &Tensor,
    weight: &Tensor,
    padding: Padding,
    stride: Stride,
    depthwise: bool,
) -> Result<Tensor> {
    let [n, cin, h, w] = rank4("input", input)?;
    let [cout, wcin, kh, kw] = rank4("weight", weight)?;

    if depthwise {
        if wcin != 1 || cout != cin {
            return Err(NnxError::shape(format!(
                "depthwise weight must be ({cin}, 1, kh, kw), got {}",
                weight.shape()
            )));
        }
    } else if wcin != cin {
        return Err(NnxError::shape(format!(
            "weight has {wcin} input channel(s), input has {cin}"
        )));
    }
    if stride.height == 0 || stride.width == 0 {
        return Err(NnxError::shape(format!("stride {stride} must be positive")));
    }

    let (Some(ho), Some(wo)) = (
        conv_output_size(h, padding.top, padding.bottom, kh, stride.height),
        conv_output_size(w, padding.left, padding.right, kw, stride.width),
    ) else {
        return Err(NnxError::shape(format!(
            "kernel {kh}x{kw} does not fit in input {h}x{w} with padding {padding}"
        )));
    };

    let x = input.data();
    let k = weight.data();
    let mut out = Vec::with_capacity(n * cout * ho * wo);
    for ni in 0..n {
        for co in 0..cout {
            for oy in 0..ho {
                for ox in 0..wo {
                    let mut acc = 0i64;
                    for wc in 0..wcin {
                        let ci = if depthwise { co } else { wc };
                        for ky in 0..kh {
                            // Rows in the padding contribute zero
                            let Some(iy) = (oy * stride.height + ky).checked_sub(padding.top) else {
                                continue;
                            };
                            if iy >= h {
                                continue;
                            }
                            for kx in 0..kw {
                                let Some(ix) = (ox * stride.width + kx).checked_sub(padding.left) else {
                                    continue;
                                };
                                if ix >= w {
                                    continue;
                                }
                                let xv = x[((ni * cin + ci) * h + iy) * w + ix];
                                let kv = k[((co * wcin + wc) * kh + ky) * kw + kx];
                                acc = acc.wrapping_add(xv.wrapping_mul(kv));
                            }
                        }
                    }
                    out.push(IntegerType::ACCUMULATOR.wrap(acc));
                }
            }
        }
    }

    Tensor::new(IntegerType::ACCUMULATOR, [n, cout, ho, wo], out)
}

/// Full layer: accumulation followed by requantization when enabled
///
/// `global_shift` is only consulted with norm/quant on.
///
/// # Errors
///
/// Returns error if a tensor the parameters require is missing or a shape
/// is inconsistent.
pub fn convolution(ops: &Operands<'_>, params: &ConvParams, global_shift: Option<u8>) -> Result<Tensor> {
    let acc = accumulate(ops.input, ops.weight, params.padding, params.stride, params.depthwise)?;
    if !params.has_norm_quant {
        return Ok(acc);
    }

    let shift = global_shift.ok_or_else(|| {
        NnxError::missing_tensor("global_shift", "required when norm/quant is enabled")
    })?;
    let pre = pre_shift(&acc, ops, params)?;
    let out_type = params.out_type;
    let data = pre
        .into_iter()
        .map(|v| out_type.saturate(v >> u32::from(shift).min(63)))
        .collect();

    tracing::debug!("Requantized {} output with shift {shift}", acc.shape());
    Tensor::new(out_type, acc.shape().clone(), data)
}

/// Choose the global shift that brings the pre-shift output spread into the
/// output type's half range
///
/// The layer is run with an `int32` output and no shift; with ReLU only the
/// positive values count. The shift is `ceil(log2(std / 2^(out_bits-1)))`
/// clamped to `[0, 255]`, or 0 if the population standard deviation is 0.
///
/// # Errors
///
/// Same as [`convolution`].
pub fn select_global_shift(ops: &Operands<'_>, params: &ConvParams) -> Result<u8> {
    let acc = accumulate(ops.input, ops.weight, params.padding, params.stride, params.depthwise)?;
    let values: Vec<i64> = if params.has_norm_quant {
        pre_shift(&acc, ops, params)?
            .into_iter()
            .map(|v| IntegerType::ACCUMULATOR.saturate(v))
            .collect()
    } else {
        acc.into_data()
    };
    let values: Vec<i64> = if params.has_relu {
        values.into_iter().filter(|&v| v > 0).collect()
    } else {
        values
    };

    let std = population_std(&values);
    let shift = shift_for_spread(std, params.out_type.bits());
    tracing::debug!("Selected global shift {shift} (std {std:.3})");
    Ok(shift)
}

/// Scale, bias and ReLU applied to the accumulator
fn pre_shift(acc: &Tensor, ops: &Operands<'_>, params: &ConvParams) -> Result<Vec<i64>> {
    let [_, cout, ho, wo] = rank4("accumulator", acc)?;
    let scale = ops
        .scale
        .ok_or_else(|| NnxError::missing_tensor("scale", "required when norm/quant is enabled"))?;
    scale.expect_dims("scale", &[1, cout, 1, 1])?;

    let bias = if params.has_bias {
        let bias = ops
            .bias
            .ok_or_else(|| NnxError::missing_tensor("bias", "required when bias is enabled"))?;
        bias.expect_dims("bias", &[1, cout, 1, 1])?;
        let bias_type = params.bias_type.unwrap_or(bias.dtype());
        Some((bias.data(), bias_type))
    } else {
        None
    };

    let plane = ho * wo;
    let values = acc
        .data()
        .iter()
        .enumerate()
        .map(|(flat, &a)| {
            let c = (flat / plane) % cout;
            let mut v = a.wrapping_mul(scale.data()[c]);
            if let Some((b, ty)) = bias {
                v = ty.saturate(ty.wrap(v) + b[c]);
            }
            if params.has_relu {
                v = v.max(0);
            }
            v
        })
        .collect();
    Ok(values)
}

#[allow(clippy::cast_precision_loss)]
fn population_std(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn shift_for_spread(std: f64, out_bits: u32) -> u8 {
    if std <= 0.0 || !std.is_finite() {
        return 0;
    }
    let half_range = 2f64.powi(i32::try_from(out_bits).unwrap_or(i32::MAX) - 1);
    let shift = (std / half_range).log2().ceil();
    shift.clamp(0.0, f64::from(MAX_GLOBAL_SHIFT)) as u8
}

fn rank4(name: &str, t: &Tensor) -> Result<[usize; 4]> {
    match *t.dims() {
        [a, b, c, d] => Ok([a, b, c, d]),
        _ => Err(NnxError::shape(format!(
            "{name} must be rank 4, got shape {}",
            t.shape()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(dtype: IntegerType, dims: [usize; 4], data: Vec<i64>) -> Tensor {
        Tensor::new(dtype, dims, data).unwrap()
    }

    fn plain() -> ConvParams {
        ConvParams {
            padding: Padding::ZERO,
            stride: Stride::S1X1,
            depthwise: false,
            out_type: IntegerType::INT32,
            bias_type: None,
            has_norm_quant: false,
            has_bias: false,
            has_relu: false,
        }
    }

    fn quant(out_type: IntegerType, relu: bool, bias: bool) -> ConvParams {
        ConvParams {
            out_type,
            bias_type: bias.then_some(IntegerType::INT32),
            has_norm_quant: true,
            has_bias: bias,
            has_relu: relu,
            ..plain()
        }
    }

    fn uint32() -> IntegerType {
        IntegerType::new(false, 32).unwrap()
    }

    #[test]
    fn test_accumulator_wraps() {
        let cin = 70_000;
        let input = t(IntegerType::UINT8, [1, cin, 1, 1], vec![255; cin]);
        let weight = t(IntegerType::INT8, [1, cin, 1, 1], vec![127; cin]);
        let acc = accumulate(&input, &weight, Padding::ZERO, Stride::S1X1, false).unwrap();
        // 255 * 127 * 70000 = 2_266_950_000, past i32::MAX
        assert_eq!(acc.data(), &[2_266_950_000 - (1i64 << 32)]);
        assert_eq!(acc.dtype(), IntegerType::INT32);
    }

    #[test]
    fn test_same_padding_3x3() {
        let input = t(IntegerType::UINT8, [1, 1, 2, 2], vec![1, 2, 3, 4]);
        let weight = t(IntegerType::INT8, [1, 1, 3, 3], vec![1; 9]);
        let acc = accumulate(&input, &weight, Padding::uniform(1), Stride::S1X1, false).unwrap();
        assert_eq!(acc.dims(), &[1, 1, 2, 2]);
        assert_eq!(acc.data(), &[10, 10, 10, 10]);
    }

    #[test]
    fn test_stride_2() {
        let input = t(IntegerType::UINT8, [1, 1, 4, 4], (0..16).collect());
        let weight = t(IntegerType::INT8, [2, 1, 1, 1], vec![1, -1]);
        let acc = accumulate(&input, &weight, Padding::ZERO, Stride::S2X2, false).unwrap();
        assert_eq!(acc.dims(), &[1, 2, 2, 2]);
        assert_eq!(acc.data(), &[0, 2, 8, 10, 0, -2, -8, -10]);
    }

    #[test]
    fn test_depthwise_uses_own_channel() {
        let input = t(IntegerType::UINT8, [1, 2, 1, 1], vec![3, 5]);
        let mut w = vec![0; 18];
        w[4] = 2;
        w[13] = -1;
        let weight = t(IntegerType::INT8, [2, 1, 3, 3], w);
        let acc = accumulate(&input, &weight, Padding::uniform(1), Stride::S1X1, true).unwrap();
        assert_eq!(acc.data(), &[6, -5]);
    }

    #[test]
    fn test_depthwise_shape_checked() {
        let input = t(IntegerType::UINT8, [1, 2, 3, 3], vec![0; 18]);
        let weight = t(IntegerType::INT8, [2, 2, 3, 3], vec![0; 36]);
        assert!(accumulate(&input, &weight, Padding::ZERO, Stride::S1X1, true).is_err());
    }

    #[test]
    fn test_scale_product_wraps_then_bias_saturates() {
        let input = t(IntegerType::UINT8, [1, 1, 1, 2], vec![1, 10]);
        let weight = t(IntegerType::INT8, [1, 1, 1, 1], vec![1]);
        let scale = t(uint32(), [1, 1, 1, 1], vec![1 << 31]);
        let bias = t(IntegerType::INT32, [1, 1, 1, 1], vec![5]);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: Some(&scale),
            bias: Some(&bias),
        };
        let out = convolution(&ops, &quant(IntegerType::INT32, false, true), Some(0)).unwrap();
        // 1 << 31 wraps to i32::MIN, 10 << 31 wraps to 0
        assert_eq!(out.data(), &[i64::from(i32::MIN) + 5, 5]);

        let unit = t(uint32(), [1, 1, 1, 1], vec![1]);
        let big_bias = t(IntegerType::INT32, [1, 1, 1, 1], vec![i64::from(i32::MAX)]);
        let ops = Operands {
            scale: Some(&unit),
            bias: Some(&big_bias),
            ..ops
        };
        let out = convolution(&ops, &quant(IntegerType::INT32, false, true), Some(0)).unwrap();
        assert_eq!(out.data(), &[i64::from(i32::MAX), i64::from(i32::MAX)]);

        // 1 * (2^31 + 1) wraps to i32::MIN + 1, 10 * (2^31 + 1) wraps to 10
        let odd = t(uint32(), [1, 1, 1, 1], vec![(1 << 31) + 1]);
        let neg_bias = t(IntegerType::INT32, [1, 1, 1, 1], vec![-5]);
        let ops = Operands {
            scale: Some(&odd),
            bias: Some(&neg_bias),
            ..ops
        };
        let out = convolution(&ops, &quant(IntegerType::INT32, false, true), Some(0)).unwrap();
        assert_eq!(out.data(), &[i64::from(i32::MIN), 5]);
    }

    #[test]
    fn test_relu_shift_and_saturate() {
        let input = t(IntegerType::UINT8, [1, 1, 1, 3], vec![1, 100, 250]);
        let weight = t(IntegerType::INT8, [2, 1, 1, 1], vec![-1, 8]);
        let scale = t(IntegerType::UINT8, [1, 2, 1, 1], vec![1, 1]);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: Some(&scale),
            bias: None,
        };
        let out = convolution(&ops, &quant(IntegerType::UINT8, true, false), Some(2)).unwrap();
        assert_eq!(out.dtype(), IntegerType::UINT8);
        assert_eq!(out.data(), &[0, 0, 0, 2, 200, 255]);
    }

    #[test]
    fn test_missing_operands() {
        let input = t(IntegerType::UINT8, [1, 1, 1, 1], vec![1]);
        let weight = t(IntegerType::INT8, [1, 1, 1, 1], vec![1]);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: None,
            bias: None,
        };
        let params = quant(IntegerType::UINT8, true, false);
        assert!(matches!(
            convolution(&ops, &params, Some(0)),
            Err(NnxError::MissingTensor { name: "scale", .. })
        ));

        let scale = t(IntegerType::UINT8, [1, 1, 1, 1], vec![1]);
        let ops = Operands {
            scale: Some(&scale),
            ..ops
        };
        assert!(matches!(
            convolution(&ops, &params, None),
            Err(NnxError::MissingTensor { name: "global_shift", .. })
        ));
        assert!(matches!(
            convolution(&ops, &quant(IntegerType::UINT8, true, true), Some(0)),
            Err(NnxError::MissingTensor { name: "bias", .. })
        ));
    }

    #[test]
    fn test_scale_shape_checked() {
        let input = t(IntegerType::UINT8, [1, 1, 1, 1], vec![1]);
        let weight = t(IntegerType::INT8, [2, 1, 1, 1], vec![1, 1]);
        let scale = t(IntegerType::UINT8, [1, 1, 1, 1], vec![1]);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: Some(&scale),
            bias: None,
        };
        let err = convolution(&ops, &quant(IntegerType::INT8, false, false), Some(0)).unwrap_err();
        assert!(matches!(err, NnxError::Shape { .. }));
    }

    #[test]
    fn test_global_shift_from_spread() {
        let input = t(IntegerType::UINT8, [1, 1, 1, 2], vec![0, 1]);
        let weight = t(IntegerType::INT8, [1, 1, 1, 1], vec![1]);
        let scale = t(uint32(), [1, 1, 1, 1], vec![2048]);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: Some(&scale),
            bias: None,
        };
        // values {0, 2048}: std 1024 = 8 * 2^7
        assert_eq!(select_global_shift(&ops, &quant(IntegerType::INT8, false, false)).unwrap(), 3);
        // with relu only {2048} is kept: std 0
        assert_eq!(select_global_shift(&ops, &quant(IntegerType::UINT8, true, false)).unwrap(), 0);
    }

    #[test]
    fn test_small_spread_needs_no_shift() {
        assert_eq!(shift_for_spread(0.0, 8), 0);
        assert_eq!(shift_for_spread(3.0, 8), 0);
        assert_eq!(shift_for_spread(129.0, 8), 1);
        assert_eq!(shift_for_spread(f64::MAX, 2), MAX_GLOBAL_SHIFT);
    }

    #[test]
    fn test_population_std() {
        assert!((population_std(&[2, 4, 4, 4, 5, 5, 7, 9]) - 2.0).abs() < 1e-12);
        assert!(population_std(&[]).abs() < f64::EPSILON);
    }
}
