//! Seeded test-data generation
//!
//! A [`TestGenerator`] turns a validated configuration into a complete
//! [`TestCase`]: missing tensors are drawn from a `ChaCha8Rng` seeded per
//! call, the global shift is selected from the output spread, and the output
//! is computed by the functional model. The same seed always yields the same
//! test.

use crate::config::TestConfiguration;
use crate::error::{NnxError, Result};
use crate::functional::{self, ConvParams, Operands};
use crate::integer::IntegerType;
use crate::tensor::Tensor;
use crate::testcase::{TensorName, TestCase, TestTensors};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::str::FromStr;

/// Seed used when none is given
pub const DEFAULT_SEED: u64 = 0;

/// How tensor elements are filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DataGenerationMethod {
    /// Uniform in `[min, max)` of the element type
    #[default]
    Random,
    /// Every element is 1
    Ones,
    /// `0, 1, 2, ...` wrapping to 0 past the type's max, laid out in
    /// `(N, H, W, C)` order for rank-4 tensors
    Incremented,
}

impl DataGenerationMethod {
    /// All methods
    pub const ALL: [Self; 3] = [Self::Random, Self::Ones, Self::Incremented];

    /// Lowercase name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Ones => "ones",
            Self::Incremented => "incremented",
        }
    }
}

impl fmt::Display for DataGenerationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataGenerationMethod {
    type Err = NnxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| NnxError::UnknownName {
                kind: "data generation method",
                name: s.to_string(),
                expected: "random, ones, incremented",
            })
    }
}

/// Fill a tensor of `dtype` and `dims` with `method`
///
/// # Errors
///
/// Returns error if the generated values do not fit `dtype`.
pub fn generate_data(
    dtype: IntegerType,
    dims: &[usize],
    method: DataGenerationMethod,
    rng: &mut impl Rng,
) -> Result<Tensor> {
    let len: usize = dims.iter().product();
    let min = i64::try_from(dtype.min()).unwrap_or(i64::MIN);
    let max = i64::try_from(dtype.max()).unwrap_or(i64::MAX);

    let data = match method {
        DataGenerationMethod::Random => (0..len).map(|_| rng.random_range(min..max)).collect(),
        DataGenerationMethod::Ones => vec![1; len],
        DataGenerationMethod::Incremented => incremented(dims, max),
    };
    Tensor::new(dtype, dims, data)
}

fn incremented(dims: &[usize], max: i64) -> Vec<i64> {
    let len: usize = dims.iter().product();
    let mut next = 0i64;
    let mut step = || {
        let v = next;
        next = if next >= max { 0 } else { next + 1 };
        v
    };

    let [n, c, h, w] = *dims else {
        return (0..len).map(|_| step()).collect();
    };
    let mut out = vec![0; len];
    for ni in 0..n {
        for hi in 0..h {
            for wi in 0..w {
                for ci in 0..c {
                    out[((ni * c + ci) * h + hi) * w + wi] = step();
                }
            }
        }
    }
    out
}

/// Deterministic producer of golden test cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestGenerator {
    seed: u64,
    method: DataGenerationMethod,
}

impl Default for TestGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED, DataGenerationMethod::default())
    }
}

impl TestGenerator {
    /// Generator with an explicit seed and fill method
    pub const fn new(seed: u64, method: DataGenerationMethod) -> Self {
        Self { seed, method }
    }

    /// Seed every call starts from
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Fill method
    pub const fn method(&self) -> DataGenerationMethod {
        self.method
    }

    /// Build a complete test case for `conf`
    ///
    /// Tensors in `given` are kept (checked against the configuration's
    /// shapes and types); the rest are generated. `given.output` is ignored
    /// since the output is always recomputed. Scale, bias and global shift
    /// are only produced when the configuration uses them.
    ///
    /// # Errors
    ///
    /// Returns error if a given tensor has the wrong shape or does not fit
    /// its configured type.
    pub fn from_config(&self, conf: TestConfiguration, given: TestTensors) -> Result<TestCase> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut fill = |name: &'static str, supplied: Option<Tensor>, dtype: IntegerType, dims: &[usize]| {
            match supplied {
                Some(t) => adopt(name, t, dtype, dims),
                None => generate_data(dtype, dims, self.method, &mut rng),
            }
        };

        let input = fill("input", given.input, conf.in_type(), &conf.input_dims())?;
        let weight = fill("weight", given.weight, conf.weight_type(), &conf.weight_dims())?;

        let (scale, bias) = if conf.has_norm_quant() {
            let scale_type = conf
                .scale_type()
                .ok_or_else(|| NnxError::missing_tensor("scale", "configuration has no scale type"))?;
            let scale = fill("scale", given.scale, scale_type, &conf.channel_dims())?;
            let bias = if conf.has_bias() {
                let bias_type = conf
                    .bias_type()
                    .ok_or_else(|| NnxError::missing_tensor("bias", "configuration has no bias type"))?;
                Some(fill("bias", given.bias, bias_type, &conf.channel_dims())?)
            } else {
                None
            };
            (Some(scale), bias)
        } else {
            (None, None)
        };

        let params = ConvParams::from(&conf);
        let ops = Operands {
            input: &input,
            weight: &weight,
            scale: scale.as_ref(),
            bias: bias.as_ref(),
        };

        let global_shift = if conf.has_norm_quant() {
            let shift = match given.global_shift {
                Some(t) => shift_value(&adopt("global_shift", t, IntegerType::UINT8, &[1])?)?,
                None => functional::select_global_shift(&ops, &params)?,
            };
            Some(shift)
        } else {
            None
        };

        let output = functional::convolution(&ops, &params, global_shift)?;
        tracing::debug!(
            "Generated {} test: input {}, weight {}, output {}",
            conf.accelerator(),
            input.shape(),
            weight.shape(),
            output.shape()
        );

        let global_shift = global_shift
            .map(|s| Tensor::scalar(IntegerType::UINT8, i64::from(s)))
            .transpose()?;
        Ok(TestCase::new(
            conf,
            TestTensors {
                input: Some(input),
                output: Some(output),
                weight: Some(weight),
                scale,
                bias,
                global_shift,
            },
        ))
    }

    /// Regenerate the tensors named in `regen` and keep the others
    ///
    /// The output and the global shift are always recomputed.
    ///
    /// # Errors
    ///
    /// Same as [`TestGenerator::from_config`].
    pub fn regenerate(&self, case: TestCase, regen: &[TensorName]) -> Result<TestCase> {
        let (conf, mut tensors) = case.into_parts();
        for name in regen.iter().copied().chain([TensorName::Output, TensorName::GlobalShift]) {
            tensors.take(name);
        }
        tracing::debug!(
            "Regenerating {} test, keeping {:?}",
            conf.accelerator(),
            tensors.present()
        );
        self.from_config(conf, tensors)
    }
}

fn adopt(name: &'static str, tensor: Tensor, dtype: IntegerType, dims: &[usize]) -> Result<Tensor> {
    tensor.expect_dims(name, dims)?;
    if tensor.dtype() == dtype {
        Ok(tensor)
    } else {
        tensor.retyped(dtype)
    }
}

fn shift_value(tensor: &Tensor) -> Result<u8> {
    let value = tensor.data()[0];
    u8::try_from(value).map_err(|_| NnxError::ValueOutOfRange {
        value,
        index: 0,
        min: 0,
        max: u8::MAX.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawTestConfiguration;
    use crate::shapes::{KernelShape, Padding, Stride};
    use nnx_chip::{Accelerator, WeightMemory};

    fn conf(norm_quant: bool) -> TestConfiguration {
        let raw = RawTestConfiguration {
            in_height: 4,
            in_width: 4,
            in_channel: 8,
            out_channel: 4,
            padding: Padding::uniform(1),
            kernel_shape: KernelShape::K3X3,
            depthwise: false,
            stride: Stride::S1X1,
            in_type: IntegerType::UINT8,
            out_type: if norm_quant { IntegerType::UINT8 } else { IntegerType::INT32 },
            weight_type: IntegerType::INT8,
            scale_type: norm_quant.then_some(IntegerType::UINT8),
            bias_type: norm_quant.then_some(IntegerType::INT32),
            has_norm_quant: norm_quant,
            has_bias: norm_quant,
            has_relu: norm_quant,
            wmem: WeightMemory::Tcdm,
        };
        TestConfiguration::new(Accelerator::Neureka, raw).unwrap()
    }

    #[test]
    fn test_random_excludes_max() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let t = generate_data(IntegerType::UINT8, &[10_000], DataGenerationMethod::Random, &mut rng).unwrap();
        assert!(t.data().iter().all(|&v| (0..255).contains(&v)));
        let t = generate_data(IntegerType::INT8, &[10_000], DataGenerationMethod::Random, &mut rng).unwrap();
        assert!(t.data().iter().all(|&v| (-128..127).contains(&v)));
    }

    #[test]
    fn test_ones() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let t = generate_data(IntegerType::INT32, &[1, 2, 2, 2], DataGenerationMethod::Ones, &mut rng).unwrap();
        assert!(t.data().iter().all(|&v| v == 1));
    }

    #[test]
    fn test_incremented_is_nhwc() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let t = generate_data(IntegerType::UINT8, &[1, 2, 1, 2], DataGenerationMethod::Incremented, &mut rng).unwrap();
        assert_eq!(t.data(), &[0, 2, 1, 3]);
        assert_eq!(t.to_nhwc().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_incremented_wraps_at_max() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let t = generate_data(IntegerType::INT8, &[130], DataGenerationMethod::Incremented, &mut rng).unwrap();
        assert_eq!(t.data()[127], 127);
        assert_eq!(t.data()[128], 0);
        assert_eq!(t.data()[129], 1);
    }

    #[test]
    fn test_method_names() {
        for m in DataGenerationMethod::ALL {
            assert_eq!(m.name().parse::<DataGenerationMethod>().unwrap(), m);
        }
        assert!("gaussian".parse::<DataGenerationMethod>().is_err());
    }

    #[test]
    fn test_same_seed_same_case() {
        let gen = TestGenerator::new(3, DataGenerationMethod::Random);
        let a = gen.from_config(conf(true), TestTensors::default()).unwrap();
        let b = gen.from_config(conf(true), TestTensors::default()).unwrap();
        assert_eq!(a, b);

        let other = TestGenerator::new(4, DataGenerationMethod::Random)
            .from_config(conf(true), TestTensors::default())
            .unwrap();
        assert_ne!(a.input(), other.input());
    }

    #[test]
    fn test_from_config_fills_required_tensors() {
        let plain = TestGenerator::default()
            .from_config(conf(false), TestTensors::default())
            .unwrap();
        assert!(plain.is_valid());
        assert!(plain.scale().is_none());
        assert!(plain.global_shift().is_none());
        assert_eq!(plain.output().unwrap().dtype(), IntegerType::INT32);

        let quant = TestGenerator::default()
            .from_config(conf(true), TestTensors::default())
            .unwrap();
        assert!(quant.is_valid());
        assert_eq!(quant.scale().unwrap().dims(), &[1, 4, 1, 1]);
        assert_eq!(quant.bias().unwrap().dtype(), IntegerType::INT32);
        assert_eq!(quant.global_shift().unwrap().dims(), &[1]);
        assert_eq!(quant.output().unwrap().dims(), &[1, 4, 4, 4]);
        assert_eq!(quant.output().unwrap().dtype(), IntegerType::UINT8);
    }

    #[test]
    fn test_given_tensor_is_kept() {
        let input = Tensor::full(IntegerType::UINT8, [1, 8, 4, 4], 2).unwrap();
        let case = TestGenerator::default()
            .from_config(
                conf(false),
                TestTensors {
                    input: Some(input.clone()),
                    ..TestTensors::default()
                },
            )
            .unwrap();
        assert_eq!(case.input(), Some(&input));
    }

    #[test]
    fn test_given_tensor_shape_checked() {
        let input = Tensor::full(IntegerType::UINT8, [1, 8, 4, 5], 2).unwrap();
        let err = TestGenerator::default()
            .from_config(
                conf(false),
                TestTensors {
                    input: Some(input),
                    ..TestTensors::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, NnxError::Shape { .. }));
    }

    #[test]
    fn test_regenerate_keeps_unnamed_tensors() {
        let gen = TestGenerator::new(1, DataGenerationMethod::Random);
        let case = gen.from_config(conf(true), TestTensors::default()).unwrap();
        let weight = case.weight().cloned();

        let regen = TestGenerator::new(2, DataGenerationMethod::Random)
            .regenerate(case.clone(), &[TensorName::Input])
            .unwrap();
        assert_eq!(regen.weight().cloned(), weight);
        assert_eq!(regen.scale(), case.scale());
        assert_ne!(regen.input(), case.input());
        assert!(regen.is_valid());
    }
}
