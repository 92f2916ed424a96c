#![deny(unsafe_code)]

//! Golden test vectors for the NNX convolution accelerators
//!
//! This crate produces bit-exact reference data for NE16, Neureka and
//! Neureka v2 and encodes weights into the layout each accelerator reads
//! from its weight memory.
//!
//! # Pipeline
//!
//! - **Configuration**: a layer description read from JSON or TOML and
//!   checked against every invariant of the target accelerator
//! - **Generation**: seeded input/weight/scale/bias tensors
//! - **Functional model**: integer convolution, 32-bit wrapping accumulator,
//!   scale, bias, ReLU, shift and saturating output cast
//! - **Weight layout**: per-accelerator bit packing of the weight tensor
//! - **Persistence**: `conf.json` plus one JSON file per tensor
//!
//! # Example
//!
//! ```no_run
//! use nnx_golden::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let conf = TestConfiguration::from_path(Accelerator::Neureka, "conf.toml")?;
//! let case = TestGenerator::default().from_config(conf, TestTensors::default())?;
//! case.save("tests/conv3x3")?;
//!
//! let packed = pack_weights(&case)?;
//! packed.write_bin("tests/conv3x3/weight.bin")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
mod error;
pub mod functional;
pub mod generate;
mod integer;
mod shapes;
mod summary;
mod tensor;
pub mod testcase;
pub mod weights;

pub use config::{RawTestConfiguration, Rule, TestConfiguration, Violation};
pub use error::{NnxError, Result};
pub use functional::{accumulate, convolution, select_global_shift, ConvParams, Operands};
pub use generate::{DataGenerationMethod, TestGenerator, DEFAULT_SEED};
pub use integer::IntegerType;
pub use nnx_chip::{Accelerator, WeightMemory};
pub use shapes::{conv_output_size, padded_size, KernelShape, Padding, Shape, Stride};
pub use summary::{ActivationSummary, LayerSummary, WeightSummary};
pub use tensor::Tensor;
pub use testcase::{TensorName, TestCase, TestTensors, CONF_FILE};
pub use weights::{
    layout_for, pack_weights, to_signed, to_unsigned, Ne16Layout, NeurekaLayout,
    NeurekaV2Layout, PackedWeights, WeightDims, WeightLayout,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        pack_weights, Accelerator, IntegerType, LayerSummary, Result, Tensor, TensorName,
        TestCase, TestConfiguration, TestGenerator, TestTensors, WeightLayout, WeightMemory,
    };
}
