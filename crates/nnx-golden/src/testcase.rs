//! Test cases and their on-disk form
//!
//! A test directory holds `conf.json` plus one JSON document per tensor:
//!
//! | File | Tensor | Present |
//! |------|--------|---------|
//! | `input.json` | `(1, Cin, H, W)` activations | always |
//! | `weight.json` | `(Cout, Cin / groups, kh, kw)` signed weights | always |
//! | `output.json` | `(1, Cout, Ho, Wo)` golden output | always |
//! | `scale.json` | `(1, Cout, 1, 1)` | with norm/quant |
//! | `bias.json` | `(1, Cout, 1, 1)` | with bias |
//! | `global_shift.json` | `[1]` uint8 | with norm/quant |
//!
//! A directory containing only `conf.json` still loads; regeneration fills
//! in the rest.

use crate::config::{RawTestConfiguration, TestConfiguration};
use crate::error::{NnxError, Result};
use crate::tensor::Tensor;
use nnx_chip::Accelerator;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Configuration file every test directory contains
pub const CONF_FILE: &str = "conf.json";

/// Named tensor slot of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorName {
    /// Input activations
    Input,
    /// Golden output
    Output,
    /// Weights
    Weight,
    /// Per-channel scale
    Scale,
    /// Per-channel bias
    Bias,
    /// Requantization right shift
    GlobalShift,
}

impl TensorName {
    /// Every slot, in file order
    pub const ALL: [Self; 6] = [
        Self::Input,
        Self::Output,
        Self::Weight,
        Self::Scale,
        Self::Bias,
        Self::GlobalShift,
    ];

    /// Snake-case name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Weight => "weight",
            Self::Scale => "scale",
            Self::Bias => "bias",
            Self::GlobalShift => "global_shift",
        }
    }

    /// File the tensor is persisted in
    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for TensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TensorName {
    type Err = NnxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| NnxError::UnknownName {
                kind: "tensor",
                name: s.to_string(),
                expected: "input, output, weight, scale, bias, global_shift",
            })
    }
}

/// The tensors of a test case, any of which may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestTensors {
    /// Input activations
    pub input: Option<Tensor>,
    /// Golden output
    pub output: Option<Tensor>,
    /// Weights
    pub weight: Option<Tensor>,
    /// Per-channel scale
    pub scale: Option<Tensor>,
    /// Per-channel bias
    pub bias: Option<Tensor>,
    /// Requantization right shift
    pub global_shift: Option<Tensor>,
}

impl TestTensors {
    /// Slot for `name`
    pub const fn get(&self, name: TensorName) -> Option<&Tensor> {
        match name {
            TensorName::Input => self.input.as_ref(),
            TensorName::Output => self.output.as_ref(),
            TensorName::Weight => self.weight.as_ref(),
            TensorName::Scale => self.scale.as_ref(),
            TensorName::Bias => self.bias.as_ref(),
            TensorName::GlobalShift => self.global_shift.as_ref(),
        }
    }

    fn slot_mut(&mut self, name: TensorName) -> &mut Option<Tensor> {
        match name {
            TensorName::Input => &mut self.input,
            TensorName::Output => &mut self.output,
            TensorName::Weight => &mut self.weight,
            TensorName::Scale => &mut self.scale,
            TensorName::Bias => &mut self.bias,
            TensorName::GlobalShift => &mut self.global_shift,
        }
    }

    /// Remove and return the tensor in slot `name`
    pub fn take(&mut self, name: TensorName) -> Option<Tensor> {
        self.slot_mut(name).take()
    }

    /// Put `tensor` in slot `name`
    pub fn set(&mut self, name: TensorName, tensor: Tensor) {
        *self.slot_mut(name) = Some(tensor);
    }

    /// Names of the filled slots
    pub fn present(&self) -> Vec<TensorName> {
        TensorName::ALL
            .into_iter()
            .filter(|&n| self.get(n).is_some())
            .collect()
    }
}

/// A configuration with its (possibly partial) golden tensors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    configuration: TestConfiguration,
    tensors: TestTensors,
}

impl TestCase {
    /// Pair a configuration with tensors
    pub const fn new(configuration: TestConfiguration, tensors: TestTensors) -> Self {
        Self {
            configuration,
            tensors,
        }
    }

    /// Validated configuration
    pub const fn configuration(&self) -> &TestConfiguration {
        &self.configuration
    }

    /// All tensor slots
    pub const fn tensors(&self) -> &TestTensors {
        &self.tensors
    }

    /// Split into configuration and tensors
    pub fn into_parts(self) -> (TestConfiguration, TestTensors) {
        (self.configuration, self.tensors)
    }

    /// Input activations
    pub const fn input(&self) -> Option<&Tensor> {
        self.tensors.input.as_ref()
    }

    /// Golden output
    pub const fn output(&self) -> Option<&Tensor> {
        self.tensors.output.as_ref()
    }

    /// Weights
    pub const fn weight(&self) -> Option<&Tensor> {
        self.tensors.weight.as_ref()
    }

    /// Per-channel scale
    pub const fn scale(&self) -> Option<&Tensor> {
        self.tensors.scale.as_ref()
    }

    /// Per-channel bias
    pub const fn bias(&self) -> Option<&Tensor> {
        self.tensors.bias.as_ref()
    }

    /// Global shift tensor
    pub const fn global_shift(&self) -> Option<&Tensor> {
        self.tensors.global_shift.as_ref()
    }

    /// Global shift as a number, 0 when absent
    pub fn global_shift_value(&self) -> i64 {
        self.global_shift()
            .and_then(|t| t.data().first().copied())
            .unwrap_or(0)
    }

    /// Every tensor the configuration's flags require is present
    ///
    /// # Errors
    ///
    /// Returns [`NnxError::MissingTensor`] for the first absent one.
    pub fn check_valid(&self) -> Result<()> {
        let conf = &self.configuration;
        let required = [
            (TensorName::Input, true, "always required"),
            (TensorName::Output, true, "always required"),
            (TensorName::Weight, true, "always required"),
            (TensorName::Scale, conf.has_norm_quant(), "required with norm/quant"),
            (TensorName::Bias, conf.has_bias(), "required with bias"),
            (TensorName::GlobalShift, conf.has_norm_quant(), "required with norm/quant"),
        ];
        for (name, needed, why) in required {
            if needed && self.tensors.get(name).is_none() {
                return Err(NnxError::missing_tensor(name.name(), why));
            }
        }
        Ok(())
    }

    /// Whether [`TestCase::check_valid`] passes
    pub fn is_valid(&self) -> bool {
        self.check_valid().is_ok()
    }

    /// Whether `dir` holds a persisted test
    pub fn is_test_dir<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(CONF_FILE).is_file()
    }

    /// Write `conf.json` and every present tensor into `dir`, creating it
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(CONF_FILE), self.configuration.raw().to_json_pretty()?)?;

        for name in TensorName::ALL {
            let path = dir.join(name.file_name());
            match self.tensors.get(name) {
                Some(tensor) => std::fs::write(&path, serde_json::to_string(tensor)?)?,
                // Stale tensors from an earlier configuration must not be reloaded
                None if path.is_file() => std::fs::remove_file(&path)?,
                None => {}
            }
        }

        tracing::info!(
            "Saved {} test to {} ({})",
            self.configuration.accelerator(),
            dir.display(),
            self.tensors
                .present()
                .iter()
                .map(|n| n.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Read a test directory written by [`TestCase::save`]
    ///
    /// Missing tensor files leave their slot empty.
    ///
    /// # Errors
    ///
    /// Returns [`NnxError::NotATestDir`] without `conf.json`, or error if the
    /// configuration is invalid for `accelerator` or a file cannot be parsed.
    pub fn load<P: AsRef<Path>>(accelerator: Accelerator, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !Self::is_test_dir(dir) {
            return Err(NnxError::NotATestDir {
                path: dir.to_path_buf(),
            });
        }

        let raw = RawTestConfiguration::from_json_str(&std::fs::read_to_string(dir.join(CONF_FILE))?)?;
        let configuration = TestConfiguration::new(accelerator, raw)?;

        let mut tensors = TestTensors::default();
        for name in TensorName::ALL {
            let path = dir.join(name.file_name());
            if path.is_file() {
                let tensor: Tensor = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                tensors.set(name, tensor);
            }
        }

        tracing::debug!(
            "Loaded {accelerator} test from {} with {:?}",
            dir.display(),
            tensors.present()
        );
        Ok(Self::new(configuration, tensors))
    }
}
