//! Error types for golden-vector generation and weight layout coding

use crate::config::Violation;
use nnx_chip::WeightMemory;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for NNX operations
pub type Result<T> = std::result::Result<T, NnxError>;

/// Errors that can occur while validating, computing or coding test data
#[derive(Debug, Error)]
pub enum NnxError {
    /// One or more configuration invariants are violated
    #[error("Invalid test configuration:\n{}", format_violations(.violations))]
    InvalidConfiguration {
        /// Every violated invariant, in check order
        violations: Vec<Violation>,
    },

    /// Tensor rank or dimension inconsistent with what the operation expects
    #[error("Shape error: {reason}")]
    Shape {
        /// Reason for failure
        reason: String,
    },

    /// A tensor the configuration requires was not supplied
    #[error("Missing tensor `{name}`: {reason}")]
    MissingTensor {
        /// Tensor name (`scale`, `bias`, ...)
        name: &'static str,
        /// Why it is required
        reason: String,
    },

    /// Weight-memory destination not available on the selected accelerator
    #[error("Unsupported weight memory `{requested}` (supported: {})", format_list(.supported))]
    UnsupportedWeightMemory {
        /// Requested destination
        requested: WeightMemory,
        /// Destinations the accelerator supports
        supported: Vec<WeightMemory>,
    },

    /// Codec invoked with a bit width outside (1, 8]
    #[error("Unsupported weight bit width {bits} (expected 2..=8)")]
    BitWidth {
        /// Requested bit width
        bits: u32,
    },

    /// Integer type name does not match `(u)int<bits>`
    #[error("Invalid integer type `{name}`: expected (u)int<bits> with 1 <= bits <= 64")]
    InvalidIntegerType {
        /// Offending name
        name: String,
    },

    /// Tensor element outside the representable range of its target domain
    #[error("Value {value} at flat index {index} outside [{min}, {max}]")]
    ValueOutOfRange {
        /// Offending value
        value: i64,
        /// Flat index of the element
        index: usize,
        /// Inclusive lower bound
        min: i128,
        /// Inclusive upper bound
        max: i128,
    },

    /// Name that matches no known tensor slot or generation method
    #[error("Unknown {kind} `{name}` (expected one of: {expected})")]
    UnknownName {
        /// What was being named
        kind: &'static str,
        /// Offending name
        name: String,
        /// Accepted names
        expected: &'static str,
    },

    /// Configuration file has an unknown extension
    #[error("Unsupported configuration file {path}: expected .json or .toml")]
    UnsupportedConfigFormat {
        /// Path that was attempted
        path: PathBuf,
    },

    /// Directory does not hold a persisted test
    #[error("Not a test directory (missing conf.json): {path}")]
    NotATestDir {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {source}")]
    Json {
        /// Underlying serde_json error
        #[from]
        source: serde_json::Error,
    },

    /// TOML parse error
    #[error("TOML error: {source}")]
    Toml {
        /// Underlying toml error
        #[from]
        source: toml::de::Error,
    },
}

impl NnxError {
    /// Create a shape error
    pub fn shape(reason: impl Into<String>) -> Self {
        Self::Shape {
            reason: reason.into(),
        }
    }

    /// Create a missing tensor error
    pub fn missing_tensor(name: &'static str, reason: impl Into<String>) -> Self {
        Self::MissingTensor {
            name,
            reason: reason.into(),
        }
    }

    /// Violations carried by a configuration error, empty for other kinds
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::InvalidConfiguration { violations } => violations,
            _ => &[],
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_list(items: &[WeightMemory]) -> String {
    items
        .iter()
        .map(|w| w.name())
        .collect::<Vec<_>>()
        .join(", ")
}
