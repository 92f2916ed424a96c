//! Silicon model for the NNX convolution accelerators (NE16, Neureka, Neureka v2).
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what the golden-vector tooling needs to know about each
//! accelerator: the variant tags, the weight-memory destinations, the
//! weight-layout constants, and the per-variant operating limits.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`accelerator`] | `Accelerator` variant tag and name parsing |
//! | [`weightmem`] | Physical weight-memory destinations and linker sections |
//! | [`layout`] | Channel subtiles and weight bandwidth per variant |
//! | [`limits`] | Supported strides, kernels, element types and destinations |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod accelerator;
pub mod layout;
pub mod limits;
pub mod weightmem;

pub use accelerator::{Accelerator, ParseAcceleratorError};
pub use weightmem::{ParseWeightMemoryError, WeightMemory};

/// Bit width of the hardware accumulator (signed, non-saturating).
pub const ACCUMULATOR_BITS: u32 = 32;
