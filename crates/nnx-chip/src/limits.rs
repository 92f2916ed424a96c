//! Per-variant operating limits.
//!
//! What each engine accepts: kernel sizes, strides, element types and
//! weight-memory destinations. Types are given by name (`uint8`, `int32`, …)
//! so this crate stays free of any type machinery.

use crate::{Accelerator, WeightMemory};

/// Operating limits of one accelerator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Supported square kernel sides.
    pub kernels: &'static [usize],
    /// Supported square strides.
    pub strides: &'static [usize],
    /// Input activation types.
    pub in_types: &'static [&'static str],
    /// Output activation types (`int32` is only reachable without norm/quant).
    pub out_types: &'static [&'static str],
    /// Weight types.
    pub weight_types: &'static [&'static str],
    /// Per-channel scale types.
    pub scale_types: &'static [&'static str],
    /// Per-channel bias types.
    pub bias_types: &'static [&'static str],
    /// Weight-memory destinations the weight fetcher can read from.
    pub weight_memories: &'static [WeightMemory],
}

const KERNELS: &[usize] = &[1, 3];
const OUT_TYPES: &[&str] = &["uint8", "int8", "int32"];
const WEIGHT_TYPES: &[&str] = &["int8"];
const SCALE_TYPES: &[&str] = &["uint8", "uint32"];
const BIAS_TYPES: &[&str] = &["int32"];

/// NE16 limits.
pub const NE16: Limits = Limits {
    kernels: KERNELS,
    strides: &[1, 2],
    in_types: &["uint8"],
    out_types: OUT_TYPES,
    weight_types: WEIGHT_TYPES,
    scale_types: SCALE_TYPES,
    bias_types: BIAS_TYPES,
    weight_memories: &[WeightMemory::Tcdm],
};

/// Neureka limits.
pub const NEUREKA: Limits = Limits {
    kernels: KERNELS,
    strides: &[1],
    in_types: &["uint8", "int8"],
    out_types: OUT_TYPES,
    weight_types: WEIGHT_TYPES,
    scale_types: SCALE_TYPES,
    bias_types: BIAS_TYPES,
    weight_memories: &[WeightMemory::Tcdm, WeightMemory::Sram],
};

/// Neureka v2 limits.
pub const NEUREKA_V2: Limits = Limits {
    kernels: KERNELS,
    strides: &[1],
    in_types: &["uint8", "int8"],
    out_types: OUT_TYPES,
    weight_types: WEIGHT_TYPES,
    scale_types: SCALE_TYPES,
    bias_types: BIAS_TYPES,
    weight_memories: &[WeightMemory::Tcdm, WeightMemory::Sram, WeightMemory::Mram],
};

impl Accelerator {
    /// Operating limits of this variant.
    #[must_use]
    pub const fn limits(self) -> &'static Limits {
        match self {
            Self::Ne16 => &NE16,
            Self::Neureka => &NEUREKA,
            Self::NeurekaV2 => &NEUREKA_V2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ne16_strides_by_two() {
        assert!(Accelerator::Ne16.limits().strides.contains(&2));
        assert!(!Accelerator::Neureka.limits().strides.contains(&2));
        assert!(!Accelerator::NeurekaV2.limits().strides.contains(&2));
    }

    #[test]
    fn every_variant_reads_tcdm() {
        for accel in Accelerator::ALL {
            assert!(accel.limits().weight_memories.contains(&WeightMemory::Tcdm));
        }
    }

    #[test]
    fn accumulator_type_is_a_valid_output() {
        let name = format!("int{}", crate::ACCUMULATOR_BITS);
        for accel in Accelerator::ALL {
            assert!(accel.limits().out_types.contains(&name.as_str()));
        }
    }
}
