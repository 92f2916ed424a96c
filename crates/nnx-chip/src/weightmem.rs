//! Physical weight-memory destinations.
//!
//! The packed weight stream can live in the cluster scratchpad (TCDM), in a
//! dedicated weight SRAM next to the engine, or in non-volatile MRAM. Which
//! of these a variant can fetch from is a property of the silicon, see
//! [`crate::limits`].

use std::fmt;
use std::str::FromStr;

/// Weight-memory destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum WeightMemory {
    /// Tightly-coupled data memory (cluster L1 scratchpad).
    #[default]
    Tcdm,
    /// Dedicated weight SRAM.
    Sram,
    /// Non-volatile magnetoresistive memory.
    Mram,
}

impl WeightMemory {
    /// Every destination.
    pub const ALL: [Self; 3] = [Self::Tcdm, Self::Sram, Self::Mram];

    /// Canonical lowercase name (`tcdm`, `sram`, `mram`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tcdm => "tcdm",
            Self::Sram => "sram",
            Self::Mram => "mram",
        }
    }

    /// Linker placement the firmware emitter attaches to the weight array.
    #[must_use]
    pub const fn section(self) -> &'static str {
        match self {
            Self::Tcdm => "PI_L1",
            Self::Sram => ".weightmem_sram",
            Self::Mram => ".weightmem_mram",
        }
    }
}

impl fmt::Display for WeightMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string names no known weight memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWeightMemoryError(pub String);

impl fmt::Display for ParseWeightMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown weight memory `{}` (expected one of: tcdm, sram, mram)",
            self.0
        )
    }
}

impl std::error::Error for ParseWeightMemoryError {}

impl FromStr for WeightMemory {
    type Err = ParseWeightMemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcdm" => Ok(Self::Tcdm),
            "sram" => Ok(Self::Sram),
            "mram" => Ok(Self::Mram),
            _ => Err(ParseWeightMemoryError(s.to_string())),
        }
    }
}
