//! Accelerator variant tag.
//!
//! Two hardware families exist: NE16 and Neureka. Neureka has a second
//! revision with a wider weight port and a uniform channel subtile.

use std::fmt;
use std::str::FromStr;

/// Accelerator variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accelerator {
    /// NE16: 16-channel subtile, stride 2×2 capable.
    Ne16,
    /// Neureka: 28/32-channel subtile, 256-bit weight port.
    Neureka,
    /// Neureka v2: 32-channel subtile, 288-bit weight port.
    NeurekaV2,
}

impl Accelerator {
    /// Every known variant, in hardware generation order.
    pub const ALL: [Self; 3] = [Self::Ne16, Self::Neureka, Self::NeurekaV2];

    /// Canonical lowercase name (`ne16`, `neureka`, `neureka_v2`).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ne16 => "ne16",
            Self::Neureka => "neureka",
            Self::NeurekaV2 => "neureka_v2",
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string names no known accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAcceleratorError(pub String);

impl fmt::Display for ParseAcceleratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown accelerator `{}` (expected one of: ne16, neureka, neureka_v2)",
            self.0
        )
    }
}

impl std::error::Error for ParseAcceleratorError {}

impl FromStr for Accelerator {
    type Err = ParseAcceleratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ne16" => Ok(Self::Ne16),
            "neureka" => Ok(Self::Neureka),
            "neureka_v2" | "neureka-v2" | "neurekav2" => Ok(Self::NeurekaV2),
            _ => Err(ParseAcceleratorError(s.to_string())),
        }
    }
}
