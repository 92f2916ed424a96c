//! Fixed-width integer domains
//!
//! An [`IntegerType`] names the element domain of a tensor (`uint8`, `int32`,
//! ...) and provides the two casts the hardware performs: wraparound
//! (keep the low bits) and saturation (clamp to the range).

use crate::error::{NnxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signed or unsigned integer domain of a fixed bit width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IntegerType {
    signed: bool,
    bits: u32,
}

impl IntegerType {
    /// 32-bit signed type
    pub const INT32: Self = Self {
        signed: true,
        bits: 32,
    };

    /// Hardware accumulator type
    pub const ACCUMULATOR: Self = Self {
        signed: true,
        bits: nnx_chip::ACCUMULATOR_BITS,
    };

    /// 8-bit unsigned type
    pub const UINT8: Self = Self {
        signed: false,
        bits: 8,
    };

    /// 8-bit signed type
    pub const INT8: Self = Self {
        signed: true,
        bits: 8,
    };

    /// Create a new integer type
    ///
    /// # Errors
    ///
    /// Returns error if `bits` is outside `1..=64`.
    pub fn new(signed: bool, bits: u32) -> Result<Self> {
        if bits == 0 || bits > 64 {
            return Err(NnxError::InvalidIntegerType {
                name: format!("{}int{bits}", if signed { "" } else { "u" }),
            });
        }
        Ok(Self { signed, bits })
    }

    /// Signed (two's complement) or unsigned
    pub const fn is_signed(&self) -> bool {
        self.signed
    }

    /// Bit width
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Smallest representable value
    pub const fn min(&self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    /// Largest representable value
    pub const fn max(&self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    /// Whether `value` is representable
    pub fn contains(&self, value: i64) -> bool {
        let v = i128::from(value);
        v >= self.min() && v <= self.max()
    }

    /// C type name (`uint8_t`, `int32_t`, ...) for the widths C has
    pub fn ctype(&self) -> Option<String> {
        matches!(self.bits, 8 | 16 | 32 | 64).then(|| format!("{self}_t"))
    }

    /// Non-saturating cast: keep the low `bits` bits and reinterpret them in
    /// this type's signedness
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub const fn wrap(&self, value: i64) -> i64 {
        if self.bits >= 64 {
            return value;
        }
        let mask = (1u64 << self.bits) - 1;
        let low = (value as u64) & mask;
        if self.signed && (low >> (self.bits - 1)) & 1 == 1 {
            (low | !mask) as i64
        } else {
            low as i64
        }
    }

    /// Saturating cast: clamp to `[min, max]`
    #[allow(clippy::cast_possible_truncation)]
    pub fn saturate(&self, value: i64) -> i64 {
        i128::from(value).clamp(self.min(), self.max()) as i64
    }
}

impl fmt::Display for IntegerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}int{}", if self.signed { "" } else { "u" }, self.bits)
    }
}

impl FromStr for IntegerType {
    type Err = NnxError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || NnxError::InvalidIntegerType { name: s.to_string() };
        let (signed, digits) = if let Some(rest) = s.strip_prefix("uint") {
            (false, rest)
        } else if let Some(rest) = s.strip_prefix("int") {
            (true, rest)
        } else {
            return Err(invalid());
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let bits = digits.parse::<u32>().map_err(|_| invalid())?;
        Self::new(signed, bits).map_err(|_| invalid())
    }
}

impl TryFrom<String> for IntegerType {
    type Error = NnxError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IntegerType> for String {
    fn from(value: IntegerType) -> Self {
        value.to_string()
    }
}
