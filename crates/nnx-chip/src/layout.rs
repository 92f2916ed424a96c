//! Weight-memory layout constants.
//!
//! Every variant streams weights bit-plane by bit-plane: for each output
//! channel and each block of `cin_subtile` input channels, bit `b` of every
//! weight in the block is fetched before bit `b + 1`. The variants differ in
//! the block size, in how wide one fetch is, and (Neureka 1×1 only) in how
//! the block is interleaved.
//!
//! | Variant | Subtile 1×1 | Subtile 3×3 | Weight port | Row padding |
//! |---------|-------------|-------------|-------------|-------------|
//! | NE16 | 16 | 16 | - | none |
//! | Neureka | 32 | 28 | 256 bit | 3×3 rows to 256 |
//! | Neureka v2 | 32 | 32 | 288 bit | none (9 × 32 = 288) |

use crate::Accelerator;

/// NE16 input-channel subtile (both kernel shapes).
pub const NE16_CIN_SUBTILE: usize = 16;

/// Neureka weight port width in bits.
pub const NEUREKA_WEIGHT_BANDWIDTH: usize = 256;
/// Neureka input-channel subtile for 1×1 kernels.
pub const NEUREKA_CIN_SUBTILE_1X1: usize = 32;
/// Neureka input-channel subtile for 3×3 kernels (9 × 28 = 252 ≤ 256).
pub const NEUREKA_CIN_SUBTILE_3X3: usize = 28;

/// Neureka 1×1 interleave: the subtile is split into lanes of this many channels.
pub const NEUREKA_1X1_LANE: usize = 4;
/// Neureka 1×1 interleave: bit planes are padded to this count.
pub const NEUREKA_1X1_PLANES: usize = 8;

/// Neureka v2 weight port width in bits.
pub const NEUREKA_V2_WEIGHT_BANDWIDTH: usize = 288;
/// Neureka v2 input-channel subtile (both kernel shapes).
pub const NEUREKA_V2_CIN_SUBTILE: usize = 32;

/// Input-channel subtile for `accelerator` with a square kernel of side `kernel`.
#[must_use]
pub const fn cin_subtile(accelerator: Accelerator, kernel: usize) -> usize {
    match accelerator {
        Accelerator::Ne16 => NE16_CIN_SUBTILE,
        Accelerator::Neureka => {
            if kernel == 3 {
                NEUREKA_CIN_SUBTILE_3X3
            } else {
                NEUREKA_CIN_SUBTILE_1X1
            }
        }
        Accelerator::NeurekaV2 => NEUREKA_V2_CIN_SUBTILE,
    }
}

/// Weight port width in bits, if the variant pads rows to it.
#[must_use]
pub const fn weight_bandwidth(accelerator: Accelerator) -> Option<usize> {
    match accelerator {
        Accelerator::Ne16 => None,
        Accelerator::Neureka => Some(NEUREKA_WEIGHT_BANDWIDTH),
        Accelerator::NeurekaV2 => Some(NEUREKA_V2_WEIGHT_BANDWIDTH),
    }
}
