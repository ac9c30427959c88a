//! Bitrate tiers
//!
//! Recommended upload bitrates per vertical resolution:
//!
//! | height | bitrate   |
//! |--------|-----------|
//! | 2160   | 35 Mbps   |
//! | 1440   | 16 Mbps   |
//! | 1080   | 8 Mbps    |
//! | 720    | 5 Mbps    |
//! | 480    | 2.5 Mbps  |
//! | 360    | 1 Mbps    |
//!
//! Values are binary megabits (× 2^20).

use super::{EncodingError, Result};

const MBIT: u32 = 1 << 20;

/// A single (height threshold, bitrate) entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateTier {
    pub height: u32,
    pub bits_per_second: u32,
}

/// Built-in tiers, highest resolution first
pub const BITRATE_TIERS: &[BitrateTier] = &[
    BitrateTier { height: 2160, bits_per_second: 35 * MBIT },
    BitrateTier { height: 1440, bits_per_second: 16 * MBIT },
    BitrateTier { height: 1080, bits_per_second: 8 * MBIT },
    BitrateTier { height: 720, bits_per_second: 5 * MBIT },
    BitrateTier { height: 480, bits_per_second: 5 * MBIT / 2 },
    BitrateTier { height: 360, bits_per_second: MBIT },
];

/// Encoder bitrate used when no mode is known (350 KiB/s)
pub const DEFAULT_BITRATE: u32 = 350 << 3 << 10;

/// Recommended bitrate for a vertical resolution using the built-in table.
pub fn bitrate_for_height(height: u32) -> Result<u32> {
    select_tier(BITRATE_TIERS, height).map(|tier| tier.bits_per_second)
}

/// Pick the tier with the largest threshold not above `height`.
///
/// Heights below every threshold get the lowest tier. Only an empty table fails.
pub fn select_tier(tiers: &[BitrateTier], height: u32) -> Result<BitrateTier> {
    let at_or_below = tiers
        .iter()
        .filter(|tier| tier.height <= height)
        .max_by_key(|tier| tier.height);

    at_or_below
        .or_else(|| tiers.iter().min_by_key(|tier| tier.height))
        .copied()
        .ok_or(EncodingError::NoMatchingTier(height))
}
