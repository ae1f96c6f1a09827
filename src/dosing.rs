//! dilution and dosing helpers behind the how-to-use page.
//!
//! - bleach shock dosing: how many parts of water to mix with one part bleach
//!   of a given strength to land near the 0.75% target.
//! - LineTab tablets: one tablet per 0.7 L of water, rounded up.

use std::fmt;

use crate::error::DosingError;

/// sodium hypochlorite strength the shock mix aims for, in percent.
pub const TARGET_CONCENTRATION: f64 = 0.75;

/// liters of water one tablet treats.
pub const LITERS_PER_TABLET: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BleachRatio {
    pub bleach_parts: u32,
    pub water_parts: u32,
}

impl fmt::Display for BleachRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} part bleach with {} parts water", self.bleach_parts, self.water_parts)
    }
}

/// one part bleach to `round(c / 0.75 - 1)` parts water.
pub fn bleach_ratio(concentration_percent: f64) -> Result<BleachRatio, DosingError> {
    let c = concentration_percent;
    if !c.is_finite() || c <= 0.0 {
        return Err(DosingError::InvalidConcentration(c));
    }
    if c <= TARGET_CONCENTRATION {
        return Err(DosingError::BelowTarget { given: c, target: TARGET_CONCENTRATION });
    }
    let water = (c / TARGET_CONCENTRATION - 1.0).round();
    // just above target rounds to zero parts water; still a valid mix
    Ok(BleachRatio { bleach_parts: 1, water_parts: water.max(0.0) as u32 })
}

pub fn tablets_for_volume(liters: f64) -> Result<u32, DosingError> {
    if !liters.is_finite() || liters <= 0.0 {
        return Err(DosingError::InvalidVolume(liters));
    }
    let tablets = (liters / LITERS_PER_TABLET).ceil();
    if tablets > f64::from(u32::MAX) {
        return Err(DosingError::InvalidVolume(liters));
    }
    Ok(tablets as u32)
}
