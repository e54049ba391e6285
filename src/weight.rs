//! The host weight function.
//!
//! Weights bias random selection toward hosts that are cheap on the axes a
//! profile cares about, have a good uptime record, and have been around
//! long enough to be trusted. The weight is a pure function of the entry,
//! the profile, and the current block height, so a profile change can
//! deterministically re-weight a whole tree.

use crate::profile::Profile;
use crate::types::{BlockHeight, Currency, HostEntry};

/// Blocks over which a new host's weight ramps up linearly to full value,
/// roughly one day's worth of blocks.
pub const AGE_RAMP_BLOCKS: u64 = 144;

/// Substitute for a zero unit price so weights stay finite and positive.
pub const ZERO_PRICE_SUBSTITUTE: f64 = 0.001;

/// Inverse of a unit price as a float.
fn inv_price(price: Currency) -> f64 {
    let price = if price == 0 {
        ZERO_PRICE_SUBSTITUTE
    } else {
        price as f64
    };
    1.0 / price
}

impl Profile {
    /// Weight of `entry` under this profile at the given block height.
    ///
    /// Price axes are penalised by the inverse k-th power, with k taken
    /// from the tier's exponents. The result is scaled by the squared
    /// historic uptime ratio and the age ramp, and forced to zero when the
    /// host's resolved country falls outside the profile's locations.
    pub fn weight_of(&self, entry: &HostEntry, height: BlockHeight) -> f64 {
        if !self.allows_country(entry.country.as_deref()) {
            return 0.0;
        }

        let (storage_exp, upload_exp, download_exp) = self.storage_tier.price_exponents();
        let price_weight = inv_price(entry.settings.storage_price).powi(storage_exp)
            * inv_price(entry.settings.upload_price).powi(upload_exp)
            * inv_price(entry.settings.download_price).powi(download_exp);

        let uptime = entry.uptime_ratio();
        let age = (entry.age_blocks(height) as f64 / AGE_RAMP_BLOCKS as f64).min(1.0);

        price_weight * uptime * uptime * age
    }
}
