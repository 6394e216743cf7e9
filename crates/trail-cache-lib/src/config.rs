//! Cache configuration

use crate::cell::{MAX_LEVEL, Tier};
use crate::{CacheError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Subdivision depth and activation zoom of one tier
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TierConfig {
    /// Cell level the viewport is covered at
    pub level: u8,
    /// Lowest zoom at which the tier is fetched
    pub min_zoom: f64,
}

/// Configuration for the fetch scheduler
///
/// Tiers are indexed by [`Tier::index`] and must get strictly deeper from overview to fine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheConfig {
    /// Maximum number of fetches running at once (default 16)
    pub max_requests_in_flight: usize,
    /// Overview, coarse and fine tier settings
    pub tiers: [TierConfig; 3],
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_requests_in_flight: 16,
            tiers: [
                TierConfig {
                    level: 7,
                    min_zoom: 0.0,
                },
                TierConfig {
                    level: 8,
                    min_zoom: 10.0,
                },
                TierConfig {
                    level: 10,
                    min_zoom: 12.0,
                },
            ],
        }
    }
}

impl CacheConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        &self.tiers[tier.index()]
    }

    /// Whether `tier` is fetched at `zoom`; the overview tier always is
    pub fn is_active(&self, tier: Tier, zoom: f64) -> bool {
        tier == Tier::Overview || zoom >= self.tier(tier).min_zoom
    }

    /// Finest tier fetched at `zoom`
    pub fn finest_active(&self, zoom: f64) -> Tier {
        Tier::ALL
            .into_iter()
            .rev()
            .find(|tier| self.is_active(*tier, zoom))
            .unwrap_or(Tier::Overview)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests_in_flight == 0 {
            return Err(CacheError::InvalidConfig(
                "max_requests_in_flight must be at least 1".to_owned(),
            ));
        }
        for pair in self.tiers.windows(2) {
            if pair[1].level <= pair[0].level {
                return Err(CacheError::InvalidConfig(format!(
                    "tier levels must increase, got {} then {}",
                    pair[0].level, pair[1].level
                )));
            }
        }
        if let Some(tier) = self.tiers.iter().find(|tier| tier.level > MAX_LEVEL) {
            return Err(CacheError::InvalidConfig(format!(
                "tier level {} exceeds {MAX_LEVEL}",
                tier.level
            )));
        }
        Ok(())
    }
}
