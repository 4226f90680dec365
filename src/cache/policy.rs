//! Freshness policy: TTL jitter, category defaults and staleness checks.

use std::time::Duration;

use rand::Rng;

use super::keys::CacheCategory;

/// Shortest lifetime any tier is asked to hold an entry.
pub const MIN_TTL: Duration = Duration::from_secs(1);

pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_ISBN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_WORK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_REVALIDATE_THRESHOLD: f64 = 0.2;
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    pub search_ttl: Duration,
    pub isbn_ttl: Duration,
    pub work_ttl: Duration,
    /// Remaining/original lifetime ratio below which an entry is stale.
    pub revalidate_threshold: f64,
    /// Half-width of the symmetric jitter band applied on `set`.
    pub jitter_ratio: f64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            search_ttl: DEFAULT_SEARCH_TTL,
            isbn_ttl: DEFAULT_ISBN_TTL,
            work_ttl: DEFAULT_WORK_TTL,
            revalidate_threshold: DEFAULT_REVALIDATE_THRESHOLD,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl TtlPolicy {
    pub fn category_ttl(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Search => self.search_ttl,
            CacheCategory::Isbn => self.isbn_ttl,
            CacheCategory::Work => self.work_ttl,
        }
    }

    /// Default TTL for a key, chosen by its category prefix.
    ///
    /// Keys with an unknown prefix get the search default.
    pub fn ttl_for_key(&self, key: &str) -> Duration {
        CacheCategory::from_key(key).map_or(self.search_ttl, |category| self.category_ttl(category))
    }

    /// `base × (1 + uniform(−ratio, ratio))`, floored at [`MIN_TTL`].
    pub fn jittered(&self, base: Duration) -> Duration {
        let ratio = self.jitter_ratio.abs();
        let offset = rand::thread_rng().gen_range(-ratio..=ratio);
        scale(base, 1.0 + offset)
    }

    /// TTL for an L1 copy repopulated from a durable record.
    ///
    /// Jittered downward only and never above `remaining`, so the copy
    /// never outlives the record.
    pub fn repopulation_ttl(&self, remaining: Duration) -> Duration {
        let ratio = self.jitter_ratio.abs();
        let shrink = rand::thread_rng().gen_range(0.0..=ratio);
        scale(remaining, 1.0 - shrink).min(remaining)
    }

    pub fn needs_revalidation(&self, remaining: Duration, original: Duration) -> bool {
        staleness_ratio(remaining, original) < self.revalidate_threshold
    }
}

/// `remaining / original`; zero when the original lifetime is zero.
pub fn staleness_ratio(remaining: Duration, original: Duration) -> f64 {
    if original.is_zero() {
        return 0.0;
    }
    remaining.as_secs_f64() / original.as_secs_f64()
}

fn scale(base: Duration, factor: f64) -> Duration {
    let factor = if factor.is_finite() { factor.max(0.0) } else { 1.0 };
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .unwrap_or(base)
        .max(MIN_TTL)
}
