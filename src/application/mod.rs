//! Application services built on the cache core.

pub mod error;
pub mod invalidation;
pub mod jobs;
pub mod lookup;
