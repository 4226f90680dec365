//! BookBytes Cache
//!
//! Two-tier, stale-while-revalidate storage for provider responses:
//!
//! - **L1 (Hot Store)**: shared, TTL-evicting tier (in-process LRU or Redis)
//! - **L2 (Durable Store)**: Postgres `api_cache` table that survives restarts
//!
//! Reads go L1 → L2 and never fail on a backend outage; a backend error is
//! logged, counted and treated as a miss. Writes land in L1 synchronously and
//! reach L2 through a tracked write-behind task.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! search_ttl_secs = 86400
//! isbn_ttl_secs = 604800
//! work_ttl_secs = 604800
//! revalidate_threshold = 0.2
//! jitter_ratio = 0.1
//! ```

mod config;
mod durable;
mod entry;
mod error;
mod hot;
mod keys;
mod lock;
pub mod metrics;
mod pattern;
mod policy;
mod revalidate;
mod service;

pub use config::CacheConfig;
pub use durable::{DurableStore, NullDurableStore};
pub use entry::{CacheEntry, Payload};
pub use error::{StoreError, Tier};
pub use hot::{HotStore, MemoryHotStore, RedisHotStore, RedisHotStoreConfig, ScanPage};
pub use keys::{CacheCategory, Lookup, LookupParams, build_key, provider_tag};
pub use pattern::{KeyPattern, escape_glob};
pub use policy::{TtlPolicy, staleness_ratio};
pub use revalidate::{RevalidationCoordinator, RevalidationOutcome};
pub use service::{CacheLookup, CacheService};
