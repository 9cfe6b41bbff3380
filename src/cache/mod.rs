//! Content-addressed build cache
//!
//! Compiled artifact pairs are keyed by the SHA-256 of the source bytes, so
//! every job that uploads byte-identical source shares one entry and one
//! compilation.
//!
//! # Entry States
//!
//! | State | On disk | Description |
//! |-------|---------|-------------|
//! | Absent | nothing usable | No build yet, or the last one failed |
//! | Building | `lease.json` | One holder is compiling; others wait or poll |
//! | Ready | `artifacts/` | Both files published, never modified again |
//!
//! Failures are not cached: an abandoned or reclaimed entry goes back to
//! absent so the next request retries the build.

pub mod entry;
pub mod key;
pub mod store;

pub use entry::{
    format_bytes, BuildLease, CacheEntryInfo, CacheLookup, CacheState, ClaimOutcome, LeaseRecord,
    PublishOutcome,
};
pub use key::CacheKey;
pub use store::BuildCache;
