//! Rate-limit core: per-key token buckets and failed-login lockout.
//!
//! The store is the only process-resident mutable state in the system. It is
//! sharded by key hash, capped in size, and swept by a background thread.

pub mod bucket;
pub mod config;
pub mod login;
pub mod store;
pub mod sweeper;

pub use bucket::{Bucket, Reservation};
pub use config::{Limit, LockoutPolicy, RateLimitConfig};
pub use login::LoginGuard;
pub use store::{RateLimiter, TokenBucketStore};
pub use sweeper::{Sweep, Sweeper, SweeperHandle};
