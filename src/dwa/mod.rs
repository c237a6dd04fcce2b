//! # Stage: Dynamic Weight Algorithm
//!
//! ## Responsibility
//! Keep rolling performance metrics for every provider and answer "which
//! provider should handle the next unit of work?" under the configured
//! [`SelectionPolicy`].
//!
//! ## Combination rule
//! `accuracy`, `speed` and `availability` are independent, purely additive
//! inputs to the weighted composite score. `availability` additionally gates
//! selection (`> 0` to be selectable) and health (below the configured floor
//! after a failure marks the provider unhealthy). `accuracy` never gates.
//!
//! ## Guarantees
//! - Bounded: `accuracy` and `availability` stay in `[0, 1]` after every update
//! - Isolated: one lock per provider; no lock spans providers
//! - Deterministic ties: fewer consecutive failures, then enumeration order
//! - Non-blocking: selection copies metrics out and scores lock-free
//!
//! ## NOT Responsible For
//! - Credentials and load caps (that belongs to `registry`)
//! - Calling providers (that belongs to `dispatcher`)

pub mod algorithm;
pub mod metrics;
pub mod policy;

pub use algorithm::DynamicWeightAlgorithm;
pub use metrics::ProviderMetrics;
pub use policy::{SelectionPolicy, WeightingFn};
