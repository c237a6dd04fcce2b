//! # Stage: Static Routing Strategies
//!
//! ## Responsibility
//! Pick a single provider from a candidate set without consulting observed
//! performance. Used when the dynamic weight algorithm is disabled, and
//! reported alongside the DWA policy in statistics.
//!
//! ## Guarantees
//! - Thread-safe: the round-robin cursor is an atomic and the strategy lock
//!   is only held for a copy.
//! - Total: a non-empty candidate set always yields a provider.
//!
//! ## NOT Responsible For
//! - Performance-driven ranking (that belongs to `dwa`)
//! - Load admission (that belongs to `registry`)

pub mod router;
pub mod strategy;

pub use router::StrategyRouter;
pub use strategy::RoutingStrategy;
