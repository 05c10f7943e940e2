//! Assertion Engine and Eventually Loop: evaluates predicates against
//! driver snapshots, decorates failures with nearest-match diagnostics,
//! and retries with snapshot retakes until a deadline or a vision
//! fallback resolves the outcome.

mod engine;
mod nearest;

pub use engine::{AssertEngine, EventuallyOptions, PendingCheck};
pub use nearest::{bigram_similarity, nearest_matches};
