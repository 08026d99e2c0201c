//! Query side: weights, partial queries, fused ranking and the result cache.

mod cache;
mod fusion;
mod query;
mod weights;

pub use cache::{CacheStats, Fingerprint, ResultCache};
pub use fusion::{FusionRetriever, RankedHit, Ranking};
pub use query::{BugQuery, QueryShape};
pub use weights::{AbsentFieldPolicy, FieldWeights};
