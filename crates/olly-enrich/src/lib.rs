//! Olly Enrich - correlation id stamping for the ingest pipeline
//!
//! - `authority`: resolves, derives and generates correlation ids
//! - `cardinality`: sliding-window distinct-value guard
//! - `normalize`: URL path templating and HTTP method folding
//! - `stage`: the batch processor that ties them together

pub mod authority;
pub mod cardinality;
pub mod clock;
pub mod normalize;
pub mod stage;

pub use authority::{IdAuthority, IdHints, Provenance, Resolution, ResolveOutcome};
pub use cardinality::{AttributeStats, CardinalityGuard, OVERFLOW_VALUE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use stage::EnrichmentStage;
