//! Domain layer: nests, species counts, rolling stats and the decision.
//!
//! Everything here is synchronous and free of I/O. The service layer
//! drives it from the ingestion path and the rotation timer.

pub mod area_name;
pub mod counts;
pub mod decision;
pub mod geometry;
pub mod matcher;
pub mod nest;
pub mod nest_id;
pub mod region_index;
pub mod rolling;
pub mod species;
pub mod time_period;

pub use area_name::AreaName;
pub use counts::SpeciesCounts;
pub use decision::{CandidateVerdict, Decision, DecisionThresholds, Rejection, decide};
pub use geometry::NestGeometry;
pub use matcher::NestMatcher;
pub use nest::{DiscardReason, Nest, NestStatsInfo, NestStatus, NestingChange, NestingSpecies};
pub use nest_id::NestId;
pub use region_index::RegionIndex;
pub use rolling::{PurgeResult, RollingStats, StatsSnapshot};
pub use species::{Observation, SpeciesKey};
pub use time_period::{FrozenPeriod, GlobalEntry, NestSummary, PeriodCounts, SummaryEntry, TimePeriod};
