//! Nesting-species decision.
//!
//! A nest's top candidates (by count inside the nest) are checked against
//! a fixed sequence of thresholds. The first candidate that passes every
//! check is the nesting species.

use std::fmt;

use chrono::TimeDelta;

use super::time_period::{NestSummary, SummaryEntry};
use super::NestingSpecies;

/// Only this many top entries of a summary are considered.
pub const MAX_CANDIDATES: usize = 10;

/// Thresholds a candidate must meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionThresholds {
    /// Minimum share of the nest's observations, in percent.
    pub min_nest_pct: f64,
    /// Minimum `nest_pct / global_pct`.
    pub min_nest_to_global_ratio: f64,
    /// Maximum global share in percent; 0 disables the check.
    pub max_global_pct: f64,
    /// Minimum observations inside the nest, all species.
    pub min_total_observations: u64,
    /// Minimum observations of the candidate inside the nest.
    pub min_nest_observations: u64,
    /// Minimum stats window.
    pub min_history: TimeDelta,
}

/// The first check a candidate failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// The entry carries no observations at all.
    NoObservations,
    /// Share of the nest below `min_nest_pct`.
    NestPctTooLow {
        /// Candidate share of the nest.
        nest_pct: f64,
        /// Threshold.
        min: f64,
    },
    /// Share of the nest below the candidate's global share.
    NestPctBelowGlobal {
        /// Candidate share of the nest.
        nest_pct: f64,
        /// Candidate global share.
        global_pct: f64,
    },
    /// Nest-to-global ratio below threshold.
    RatioTooLow {
        /// Candidate ratio.
        ratio: f64,
        /// Threshold.
        min: f64,
    },
    /// Globally too common.
    GlobalPctTooHigh {
        /// Candidate global share.
        global_pct: f64,
        /// Threshold.
        max: f64,
    },
    /// Too few observations in the nest overall.
    TotalTooLow {
        /// Observations in the nest.
        total: u64,
        /// Threshold.
        min: u64,
    },
    /// Too few observations of the candidate.
    CountTooLow {
        /// Candidate observations.
        count: u64,
        /// Threshold.
        min: u64,
    },
    /// Stats window shorter than the minimum history.
    HistoryTooShort {
        /// Window length.
        duration: TimeDelta,
        /// Threshold.
        min: TimeDelta,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoObservations => write!(f, "no observations"),
            Self::NestPctTooLow { nest_pct, min } => {
                write!(f, "nest pct {nest_pct:.3} < {min:.3}")
            }
            Self::NestPctBelowGlobal {
                nest_pct,
                global_pct,
            } => write!(f, "nest pct {nest_pct:.3} < global pct {global_pct:.3}"),
            Self::RatioTooLow { ratio, min } => {
                write!(f, "nest/global pct ratio {ratio:.3} < {min:.3}")
            }
            Self::GlobalPctTooHigh { global_pct, max } => {
                write!(f, "global pct {global_pct:.3} > {max:.3}")
            }
            Self::TotalTooLow { total, min } => write!(f, "nest total {total} < {min}"),
            Self::CountTooLow { count, min } => write!(f, "nest count {count} < {min}"),
            Self::HistoryTooShort { duration, min } => write!(
                f,
                "stats duration {}m < {}m",
                duration.num_minutes(),
                min.num_minutes()
            ),
        }
    }
}

/// How one candidate fared.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateVerdict {
    /// The summary row.
    pub entry: SummaryEntry,
    /// Share of the nest, in percent.
    pub nest_pct: f64,
    /// Share globally, in percent.
    pub global_pct: f64,
    /// `nest_pct / global_pct`, 0 when the global share is 0.
    pub ratio: f64,
    /// First failed check; `None` means the candidate qualifies.
    pub rejection: Option<Rejection>,
}

/// Outcome of a decision over one nest summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Every candidate considered, in rank order.
    pub candidates: Vec<CandidateVerdict>,
    /// The nesting species, if a candidate qualified.
    pub nesting: Option<NestingSpecies>,
}

fn evaluate(
    entry: &SummaryEntry,
    duration: TimeDelta,
    thresholds: &DecisionThresholds,
) -> CandidateVerdict {
    let nest_pct = entry.nest_pct();
    let global_pct = entry.global_pct();
    let ratio = if global_pct > 0.0 {
        nest_pct / global_pct
    } else {
        0.0
    };

    let rejection = if entry.count == 0 || entry.total == 0 || entry.global_total == 0 {
        Some(Rejection::NoObservations)
    } else if nest_pct < thresholds.min_nest_pct {
        Some(Rejection::NestPctTooLow {
            nest_pct,
            min: thresholds.min_nest_pct,
        })
    } else if nest_pct < global_pct {
        Some(Rejection::NestPctBelowGlobal {
            nest_pct,
            global_pct,
        })
    } else if ratio < thresholds.min_nest_to_global_ratio {
        Some(Rejection::RatioTooLow {
            ratio,
            min: thresholds.min_nest_to_global_ratio,
        })
    } else if thresholds.max_global_pct > 0.0 && global_pct > thresholds.max_global_pct {
        Some(Rejection::GlobalPctTooHigh {
            global_pct,
            max: thresholds.max_global_pct,
        })
    } else if entry.total < thresholds.min_total_observations {
        Some(Rejection::TotalTooLow {
            total: entry.total,
            min: thresholds.min_total_observations,
        })
    } else if entry.count < thresholds.min_nest_observations {
        Some(Rejection::CountTooLow {
            count: entry.count,
            min: thresholds.min_nest_observations,
        })
    } else if duration < thresholds.min_history {
        Some(Rejection::HistoryTooShort {
            duration,
            min: thresholds.min_history,
        })
    } else {
        None
    };

    CandidateVerdict {
        entry: *entry,
        nest_pct,
        global_pct,
        ratio,
        rejection,
    }
}

#[allow(clippy::cast_precision_loss)]
fn hourly(count: u64, minutes: u64) -> f64 {
    if minutes == 0 {
        return 0.0;
    }
    count as f64 * 60.0 / minutes as f64
}

fn nesting_from(entry: &SummaryEntry, summary: &NestSummary) -> NestingSpecies {
    let minutes = u64::try_from(summary.duration.num_minutes()).unwrap_or(0);
    NestingSpecies {
        key: entry.key,
        stats_duration_minutes: minutes,
        nest_count: entry.count,
        nest_total: entry.total,
        nest_hourly_count: hourly(entry.count, minutes),
        nest_hourly_total: hourly(entry.total, minutes),
        global_count: entry.global,
        global_total: entry.global_total,
        global_hourly_count: hourly(entry.global, minutes),
        global_hourly_total: hourly(entry.global_total, minutes),
        detected_at: summary.end_time,
        updated_at: summary.end_time,
    }
}

/// Decides the nesting species for `summary`.
///
/// Deterministic: the same summary and thresholds always give the same
/// result.
#[must_use]
pub fn decide(summary: &NestSummary, thresholds: &DecisionThresholds) -> Decision {
    let candidates: Vec<CandidateVerdict> = summary
        .entries
        .iter()
        .take(MAX_CANDIDATES)
        .map(|entry| evaluate(entry, summary.duration, thresholds))
        .collect();

    let nesting = candidates
        .iter()
        .find(|verdict| verdict.rejection.is_none())
        .map(|verdict| nesting_from(&verdict.entry, summary));

    Decision {
        candidates,
        nesting,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::nest::tests::t0;
    use crate::domain::{NestId, SpeciesKey};

    fn thresholds() -> DecisionThresholds {
        DecisionThresholds {
            min_nest_pct: 12.0,
            min_nest_to_global_ratio: 8.0,
            max_global_pct: 15.0,
            min_total_observations: 12,
            min_nest_observations: 4,
            min_history: TimeDelta::hours(1),
        }
    }

    fn entry(species: u16, count: u64, total: u64, global: u64, global_total: u64) -> SummaryEntry {
        SummaryEntry {
            rank: 0,
            key: SpeciesKey::new(species, 0),
            count,
            total,
            global,
            global_total,
        }
    }

    fn summary(entries: Vec<SummaryEntry>, duration: TimeDelta) -> NestSummary {
        NestSummary {
            nest_id: NestId::new(1),
            start_time: t0(),
            end_time: t0() + duration,
            duration,
            entries,
        }
    }

    fn first_rejection(decision: &Decision) -> Option<Rejection> {
        decision.candidates.first().and_then(|c| c.rejection)
    }

    #[test]
    fn dominant_rare_species_nests() {
        let s = summary(vec![entry(7, 18, 20, 100, 1000)], TimeDelta::hours(1));
        let decision = decide(&s, &thresholds());
        let Some(nesting) = decision.nesting else {
            panic!("18/20 with 10% global should nest");
        };
        assert_eq!(nesting.key, SpeciesKey::new(7, 0));
        assert_eq!(nesting.nest_count, 18);
        assert_eq!(nesting.stats_duration_minutes, 60);
        assert!((nesting.nest_hourly_count - 18.0).abs() < 1e-9);
        assert_eq!(nesting.detected_at, t0() + TimeDelta::hours(1));
    }

    #[test]
    fn ratio_just_below_threshold_fails() {
        let s = summary(vec![entry(7, 15, 20, 100, 1000)], TimeDelta::hours(1));
        let decision = decide(&s, &thresholds());
        assert!(decision.nesting.is_none());
        assert!(matches!(
            first_rejection(&decision),
            Some(Rejection::RatioTooLow { .. })
        ));
    }

    #[test]
    fn checks_run_in_order() {
        let t = thresholds();
        let reason = |e: SummaryEntry, d: TimeDelta| first_rejection(&decide(&summary(vec![e], d), &t));

        assert!(matches!(
            reason(entry(1, 1, 20, 1, 1000), TimeDelta::hours(2)),
            Some(Rejection::NestPctTooLow { .. })
        ));
        assert!(matches!(
            reason(entry(1, 5, 20, 300, 1000), TimeDelta::hours(2)),
            Some(Rejection::NestPctBelowGlobal { .. })
        ));
        assert!(matches!(
            reason(entry(1, 19, 20, 200, 1000), TimeDelta::hours(2)),
            Some(Rejection::RatioTooLow { .. })
        ));
        let no_ratio = DecisionThresholds {
            min_nest_to_global_ratio: 0.0,
            ..t
        };
        assert!(matches!(
            first_rejection(&decide(
                &summary(vec![entry(1, 19, 20, 200, 1000)], TimeDelta::hours(2)),
                &no_ratio
            )),
            Some(Rejection::GlobalPctTooHigh { .. })
        ));
        assert!(matches!(
            reason(entry(1, 10, 10, 10, 1000), TimeDelta::hours(2)),
            Some(Rejection::TotalTooLow { .. })
        ));
        let low_total = DecisionThresholds {
            min_total_observations: 1,
            ..t
        };
        assert!(matches!(
            first_rejection(&decide(
                &summary(vec![entry(1, 3, 3, 3, 1000)], TimeDelta::hours(2)),
                &low_total
            )),
            Some(Rejection::CountTooLow { .. })
        ));
        assert!(matches!(
            reason(entry(1, 18, 20, 18, 1000), TimeDelta::minutes(59)),
            Some(Rejection::HistoryTooShort { .. })
        ));
    }

    #[test]
    fn max_global_zero_disables_check() {
        let t = DecisionThresholds {
            max_global_pct: 0.0,
            min_nest_to_global_ratio: 1.0,
            ..thresholds()
        };
        let s = summary(vec![entry(1, 19, 20, 500, 1000)], TimeDelta::hours(2));
        assert!(decide(&s, &t).nesting.is_some());
    }

    #[test]
    fn first_qualifying_candidate_wins() {
        let s = summary(
            vec![entry(1, 10, 30, 900, 1000), entry(2, 8, 30, 10, 1000)],
            TimeDelta::hours(2),
        );
        let decision = decide(&s, &thresholds());
        assert_eq!(decision.candidates.len(), 2);
        assert_eq!(
            decision.nesting.map(|n| n.key),
            Some(SpeciesKey::new(2, 0))
        );
    }

    #[test]
    fn only_top_ten_are_considered() {
        let t = DecisionThresholds {
            min_nest_pct: 5.0,
            ..thresholds()
        };
        let mut entries: Vec<SummaryEntry> =
            (1..=10).map(|s| entry(s, 20, 300, 900, 1000)).collect();
        // would qualify if it were in the top ten
        entries.push(entry(11, 19, 300, 1, 1000));
        let s = summary(entries, TimeDelta::hours(2));
        let decision = decide(&s, &t);
        assert_eq!(decision.candidates.len(), MAX_CANDIDATES);
        assert!(decision.nesting.is_none());
    }

    #[test]
    fn zero_count_entries_are_rejected() {
        let s = summary(vec![entry(1, 0, 0, 0, 0)], TimeDelta::hours(2));
        let decision = decide(&s, &thresholds());
        assert_eq!(first_rejection(&decision), Some(Rejection::NoObservations));
    }

    #[test]
    fn decision_is_deterministic() {
        let s = summary(
            vec![entry(3, 9, 20, 20, 1000), entry(4, 9, 20, 30, 1000)],
            TimeDelta::hours(2),
        );
        assert_eq!(decide(&s, &thresholds()), decide(&s, &thresholds()));
    }
}
