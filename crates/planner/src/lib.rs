//! # Fetch Planner
//!
//! Given an instrument's sync cursor and inception date, decides the minimal
//! `[start, today]` range still required for a data domain (price or
//! dividend). This is a pure decision table: it reads nothing and fetches
//! nothing, so every branch can be unit tested in isolation.
//!
//! The ladder always prefers the most specific known lower bound:
//! last fetch > inception > configured default > hard baseline. It never
//! produces an inverted range and never silently trusts a corrupted cursor.

use chrono::{Days, NaiveDate};
use core_types::{FetchDomain, SyncCursor};
use serde::Serialize;
use tracing::{debug, warn};

/// The configured date floors the ladder falls back to.
#[derive(Debug, Clone, Copy)]
pub struct PlanDefaults {
    /// Global floor for first-time fetches.
    pub default_start: NaiveDate,
    /// Last line of defense when every other date source is bad.
    pub hard_baseline: NaiveDate,
}

/// An instrument's inception date as reported by the listing source. The
/// source sometimes ships garbage strings, which the caller surfaces as
/// `Invalid` so the ladder can treat them as a data-error condition rather
/// than a missing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InceptionDate {
    Known(NaiveDate),
    Invalid,
    Unknown,
}

impl InceptionDate {
    pub fn from_opt(date: Option<NaiveDate>) -> Self {
        match date {
            Some(d) => InceptionDate::Known(d),
            None => InceptionDate::Unknown,
        }
    }
}

/// Which branch of the ladder produced the start date. Logged, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartSource {
    /// Cursor anchor is at or past today; re-probe today only.
    CorruptAnchor,
    /// Normal incremental case: day after the anchor, clipped to today.
    AnchorNextDay,
    /// No anchor and the date sources are unusable; hard baseline.
    HardBaseline,
    /// No anchor; instrument history starts after the global floor.
    Inception,
    /// No anchor; global floor bounds the fetch.
    DefaultStart,
}

/// The minimal range still needed for one domain, plus the count already
/// persisted (which the fetch stage adds its new records to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub start_date: NaiveDate,
    pub existing_count: i64,
    pub source: StartSource,
}

/// Computes the fetch plan for one domain. Evaluated in order, first match
/// wins:
///
/// 1. anchor exists and `anchor >= today` -> start = today (corrupt or
///    already-current cursor; re-probe only today).
/// 2. anchor exists and `anchor < today` -> start = anchor + 1 day, clipped
///    to today.
/// 3. no anchor and a data-error condition holds (unparsable inception,
///    `default_start > today`, or `inception > today`) -> hard baseline,
///    clipped to today.
/// 4. no anchor and `inception >= default_start` -> inception (full history).
/// 5. no anchor otherwise -> default start.
///
/// Idempotent for a fixed `(cursor, today)`; `None` is reserved for the
/// degenerate case where no valid start at or before `today` exists, which
/// the ladder itself never produces.
pub fn plan_fetch(
    domain: FetchDomain,
    cursor: Option<&SyncCursor>,
    inception: InceptionDate,
    today: NaiveDate,
    defaults: &PlanDefaults,
) -> Option<FetchPlan> {
    let anchor = cursor.and_then(|c| c.anchor(domain));
    let existing_count = cursor.map(|c| c.count(domain)).unwrap_or(0);

    let (start_date, source) = match anchor {
        Some(anchor) if anchor >= today => {
            warn!(
                domain = domain.as_str(),
                %anchor,
                %today,
                "cursor anchor at or past today; re-probing today only"
            );
            (today, StartSource::CorruptAnchor)
        }
        Some(anchor) => {
            let next = anchor
                .checked_add_days(Days::new(1))
                .unwrap_or(today)
                .min(today);
            (next, StartSource::AnchorNextDay)
        }
        None => {
            let inception_parsed = match inception {
                InceptionDate::Known(d) => Some(d),
                _ => None,
            };
            let date_error = matches!(inception, InceptionDate::Invalid)
                || defaults.default_start > today
                || inception_parsed.is_some_and(|d| d > today);

            if date_error {
                warn!(
                    domain = domain.as_str(),
                    ?inception,
                    %today,
                    "date sources unusable; falling back to hard baseline"
                );
                (defaults.hard_baseline.min(today), StartSource::HardBaseline)
            } else {
                match inception_parsed {
                    Some(inception) if inception >= defaults.default_start => {
                        (inception, StartSource::Inception)
                    }
                    _ => (defaults.default_start, StartSource::DefaultStart),
                }
            }
        }
    };

    if start_date > today {
        // Unreachable via the ladder; kept so the contract ("never an
        // inverted range") holds even if a caller feeds a bad `today`.
        return None;
    }

    let plan = FetchPlan {
        start_date,
        existing_count,
        source,
    };
    debug!(
        domain = domain.as_str(),
        start = %plan.start_date,
        %today,
        existing_count,
        source = ?plan.source,
        "fetch planned"
    );
    Some(plan)
}
