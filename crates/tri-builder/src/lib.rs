//! # TRI Builder
//!
//! Incrementally extends each instrument's Total Return Index series: resolve
//! the seed point, load the price bars (and, for raw-close regions, the
//! dividend and split history) since that seed, chain the daily total-return
//! factors forward, and upsert the new points.
//!
//! The chaining math itself lives in [`chain`] as pure functions; this module
//! wires it to the repository.

pub mod chain;
pub mod error;

pub use error::TriError;

use chrono::NaiveDate;
use core_types::{Instrument, SyncCursor, TriPoint};
use database::DbRepository;
use tracing::{debug, info};

/// What one build pass produced. `tri_count_total` already includes the
/// freshly added points, so it can be written straight to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriOutcome {
    pub last_tri_date: Option<NaiveDate>,
    pub tri_count_total: i64,
    pub tri_added: i64,
}

pub struct TriBuilder {
    repo: DbRepository,
    base_value: f64,
}

impl TriBuilder {
    pub fn new(repo: DbRepository, base_value: f64) -> Self {
        Self { repo, base_value }
    }

    /// Extends the instrument's TRI series up to `today`.
    ///
    /// Seed resolution: the persisted point at or immediately before the
    /// cursor's `last_tri_date`, falling back to the latest persisted point,
    /// falling back to no seed (the series restarts at the base value on the
    /// first price date). A pass that finds fewer than two usable bars, or no
    /// trading days after the seed, is a successful no-op.
    pub async fn build(
        &self,
        instrument: &Instrument,
        cursor: Option<&SyncCursor>,
        today: NaiveDate,
    ) -> Result<TriOutcome, TriError> {
        let instrument_id = instrument.instrument_id.as_str();
        let prior_count = cursor.map(|c| c.tri_count).unwrap_or(0);
        let cursor_date = cursor.and_then(|c| c.last_tri_date);

        let seed_point = self.repo.read_tri_seed(instrument_id, cursor_date).await?;
        let seed = seed_point.as_ref().map(|p| (p.tri_date, p.index_value));
        debug!(instrument_id, ?seed, ?cursor_date, "TRI seed resolved");

        let start = seed.map(|(date, _)| date);
        let bars = self.repo.read_prices(instrument_id, start, today).await?;

        let unchanged = TriOutcome {
            last_tri_date: start.or(cursor_date),
            tri_count_total: prior_count,
            tri_added: 0,
        };
        if bars.len() < 2 {
            debug!(instrument_id, bars = bars.len(), "too few bars; TRI unchanged");
            return Ok(unchanged);
        }

        let (dividends, splits) = if instrument.region.uses_adjusted_close() {
            (Vec::new(), Vec::new())
        } else {
            (
                self.repo.read_dividends(instrument_id, start, today).await?,
                self.repo.read_splits(instrument_id).await?,
            )
        };

        let points = chain::extend_series(
            instrument.region,
            &bars,
            &dividends,
            &splits,
            seed,
            self.base_value,
        );
        if points.is_empty() {
            debug!(instrument_id, "no new trading days; TRI unchanged");
            return Ok(unchanged);
        }

        let rows: Vec<TriPoint> = points
            .iter()
            .map(|&(tri_date, index_value)| TriPoint {
                instrument_id: instrument.instrument_id.clone(),
                tri_date,
                index_value,
                currency: instrument.currency.clone(),
            })
            .collect();
        self.repo.write_tri(&rows).await?;

        let tri_added = rows.len() as i64;
        let outcome = TriOutcome {
            last_tri_date: rows.last().map(|p| p.tri_date),
            tri_count_total: prior_count + tri_added,
            tri_added,
        };
        info!(
            instrument_id,
            tri_added,
            last_tri_date = ?outcome.last_tri_date,
            "TRI series extended"
        );
        Ok(outcome)
    }
}
