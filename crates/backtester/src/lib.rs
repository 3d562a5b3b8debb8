//! # Backtest Engine
//!
//! Computes trailing calendar-year performance windows over an instrument's
//! TRI series. Windows are strict: an instrument without the full history for
//! a window skips it, never silently shortens it. One result row is upserted
//! per completed window, keyed on `(instrument_id, window_label)`, so a
//! recomputed window supersedes the previous row.

pub mod error;
pub mod metrics;

pub use error::BacktestError;

use chrono::NaiveDate;
use configuration::BacktestSettings;
use core_types::BacktestWindowResult;
use database::DbRepository;
use metrics::{window_metrics, years_before};
use tracing::{debug, info};

/// Which windows completed, which were skipped for insufficient history, and
/// the rows produced for the completed ones.
#[derive(Debug, Clone, Default)]
pub struct WindowSummary {
    pub done: Vec<String>,
    pub skipped: Vec<String>,
    pub results: Vec<BacktestWindowResult>,
}

pub struct BacktestEngine {
    repo: DbRepository,
    settings: BacktestSettings,
}

impl BacktestEngine {
    pub fn new(repo: DbRepository, settings: BacktestSettings) -> Self {
        Self { repo, settings }
    }

    /// Computes and persists every configured window ending at `end_date`.
    /// An empty TRI series skips every window and produces no rows; that is a
    /// normal outcome for a freshly added instrument, not an error.
    pub async fn compute_windows(
        &self,
        instrument_id: &str,
        end_date: NaiveDate,
    ) -> Result<WindowSummary, BacktestError> {
        let series: Vec<(NaiveDate, f64)> = self
            .repo
            .read_tri(instrument_id, None, Some(end_date))
            .await?
            .into_iter()
            .map(|p| (p.tri_date, p.index_value))
            .collect();

        let summary = evaluate_windows(instrument_id, &series, end_date, &self.settings);
        if !summary.results.is_empty() {
            self.repo.write_backtest_results(&summary.results).await?;
        }
        info!(
            instrument_id,
            done = summary.done.len(),
            skipped = summary.skipped.len(),
            "backtest windows computed"
        );
        Ok(summary)
    }
}

/// The window selection and measurement logic, separated from persistence.
/// `series` must be ascending by date.
fn evaluate_windows(
    instrument_id: &str,
    series: &[(NaiveDate, f64)],
    end_date: NaiveDate,
    settings: &BacktestSettings,
) -> WindowSummary {
    let mut summary = WindowSummary::default();
    let earliest = series.first().map(|&(date, _)| date);

    for &years in &settings.window_years {
        let label = format!("{years}y");
        let target_start = years_before(end_date, years);

        let Some(earliest) = earliest else {
            summary.skipped.push(label);
            continue;
        };
        if earliest > target_start {
            debug!(
                instrument_id,
                label,
                %earliest,
                %target_start,
                "insufficient history; window skipped"
            );
            summary.skipped.push(label);
            continue;
        }

        let from = series.partition_point(|&(date, _)| date < target_start);
        let window = &series[from..];
        let (Some(&(start_date, _)), Some(&(last_date, _))) = (window.first(), window.last())
        else {
            summary.skipped.push(label);
            continue;
        };

        let m = window_metrics(window, settings.risk_free_rate_annual, settings.annualization);
        summary.results.push(BacktestWindowResult {
            instrument_id: instrument_id.to_string(),
            window_label: label.clone(),
            window_start_date: start_date,
            window_end_date: last_date,
            total_return: m.total_return,
            cagr: m.cagr,
            volatility: m.volatility,
            sharpe_ratio: m.sharpe_ratio,
            max_drawdown: m.max_drawdown,
        });
        summary.done.push(label);
    }
    summary
}
