//! # Sync Engine
//!
//! Runs the per-instrument pipeline: plan the price fetch, persist what came
//! back, plan the dividend fetch (plus the split history where the region
//! needs it), extend the TRI series, then recompute the backtest windows.
//! Cursor fields advance only after the data they describe is committed, so
//! a failure partway through leaves the cursor pointing at committed data
//! and the next cycle resumes naturally.
//!
//! A cycle fans instruments out over a bounded number of concurrent tasks;
//! one instrument's failure or timeout never aborts the others.

pub mod error;
pub mod report;

pub use error::EngineError;
pub use report::{CycleSummary, InstrumentOutcome, InstrumentReport};

use api_client::MarketDataClient;
use backtester::BacktestEngine;
use chrono::NaiveDate;
use configuration::Config;
use core_types::{CursorUpdate, FetchDomain, Instrument};
use database::DbRepository;
use indicatif::{ProgressBar, ProgressStyle};
use planner::{FetchPlan, InceptionDate, PlanDefaults, plan_fetch};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tri_builder::TriBuilder;

#[derive(Clone)]
pub struct SyncEngine {
    repo: DbRepository,
    client: Arc<dyn MarketDataClient>,
    config: Arc<Config>,
}

impl SyncEngine {
    pub fn new(repo: DbRepository, client: Arc<dyn MarketDataClient>, config: Arc<Config>) -> Self {
        Self {
            repo,
            client,
            config,
        }
    }

    fn plan_defaults(&self) -> PlanDefaults {
        PlanDefaults {
            default_start: self.config.sync.default_start_date,
            hard_baseline: self.config.sync.hard_baseline_date,
        }
    }

    /// Runs the full pipeline for one instrument up to `today`. Stages run in
    /// strict order because each one reads what the previous one committed.
    pub async fn sync_instrument(
        &self,
        instrument: &Instrument,
        today: NaiveDate,
    ) -> Result<InstrumentReport, EngineError> {
        let instrument_id = instrument.instrument_id.as_str();
        let mut report = InstrumentReport::new(instrument_id);
        let defaults = self.plan_defaults();
        let inception = InceptionDate::from_opt(instrument.inception_date);

        self.repo.ensure_cursor(instrument_id).await?;
        let cursor = self.repo.read_cursor(instrument_id).await?;
        let mut cursor_update = CursorUpdate::default();

        // Stage 1: daily prices.
        if let Some(plan) = plan_fetch(FetchDomain::Price, cursor.as_ref(), inception, today, &defaults)
        {
            let outcome = self
                .client
                .fetch_daily_prices(instrument_id, plan.start_date, today)
                .await?;
            if !outcome.records.is_empty() {
                self.repo.save_price_bars(&outcome.records).await?;
            }
            if let Some(update) = fetch_cursor_update(
                FetchDomain::Price,
                &plan,
                outcome.latest_date,
                outcome.new_count,
            ) {
                cursor_update = cursor_update.merge(update);
            }
            report.prices_added = outcome.new_count;
        }

        // Stage 2: dividends, plus the full split history where the raw-close
        // formula needs it for de-adjustment.
        if let Some(plan) =
            plan_fetch(FetchDomain::Dividend, cursor.as_ref(), inception, today, &defaults)
        {
            if !instrument.region.uses_adjusted_close() {
                let splits = self.client.fetch_splits(instrument_id).await?;
                if !splits.is_empty() {
                    self.repo.save_splits(&splits).await?;
                }
            }
            let outcome = self
                .client
                .fetch_dividends(instrument_id, plan.start_date, today, instrument.region)
                .await?;
            if !outcome.records.is_empty() {
                self.repo.save_dividends(&outcome.records).await?;
            }
            if let Some(update) = fetch_cursor_update(
                FetchDomain::Dividend,
                &plan,
                outcome.latest_date,
                outcome.new_count,
            ) {
                cursor_update = cursor_update.merge(update);
            }
            report.dividends_added = outcome.new_count;
        }

        // One combined cursor write covering both fetch stages. It happens
        // only after every fetched record is committed, so a failure above
        // leaves the cursor where the last successful cycle put it.
        self.repo.write_cursor(instrument_id, &cursor_update).await?;

        // Stage 3: TRI extension over the freshly committed data.
        let cursor = self.repo.read_cursor(instrument_id).await?;
        let builder = TriBuilder::new(self.repo.clone(), self.config.tri.base_value);
        let tri = builder.build(instrument, cursor.as_ref(), today).await?;
        if tri.tri_added > 0
            && let Some(last_tri_date) = tri.last_tri_date
        {
            self.repo
                .write_cursor(
                    instrument_id,
                    &CursorUpdate::tri(last_tri_date, tri.tri_count_total),
                )
                .await?;
        }
        report.tri_added = tri.tri_added;

        // Stage 4: trailing windows over the extended series.
        let backtester = BacktestEngine::new(self.repo.clone(), self.config.backtest.clone());
        let windows = backtester.compute_windows(instrument_id, today).await?;
        report.windows_done = windows.done;
        report.windows_skipped = windows.skipped;

        info!(
            instrument_id,
            prices = report.prices_added,
            dividends = report.dividends_added,
            tri = report.tri_added,
            windows = report.windows_done.len(),
            "instrument synced"
        );
        Ok(report)
    }

    /// Runs one sync cycle over every active instrument, at most
    /// `sync.max_concurrency` in flight at a time and each bounded by
    /// `sync.instrument_timeout_secs` of wall clock.
    pub async fn run_cycle(&self, today: NaiveDate) -> Result<CycleSummary, EngineError> {
        let started = Instant::now();
        let instruments = self.repo.list_active_instruments().await?;
        info!(count = instruments.len(), %today, "sync cycle starting");

        let progress = ProgressBar::new(instruments.len() as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );

        let semaphore = Arc::new(Semaphore::new(self.config.sync.max_concurrency));
        let budget = Duration::from_secs(self.config.sync.instrument_timeout_secs);

        let mut ids = Vec::with_capacity(instruments.len());
        let mut handles = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            ids.push(instrument.instrument_id.clone());
            handles.push(tokio::spawn(async move {
                let instrument_id = instrument.instrument_id.clone();
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return InstrumentReport::failed(instrument_id, "scheduler shut down"),
                };
                progress.set_message(instrument_id.clone());
                let report = settle_unit(
                    instrument_id,
                    tokio::time::timeout(budget, engine.sync_instrument(&instrument, today)).await,
                );
                progress.inc(1);
                drop(permit);
                report
            }));
        }

        let joined = futures::future::join_all(handles).await;
        let reports = ids
            .into_iter()
            .zip(joined)
            .map(|(instrument_id, joined)| match joined {
                Ok(report) => report,
                Err(e) => InstrumentReport::failed(instrument_id, format!("task panicked: {e}")),
            })
            .collect();
        progress.finish_and_clear();

        let summary = CycleSummary::from_reports(reports, started.elapsed());
        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed = ?summary.elapsed,
            "sync cycle finished"
        );
        Ok(summary)
    }
}

/// The cursor fields one fetch stage is allowed to advance. `None` when the
/// fetch produced nothing, so an empty or failed fetch leaves the cursor
/// exactly where the previous cycle put it.
fn fetch_cursor_update(
    domain: FetchDomain,
    plan: &FetchPlan,
    latest_date: Option<NaiveDate>,
    new_count: usize,
) -> Option<CursorUpdate> {
    let latest = latest_date?;
    let total = plan.existing_count + new_count as i64;
    Some(match domain {
        FetchDomain::Price => CursorUpdate::prices(latest, total),
        FetchDomain::Dividend => CursorUpdate::dividends(latest, total),
    })
}

/// Folds one unit's outcome (including a timeout) into its report. Errors are
/// recorded, never rethrown, so one instrument cannot abort the cycle.
fn settle_unit(
    instrument_id: String,
    outcome: Result<Result<InstrumentReport, EngineError>, tokio::time::error::Elapsed>,
) -> InstrumentReport {
    match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!(%instrument_id, error = %e, "instrument sync failed");
            InstrumentReport::failed(instrument_id, e.to_string())
        }
        Err(_) => {
            warn!(%instrument_id, "instrument sync timed out");
            InstrumentReport::timed_out(instrument_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::{FetchOutcome, error::ApiError};
    use async_trait::async_trait;
    use core_types::{DividendEvent, PriceBar, Region, SplitEvent};
    use planner::StartSource;
    use rust_decimal::Decimal;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn plan(existing_count: i64) -> FetchPlan {
        FetchPlan {
            start_date: d("2024-05-02"),
            existing_count,
            source: StartSource::AnchorNextDay,
        }
    }

    /// A canned feed: one bar per requested day, or a hard failure.
    struct ScriptedClient {
        fail: bool,
    }

    #[async_trait]
    impl MarketDataClient for ScriptedClient {
        async fn fetch_daily_prices(
            &self,
            instrument_id: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<FetchOutcome<PriceBar>, ApiError> {
            if self.fail {
                return Err(ApiError::InvalidData("feed down".into()));
            }
            let close = Decimal::from(100);
            let records: Vec<PriceBar> = [start, end]
                .into_iter()
                .map(|trade_date| PriceBar {
                    instrument_id: instrument_id.to_string(),
                    trade_date,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    adj_close: close,
                    volume: 1_000,
                })
                .collect();
            let latest_date = records.last().map(|bar| bar.trade_date);
            let new_count = records.len();
            Ok(FetchOutcome {
                records,
                latest_date,
                new_count,
            })
        }

        async fn fetch_dividends(
            &self,
            _instrument_id: &str,
            _start: NaiveDate,
            _end: NaiveDate,
            _region: Region,
        ) -> Result<FetchOutcome<DividendEvent>, ApiError> {
            if self.fail {
                return Err(ApiError::InvalidData("feed down".into()));
            }
            Ok(FetchOutcome::empty())
        }

        async fn fetch_splits(&self, _instrument_id: &str) -> Result<Vec<SplitEvent>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn fetched_prices_advance_the_cursor_by_the_new_count() {
        let client = ScriptedClient { fail: false };
        let outcome = client
            .fetch_daily_prices("VTI", d("2024-05-02"), d("2024-05-03"))
            .await
            .unwrap();
        let update = fetch_cursor_update(
            FetchDomain::Price,
            &plan(40),
            outcome.latest_date,
            outcome.new_count,
        )
        .unwrap();
        assert_eq!(update.last_price_date, Some(d("2024-05-03")));
        assert_eq!(update.price_count, Some(42));
        assert!(update.last_dividend_date.is_none());
        assert!(update.dividend_count.is_none());
    }

    #[tokio::test]
    async fn empty_fetch_leaves_the_cursor_untouched() {
        let client = ScriptedClient { fail: false };
        let outcome = client
            .fetch_dividends("VTI", d("2024-05-02"), d("2024-05-03"), Region::Us)
            .await
            .unwrap();
        let update = fetch_cursor_update(
            FetchDomain::Dividend,
            &plan(7),
            outcome.latest_date,
            outcome.new_count,
        );
        assert!(update.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_surfaces_before_any_cursor_arithmetic() {
        let client = ScriptedClient { fail: true };
        let result = client
            .fetch_daily_prices("VTI", d("2024-05-02"), d("2024-05-03"))
            .await;
        assert!(matches!(result, Err(ApiError::InvalidData(_))));
    }

    #[test]
    fn dividend_domain_advances_only_dividend_fields() {
        let update =
            fetch_cursor_update(FetchDomain::Dividend, &plan(7), Some(d("2024-05-02")), 3)
                .unwrap();
        assert_eq!(update.last_dividend_date, Some(d("2024-05-02")));
        assert_eq!(update.dividend_count, Some(10));
        assert!(update.last_price_date.is_none());
        assert!(update.price_count.is_none());
    }

    #[test]
    fn price_and_dividend_updates_merge_into_one_write() {
        let merged = fetch_cursor_update(FetchDomain::Price, &plan(40), Some(d("2024-05-03")), 2)
            .unwrap_or_default()
            .merge(
                fetch_cursor_update(FetchDomain::Dividend, &plan(7), Some(d("2024-05-02")), 1)
                    .unwrap_or_default(),
            );
        assert_eq!(merged.last_price_date, Some(d("2024-05-03")));
        assert_eq!(merged.price_count, Some(42));
        assert_eq!(merged.last_dividend_date, Some(d("2024-05-02")));
        assert_eq!(merged.dividend_count, Some(8));
        assert!(merged.last_tri_date.is_none());
    }

    #[tokio::test]
    async fn unit_failures_settle_into_reports_without_aborting() {
        let ok = settle_unit("VTI".into(), Ok(Ok(InstrumentReport::new("VTI"))));
        assert!(ok.is_success());

        let failed = settle_unit(
            "VTI".into(),
            Ok(Err(EngineError::Database(database::DbError::NotFound))),
        );
        assert!(matches!(failed.outcome, InstrumentOutcome::Failed(_)));

        let elapsed = tokio::time::timeout(
            Duration::from_millis(1),
            std::future::pending::<Result<InstrumentReport, EngineError>>(),
        )
        .await;
        let timed_out = settle_unit("VTI".into(), elapsed);
        assert_eq!(timed_out.outcome, InstrumentOutcome::TimedOut);
    }
}
