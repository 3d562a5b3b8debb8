use crate::DbError;
use chrono::NaiveDate;
use core_types::{
    BacktestWindowResult, CursorUpdate, DividendEvent, Instrument, PriceBar, SplitEvent,
    SyncCursor, TriPoint,
};
use sqlx::postgres::PgPool;
use tracing::debug;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==========================================================================
    // Instruments
    // ==========================================================================

    /// Fetches every instrument currently tracked with ACTIVE status.
    pub async fn list_active_instruments(&self) -> Result<Vec<Instrument>, DbError> {
        let instruments = sqlx::query_as::<_, Instrument>(
            r#"
            SELECT instrument_id, name, region, currency, expense_ratio, inception_date, status
            FROM instruments
            WHERE status = 'ACTIVE'
            ORDER BY instrument_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(instruments)
    }

    /// Fetches a single instrument by id.
    pub async fn get_instrument(&self, instrument_id: &str) -> Result<Instrument, DbError> {
        sqlx::query_as::<_, Instrument>(
            r#"
            SELECT instrument_id, name, region, currency, expense_ratio, inception_date, status
            FROM instruments
            WHERE instrument_id = $1
            "#,
        )
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }

    // ==========================================================================
    // Sync cursors
    // ==========================================================================

    /// Reads the sync cursor for an instrument, if one exists yet.
    pub async fn read_cursor(&self, instrument_id: &str) -> Result<Option<SyncCursor>, DbError> {
        let cursor = sqlx::query_as::<_, SyncCursor>(
            r#"
            SELECT instrument_id, last_price_date, price_count, last_dividend_date,
                   dividend_count, last_tri_date, tri_count, updated_at
            FROM sync_cursors
            WHERE instrument_id = $1
            "#,
        )
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    /// Creates an all-empty cursor row on first sighting of an instrument.
    /// Idempotent: an existing cursor is left untouched.
    pub async fn ensure_cursor(&self, instrument_id: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (instrument_id)
            VALUES ($1)
            ON CONFLICT (instrument_id) DO NOTHING
            "#,
        )
        .bind(instrument_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a partial cursor update. Fields absent from the update keep
    /// their current value (COALESCE), so a stage can never null out fields
    /// it does not own.
    pub async fn write_cursor(
        &self,
        instrument_id: &str,
        update: &CursorUpdate,
    ) -> Result<(), DbError> {
        if update.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (
                instrument_id, last_price_date, price_count, last_dividend_date,
                dividend_count, last_tri_date, tri_count, updated_at
            )
            VALUES ($1, $2, COALESCE($3, 0), $4, COALESCE($5, 0), $6, COALESCE($7, 0), NOW())
            ON CONFLICT (instrument_id) DO UPDATE SET
                last_price_date    = COALESCE(EXCLUDED.last_price_date, sync_cursors.last_price_date),
                price_count        = COALESCE($3, sync_cursors.price_count),
                last_dividend_date = COALESCE(EXCLUDED.last_dividend_date, sync_cursors.last_dividend_date),
                dividend_count     = COALESCE($5, sync_cursors.dividend_count),
                last_tri_date      = COALESCE(EXCLUDED.last_tri_date, sync_cursors.last_tri_date),
                tri_count          = COALESCE($7, sync_cursors.tri_count),
                updated_at         = NOW()
            "#,
        )
        .bind(instrument_id)
        .bind(update.last_price_date)
        .bind(update.price_count)
        .bind(update.last_dividend_date)
        .bind(update.dividend_count)
        .bind(update.last_tri_date)
        .bind(update.tri_count)
        .execute(&self.pool)
        .await?;
        debug!(instrument_id, ?update, "cursor updated");
        Ok(())
    }

    // ==========================================================================
    // Price bars
    // ==========================================================================

    /// Saves a batch of price bars within a single transaction. Upserts on
    /// `(instrument_id, trade_date)` so re-fetched ranges correct earlier
    /// rows instead of erroring.
    pub async fn save_price_bars(&self, bars: &[PriceBar]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO daily_prices (instrument_id, trade_date, open, high, low, close, adj_close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (instrument_id, trade_date) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    adj_close = EXCLUDED.adj_close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(&bar.instrument_id)
            .bind(bar.trade_date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.adj_close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches price bars for an instrument in `[start, end]`, ascending and
    /// deduplicated by the primary key.
    pub async fn read_prices(
        &self,
        instrument_id: &str,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, DbError> {
        let bars = sqlx::query_as::<_, PriceBar>(
            r#"
            SELECT instrument_id, trade_date, open, high, low, close, adj_close, volume
            FROM daily_prices
            WHERE instrument_id = $1
              AND ($2::date IS NULL OR trade_date >= $2)
              AND trade_date <= $3
            ORDER BY trade_date ASC
            "#,
        )
        .bind(instrument_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(bars)
    }

    // ==========================================================================
    // Dividends and splits
    // ==========================================================================

    /// Saves a batch of dividend events, upserting on `(instrument_id, ex_date)`.
    pub async fn save_dividends(&self, events: &[DividendEvent]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO dividend_events (instrument_id, ex_date, amount_per_unit, currency)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (instrument_id, ex_date) DO UPDATE SET
                    amount_per_unit = EXCLUDED.amount_per_unit,
                    currency = EXCLUDED.currency
                "#,
            )
            .bind(&event.instrument_id)
            .bind(event.ex_date)
            .bind(event.amount_per_unit)
            .bind(&event.currency)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches dividend events for an instrument in `[start, end]`, ascending.
    pub async fn read_dividends(
        &self,
        instrument_id: &str,
        start: Option<NaiveDate>,
        end: NaiveDate,
    ) -> Result<Vec<DividendEvent>, DbError> {
        let events = sqlx::query_as::<_, DividendEvent>(
            r#"
            SELECT instrument_id, ex_date, amount_per_unit, currency
            FROM dividend_events
            WHERE instrument_id = $1
              AND ($2::date IS NULL OR ex_date >= $2)
              AND ex_date <= $3
            ORDER BY ex_date ASC
            "#,
        )
        .bind(instrument_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Saves the full split history for an instrument, upserting on
    /// `(instrument_id, effective_date)`.
    pub async fn save_splits(&self, splits: &[SplitEvent]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for split in splits {
            sqlx::query(
                r#"
                INSERT INTO split_events (instrument_id, effective_date, ratio)
                VALUES ($1, $2, $3)
                ON CONFLICT (instrument_id, effective_date) DO UPDATE SET
                    ratio = EXCLUDED.ratio
                "#,
            )
            .bind(&split.instrument_id)
            .bind(split.effective_date)
            .bind(split.ratio)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches the full split history for an instrument, ascending.
    pub async fn read_splits(&self, instrument_id: &str) -> Result<Vec<SplitEvent>, DbError> {
        let splits = sqlx::query_as::<_, SplitEvent>(
            r#"
            SELECT instrument_id, effective_date, ratio
            FROM split_events
            WHERE instrument_id = $1
            ORDER BY effective_date ASC
            "#,
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(splits)
    }

    // ==========================================================================
    // TRI points
    // ==========================================================================

    /// Fetches TRI points in `[start, end]` (either bound may be open),
    /// ascending by date.
    pub async fn read_tri(
        &self,
        instrument_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<TriPoint>, DbError> {
        let points = sqlx::query_as::<_, TriPoint>(
            r#"
            SELECT instrument_id, tri_date, index_value, currency
            FROM tri_points
            WHERE instrument_id = $1
              AND ($2::date IS NULL OR tri_date >= $2)
              AND ($3::date IS NULL OR tri_date <= $3)
            ORDER BY tri_date ASC
            "#,
        )
        .bind(instrument_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(points)
    }

    /// Fetches the latest TRI point at or before `at_or_before` (or the
    /// latest overall when open). This is the seed for incremental extension.
    pub async fn read_tri_seed(
        &self,
        instrument_id: &str,
        at_or_before: Option<NaiveDate>,
    ) -> Result<Option<TriPoint>, DbError> {
        let point = sqlx::query_as::<_, TriPoint>(
            r#"
            SELECT instrument_id, tri_date, index_value, currency
            FROM tri_points
            WHERE instrument_id = $1
              AND ($2::date IS NULL OR tri_date <= $2)
            ORDER BY tri_date DESC
            LIMIT 1
            "#,
        )
        .bind(instrument_id)
        .bind(at_or_before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(point)
    }

    /// Saves a batch of TRI points within a single transaction. Upserts on
    /// `(instrument_id, tri_date)`; the last written value wins on a
    /// same-day collision.
    pub async fn write_tri(&self, points: &[TriPoint]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for point in points {
            sqlx::query(
                r#"
                INSERT INTO tri_points (instrument_id, tri_date, index_value, currency)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (instrument_id, tri_date) DO UPDATE SET
                    index_value = EXCLUDED.index_value,
                    currency = EXCLUDED.currency
                "#,
            )
            .bind(&point.instrument_id)
            .bind(point.tri_date)
            .bind(point.index_value)
            .bind(&point.currency)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ==========================================================================
    // Backtest results
    // ==========================================================================

    /// Saves a batch of window results within a single transaction, upserting
    /// on `(instrument_id, window_label)` so a recomputed window supersedes
    /// the previous row.
    pub async fn write_backtest_results(
        &self,
        results: &[BacktestWindowResult],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            sqlx::query(
                r#"
                INSERT INTO backtest_results (
                    instrument_id, window_label, window_start_date, window_end_date,
                    total_return, cagr, volatility, sharpe_ratio, max_drawdown
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (instrument_id, window_label) DO UPDATE SET
                    window_start_date = EXCLUDED.window_start_date,
                    window_end_date = EXCLUDED.window_end_date,
                    total_return = EXCLUDED.total_return,
                    cagr = EXCLUDED.cagr,
                    volatility = EXCLUDED.volatility,
                    sharpe_ratio = EXCLUDED.sharpe_ratio,
                    max_drawdown = EXCLUDED.max_drawdown
                "#,
            )
            .bind(&result.instrument_id)
            .bind(&result.window_label)
            .bind(result.window_start_date)
            .bind(result.window_end_date)
            .bind(result.total_return)
            .bind(result.cagr)
            .bind(result.volatility)
            .bind(result.sharpe_ratio)
            .bind(result.max_drawdown)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fetches the stored window results for an instrument.
    pub async fn read_backtest_results(
        &self,
        instrument_id: &str,
    ) -> Result<Vec<BacktestWindowResult>, DbError> {
        let results = sqlx::query_as::<_, BacktestWindowResult>(
            r#"
            SELECT instrument_id, window_label, window_start_date, window_end_date,
                   total_return, cagr, volatility, sharpe_ratio, max_drawdown
            FROM backtest_results
            WHERE instrument_id = $1
            ORDER BY window_start_date ASC
            "#,
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }
}
