use crate::enums::{FetchDomain, InstrumentStatus, Region};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tracked instrument, one row of the `instruments` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_id: String,
    pub name: Option<String>,
    pub region: Region,
    pub currency: String,
    pub expense_ratio: Option<Decimal>,
    pub inception_date: Option<NaiveDate>,
    pub status: InstrumentStatus,
}

/// One daily OHLCV bar. `(instrument_id, trade_date)` is the unique key;
/// bars are immutable once written except for upsert-on-conflict corrections
/// from a re-fetch. Volume-zero bars never reach the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PriceBar {
    pub instrument_id: String,
    pub trade_date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

/// One cash distribution, keyed by `(instrument_id, ex_date)`. Same-day
/// amounts are summed before persisting.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DividendEvent {
    pub instrument_id: String,
    pub ex_date: NaiveDate,
    pub amount_per_unit: Decimal,
    pub currency: String,
}

/// A forward or reverse split. `ratio` is the factor as reported by the feed:
/// 4 for a 4-for-1 forward split, 0.25 when a 1-for-4 reverse split is
/// reported as a fraction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SplitEvent {
    pub instrument_id: String,
    pub effective_date: NaiveDate,
    pub ratio: Decimal,
}

/// One point of the Total Return Index series, keyed by
/// `(instrument_id, tri_date)`. The first point of a fresh series equals the
/// configured base value (typically 100.0); values are strictly positive
/// under normal operation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TriPoint {
    pub instrument_id: String,
    pub tri_date: NaiveDate,
    pub index_value: f64,
    pub currency: String,
}

/// The per-instrument high-water mark of incremental processing. Counts and
/// last-dates are monotonically non-decreasing across successful cycles; each
/// field pair is written only by the stage that owns it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncCursor {
    pub instrument_id: String,
    pub last_price_date: Option<NaiveDate>,
    pub price_count: i64,
    pub last_dividend_date: Option<NaiveDate>,
    pub dividend_count: i64,
    pub last_tri_date: Option<NaiveDate>,
    pub tri_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl SyncCursor {
    /// The last processed date for a fetch domain, if any.
    pub fn anchor(&self, domain: FetchDomain) -> Option<NaiveDate> {
        match domain {
            FetchDomain::Price => self.last_price_date,
            FetchDomain::Dividend => self.last_dividend_date,
        }
    }

    /// The running record count for a fetch domain.
    pub fn count(&self, domain: FetchDomain) -> i64 {
        match domain {
            FetchDomain::Price => self.price_count,
            FetchDomain::Dividend => self.dividend_count,
        }
    }
}

/// A partial update to a sync cursor. `None` fields are left untouched by the
/// upsert; a stage therefore cannot clobber fields it does not own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub last_price_date: Option<NaiveDate>,
    pub price_count: Option<i64>,
    pub last_dividend_date: Option<NaiveDate>,
    pub dividend_count: Option<i64>,
    pub last_tri_date: Option<NaiveDate>,
    pub tri_count: Option<i64>,
}

impl CursorUpdate {
    /// An update touching only the price fields.
    pub fn prices(last_price_date: NaiveDate, price_count: i64) -> Self {
        Self {
            last_price_date: Some(last_price_date),
            price_count: Some(price_count),
            ..Self::default()
        }
    }

    /// An update touching only the dividend fields.
    pub fn dividends(last_dividend_date: NaiveDate, dividend_count: i64) -> Self {
        Self {
            last_dividend_date: Some(last_dividend_date),
            dividend_count: Some(dividend_count),
            ..Self::default()
        }
    }

    /// An update touching only the TRI fields.
    pub fn tri(last_tri_date: NaiveDate, tri_count: i64) -> Self {
        Self {
            last_tri_date: Some(last_tri_date),
            tri_count: Some(tri_count),
            ..Self::default()
        }
    }

    /// Merges another partial update into this one. Fields set on `other`
    /// win; fields absent on both stay absent.
    pub fn merge(mut self, other: CursorUpdate) -> Self {
        self.last_price_date = other.last_price_date.or(self.last_price_date);
        self.price_count = other.price_count.or(self.price_count);
        self.last_dividend_date = other.last_dividend_date.or(self.last_dividend_date);
        self.dividend_count = other.dividend_count.or(self.dividend_count);
        self.last_tri_date = other.last_tri_date.or(self.last_tri_date);
        self.tri_count = other.tri_count.or(self.tri_count);
        self
    }

    /// True when no field is set, in which case the cursor write is skipped.
    pub fn is_empty(&self) -> bool {
        self.last_price_date.is_none()
            && self.price_count.is_none()
            && self.last_dividend_date.is_none()
            && self.dividend_count.is_none()
            && self.last_tri_date.is_none()
            && self.tri_count.is_none()
    }
}

/// Metrics for one completed backtest window. `(instrument_id, window_label)`
/// is the unique key: when the TRI series advances and the window's start
/// shifts, the old row is superseded rather than duplicated. Undefined
/// metrics (non-positive CAGR ratio, zero return variance) are stored as NaN.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BacktestWindowResult {
    pub instrument_id: String,
    pub window_label: String,
    pub window_start_date: NaiveDate,
    pub window_end_date: NaiveDate,
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn cursor_update_constructors_touch_only_their_fields() {
        let up = CursorUpdate::prices(d("2024-05-01"), 120);
        assert_eq!(up.last_price_date, Some(d("2024-05-01")));
        assert_eq!(up.price_count, Some(120));
        assert!(up.last_dividend_date.is_none());
        assert!(up.dividend_count.is_none());
        assert!(up.last_tri_date.is_none());
        assert!(up.tri_count.is_none());

        let up = CursorUpdate::tri(d("2024-05-02"), 300);
        assert!(up.last_price_date.is_none());
        assert_eq!(up.last_tri_date, Some(d("2024-05-02")));
        assert_eq!(up.tri_count, Some(300));
    }

    #[test]
    fn cursor_update_merge_keeps_disjoint_fields() {
        let merged = CursorUpdate::prices(d("2024-05-01"), 120)
            .merge(CursorUpdate::dividends(d("2024-04-10"), 8));
        assert_eq!(merged.last_price_date, Some(d("2024-05-01")));
        assert_eq!(merged.price_count, Some(120));
        assert_eq!(merged.last_dividend_date, Some(d("2024-04-10")));
        assert_eq!(merged.dividend_count, Some(8));
        assert!(merged.last_tri_date.is_none());
        assert!(!merged.is_empty());
        assert!(CursorUpdate::default().is_empty());
    }

    #[test]
    fn cursor_accessors_select_domain_fields() {
        let cursor = SyncCursor {
            instrument_id: "0050.TW".into(),
            last_price_date: Some(d("2024-05-01")),
            price_count: 2000,
            last_dividend_date: Some(d("2024-01-18")),
            dividend_count: 30,
            last_tri_date: None,
            tri_count: 0,
            updated_at: Utc::now(),
        };
        assert_eq!(cursor.anchor(FetchDomain::Price), Some(d("2024-05-01")));
        assert_eq!(cursor.count(FetchDomain::Price), 2000);
        assert_eq!(cursor.anchor(FetchDomain::Dividend), Some(d("2024-01-18")));
        assert_eq!(cursor.count(FetchDomain::Dividend), 30);
    }
}
