use crate::error::ApiError;
use crate::responses::{ChartResponse, ChartResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use configuration::MarketDataSettings;
use core_types::{DividendEvent, PriceBar, Region, SplitEvent};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub mod error;
pub mod responses;

/// What a fetch call actually produced. `latest_date` and `new_count` are
/// consistent with `records` and feed the caller's cursor update.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub records: Vec<T>,
    pub latest_date: Option<NaiveDate>,
    pub new_count: usize,
}

impl<T> FetchOutcome<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            latest_date: None,
            new_count: 0,
        }
    }
}

/// The generic, abstract interface to the market-data feed. This trait is the
/// contract the sync engine works against, allowing the underlying
/// implementation (live or mock) to be swapped out.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Fetches daily price bars for `[start, end]`. Volume-zero bars are
    /// treated as non-trading days and never returned.
    async fn fetch_daily_prices(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchOutcome<PriceBar>, ApiError>;

    /// Fetches cash dividend events with ex-dates in `[start, end]`.
    /// Same-day amounts are summed into a single event.
    async fn fetch_dividends(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        region: Region,
    ) -> Result<FetchOutcome<DividendEvent>, ApiError>;

    /// Fetches the instrument's full split history. Splits are rare and the
    /// dividend de-adjustment needs every split after a given ex-date, so
    /// there is no incremental variant.
    async fn fetch_splits(&self, instrument_id: &str) -> Result<Vec<SplitEvent>, ApiError>;
}

/// A concrete implementation of `MarketDataClient` against the Yahoo Finance
/// v8 chart API.
#[derive(Clone)]
pub struct YahooClient {
    client: reqwest::Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(settings: &MarketDataSettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                // The chart endpoint rejects requests without a browser-like UA.
                .user_agent("Mozilla/5.0 (X11; Linux x86_64) etfsync/0.1")
                .build()
                .expect("Failed to build reqwest client"),
            base_url: settings.base_url.clone(),
        }
    }

    async fn get_chart(
        &self,
        symbol: &str,
        period1: i64,
        period2: i64,
        events: &str,
    ) -> Result<ChartResult, ApiError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string().as_str()),
                ("period2", period2.to_string().as_str()),
                ("interval", "1d"),
                ("includeAdjustedClose", "true"),
                ("events", events),
            ])
            .send()
            .await?
            .json::<ChartResponse>()
            .await?;

        if let Some(err) = response.chart.error {
            return Err(ApiError::FeedError {
                symbol: symbol.to_string(),
                code: err.code,
                description: err.description,
            });
        }
        response
            .chart
            .result
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .ok_or_else(|| {
                ApiError::Deserialization(format!("chart response for {symbol} had no result"))
            })
    }
}

#[async_trait]
impl MarketDataClient for YahooClient {
    async fn fetch_daily_prices(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchOutcome<PriceBar>, ApiError> {
        info!(instrument_id, %start, %end, "fetching daily prices");
        let chart = self
            .get_chart(instrument_id, day_start(start), day_end(end), "div")
            .await?;
        let records = price_bars_from_chart(instrument_id, &chart)?;
        let latest_date = records.last().map(|bar| bar.trade_date);
        let new_count = records.len();
        debug!(instrument_id, new_count, "price fetch complete");
        Ok(FetchOutcome {
            records,
            latest_date,
            new_count,
        })
    }

    async fn fetch_dividends(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        region: Region,
    ) -> Result<FetchOutcome<DividendEvent>, ApiError> {
        info!(instrument_id, %start, %end, "fetching dividends");
        let chart = self
            .get_chart(instrument_id, day_start(start), day_end(end), "div")
            .await?;
        let records =
            dividends_from_chart(instrument_id, region.currency(), start, end, &chart)?;
        let latest_date = records.last().map(|event| event.ex_date);
        let new_count = records.len();
        debug!(instrument_id, new_count, "dividend fetch complete");
        Ok(FetchOutcome {
            records,
            latest_date,
            new_count,
        })
    }

    async fn fetch_splits(&self, instrument_id: &str) -> Result<Vec<SplitEvent>, ApiError> {
        let now = Utc::now().timestamp();
        let chart = self.get_chart(instrument_id, 0, now, "split").await?;
        splits_from_chart(instrument_id, &chart)
    }
}

fn day_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

fn day_end(date: NaiveDate) -> i64 {
    date.and_hms_opt(23, 59, 59)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

fn date_from_ts(ts: i64) -> Result<NaiveDate, ApiError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| ApiError::InvalidData(format!("invalid timestamp: {ts}")))
}

fn decimal_from(value: f64, field: &str) -> Result<Decimal, ApiError> {
    Decimal::try_from(value)
        .map_err(|e| ApiError::InvalidData(format!("{field} value {value} not decimal: {e}")))
}

/// Maps a chart result onto price bars, dropping volume-zero bars and bars
/// with no close. Missing open/high/low fall back to the close; a missing
/// adjclose series falls back to the raw close, matching a feed that does
/// not back-adjust.
pub fn price_bars_from_chart(
    instrument_id: &str,
    chart: &ChartResult,
) -> Result<Vec<PriceBar>, ApiError> {
    let timestamps = match &chart.timestamp {
        Some(ts) if !ts.is_empty() => ts,
        _ => return Ok(Vec::new()),
    };
    let quote = chart
        .indicators
        .quote
        .first()
        .ok_or_else(|| ApiError::Deserialization("chart response had no quote block".into()))?;
    let adjclose = chart
        .indicators
        .adjclose
        .as_ref()
        .and_then(|blocks| blocks.first());

    let series = |field: &Option<Vec<Option<f64>>>, i: usize| -> Option<f64> {
        field.as_ref().and_then(|v| v.get(i).copied().flatten())
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let close = match series(&quote.close, i) {
            Some(c) => c,
            None => continue,
        };
        let volume = quote
            .volume
            .as_ref()
            .and_then(|v| v.get(i).copied().flatten())
            .unwrap_or(0);
        if volume == 0 {
            // Non-trading day.
            continue;
        }
        let adj = adjclose
            .and_then(|block| block.adjclose.get(i).copied().flatten())
            .unwrap_or(close);
        bars.push(PriceBar {
            instrument_id: instrument_id.to_string(),
            trade_date: date_from_ts(ts)?,
            open: decimal_from(series(&quote.open, i).unwrap_or(close), "open")?,
            high: decimal_from(series(&quote.high, i).unwrap_or(close), "high")?,
            low: decimal_from(series(&quote.low, i).unwrap_or(close), "low")?,
            close: decimal_from(close, "close")?,
            adj_close: decimal_from(adj, "adj_close")?,
            volume,
        });
    }
    bars.sort_by_key(|bar| bar.trade_date);
    bars.dedup_by_key(|bar| bar.trade_date);
    Ok(bars)
}

/// Maps chart dividend events into `DividendEvent`s within `[start, end]`,
/// summing same-day amounts.
pub fn dividends_from_chart(
    instrument_id: &str,
    currency: &str,
    start: NaiveDate,
    end: NaiveDate,
    chart: &ChartResult,
) -> Result<Vec<DividendEvent>, ApiError> {
    let raw = match chart.events.as_ref().and_then(|e| e.dividends.as_ref()) {
        Some(map) if !map.is_empty() => map,
        _ => return Ok(Vec::new()),
    };

    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for dividend in raw.values() {
        let ex_date = date_from_ts(dividend.date)?;
        if ex_date < start || ex_date > end {
            continue;
        }
        *by_date.entry(ex_date).or_insert(0.0) += dividend.amount;
    }

    by_date
        .into_iter()
        .map(|(ex_date, amount)| {
            Ok(DividendEvent {
                instrument_id: instrument_id.to_string(),
                ex_date,
                amount_per_unit: decimal_from(amount, "dividend")?,
                currency: currency.to_string(),
            })
        })
        .collect()
}

/// Maps chart split events into `SplitEvent`s, keeping the ratio exactly as
/// numerator/denominator (so a 1-for-4 reverse split arrives as 0.25).
pub fn splits_from_chart(
    instrument_id: &str,
    chart: &ChartResult,
) -> Result<Vec<SplitEvent>, ApiError> {
    let raw = match chart.events.as_ref().and_then(|e| e.splits.as_ref()) {
        Some(map) if !map.is_empty() => map,
        _ => return Ok(Vec::new()),
    };

    let mut splits = Vec::with_capacity(raw.len());
    for split in raw.values() {
        if split.denominator == 0.0 {
            return Err(ApiError::InvalidData(format!(
                "split for {instrument_id} has zero denominator"
            )));
        }
        splits.push(SplitEvent {
            instrument_id: instrument_id.to_string(),
            effective_date: date_from_ts(split.date)?,
            ratio: decimal_from(split.numerator / split.denominator, "split ratio")?,
        });
    }
    splits.sort_by_key(|split| split.effective_date);
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_fixture() -> ChartResult {
        // Three days; the middle one has zero volume and must be dropped.
        let payload = r#"
        {
            "timestamp": [1714521600, 1714608000, 1714694400],
            "events": {
                "dividends": {
                    "1714608000": { "amount": 0.3, "date": 1714608000 },
                    "1714608001": { "amount": 0.2, "date": 1714608000 }
                },
                "splits": {
                    "1714521600": { "date": 1714521600, "numerator": 4, "denominator": 1 }
                }
            },
            "indicators": {
                "quote": [{
                    "open":   [10.0, 10.5, 10.7],
                    "high":   [10.6, 10.8, 11.0],
                    "low":    [ 9.9, 10.2, 10.5],
                    "close":  [10.5, 10.6, 10.9],
                    "volume": [1000, 0, 1200]
                }],
                "adjclose": [{ "adjclose": [10.1, 10.2, 10.5] }]
            }
        }
        "#;
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn price_bars_drop_volume_zero_days() {
        let bars = price_bars_from_chart("VTI", &chart_fixture()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].trade_date, "2024-05-01".parse().unwrap());
        assert_eq!(bars[1].trade_date, "2024-05-03".parse().unwrap());
        assert_eq!(bars[0].volume, 1000);
        assert_eq!(bars[0].close, Decimal::try_from(10.5).unwrap());
        assert_eq!(bars[0].adj_close, Decimal::try_from(10.1).unwrap());
    }

    #[test]
    fn dividends_are_summed_per_ex_date_and_window_filtered() {
        let start: NaiveDate = "2024-05-01".parse().unwrap();
        let end: NaiveDate = "2024-05-31".parse().unwrap();
        let events = dividends_from_chart("VTI", "USD", start, end, &chart_fixture()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ex_date, "2024-05-02".parse::<NaiveDate>().unwrap());
        assert_eq!(events[0].amount_per_unit, Decimal::try_from(0.5).unwrap());
        assert_eq!(events[0].currency, "USD");

        // A window that excludes the ex-date yields nothing.
        let later: NaiveDate = "2024-06-01".parse().unwrap();
        let events =
            dividends_from_chart("VTI", "USD", later, "2024-06-30".parse().unwrap(), &chart_fixture())
                .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn splits_keep_reported_ratio() {
        let splits = splits_from_chart("VTI", &chart_fixture()).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].ratio, Decimal::from(4));
    }

    #[test]
    fn empty_chart_maps_to_no_records() {
        let payload = r#"{ "timestamp": null, "indicators": { "quote": [{}] } }"#;
        let chart: ChartResult = serde_json::from_str(payload).unwrap();
        assert!(price_bars_from_chart("VTI", &chart).unwrap().is_empty());
        let start: NaiveDate = "2024-01-01".parse().unwrap();
        assert!(
            dividends_from_chart("VTI", "USD", start, "2024-12-31".parse().unwrap(), &chart)
                .unwrap()
                .is_empty()
        );
        assert!(splits_from_chart("VTI", &chart).unwrap().is_empty());
    }
}
