//! Raw response shapes for the Yahoo Finance v8 chart endpoint. Everything is
//! optional at the edges because the feed omits whole sections (no events, no
//! adjclose) rather than sending empty ones.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub struct Chart {
    pub result: Option<Vec<ChartResult>>,
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    pub timestamp: Option<Vec<i64>>,
    pub events: Option<ChartEvents>,
    pub indicators: Indicators,
}

/// Dividend and split events keyed by their unix timestamp (as a string).
#[derive(Debug, Deserialize)]
pub struct ChartEvents {
    pub dividends: Option<HashMap<String, RawDividend>>,
    pub splits: Option<HashMap<String, RawSplit>>,
}

#[derive(Debug, Deserialize)]
pub struct RawDividend {
    pub amount: f64,
    pub date: i64,
}

#[derive(Debug, Deserialize)]
pub struct RawSplit {
    pub date: i64,
    pub numerator: f64,
    pub denominator: f64,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    pub quote: Vec<Quote>,
    pub adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
pub struct Quote {
    pub open: Option<Vec<Option<f64>>>,
    pub high: Option<Vec<Option<f64>>>,
    pub low: Option<Vec<Option<f64>>>,
    pub close: Option<Vec<Option<f64>>>,
    pub volume: Option<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
pub struct AdjClose {
    pub adjclose: Vec<Option<f64>>,
}
