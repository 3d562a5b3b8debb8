use serde::{Deserialize, Serialize};

/// The market an instrument trades in, which also selects the total-return
/// formula used by the TRI builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "region")]
pub enum Region {
    #[sqlx(rename = "US")]
    #[serde(rename = "US")]
    Us,
    #[sqlx(rename = "TW")]
    #[serde(rename = "TW")]
    Tw,
}

impl Region {
    /// The settlement currency for instruments in this region.
    pub fn currency(&self) -> &'static str {
        match self {
            Region::Us => "USD",
            Region::Tw => "TWD",
        }
    }

    /// Whether the region's price feed carries a back-adjusted close that
    /// already encodes reinvested distributions and splits. When false, the
    /// TRI builder must combine the raw close with explicit dividend events.
    pub fn uses_adjusted_close(&self) -> bool {
        match self {
            Region::Us => true,
            Region::Tw => false,
        }
    }
}

/// Listing status of a tracked instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "instrument_status")]
pub enum InstrumentStatus {
    #[sqlx(rename = "ACTIVE")]
    #[serde(rename = "ACTIVE")]
    Active,
    #[sqlx(rename = "DELISTED")]
    #[serde(rename = "DELISTED")]
    Delisted,
}

/// The data domain a fetch plan covers. Each domain owns its own anchor date
/// and running count on the sync cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchDomain {
    Price,
    Dividend,
}

impl FetchDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchDomain::Price => "price",
            FetchDomain::Dividend => "dividend",
        }
    }
}
