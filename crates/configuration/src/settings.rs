use crate::error::ConfigError;
use chrono::NaiveDate;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseSettings,
    pub sync: SyncSettings,
    pub market_data: MarketDataSettings,
    pub tri: TriSettings,
    pub backtest: BacktestSettings,
}

/// Connection-pool parameters for PostgreSQL. The connection string itself
/// stays in the `DATABASE_URL` environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Upper bound on pooled connections; should cover `sync.max_concurrency`.
    pub max_connections: u32,
    /// How long to wait for a pooled connection, in seconds.
    pub acquire_timeout_secs: u64,
}

/// Parameters for the incremental sync cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Global floor for first-time fetches: instruments whose inception
    /// predates this date start here instead.
    pub default_start_date: NaiveDate,
    /// Last-resort start date used when every other date source is corrupt
    /// (unparsable inception, future default start).
    pub hard_baseline_date: NaiveDate,
    /// Maximum number of instruments processed concurrently in one cycle.
    pub max_concurrency: usize,
    /// Wall-clock budget for one per-instrument unit of work, in seconds.
    /// Fetch calls dominate this; on timeout the unit is marked failed and
    /// whatever was committed stands.
    pub instrument_timeout_secs: u64,
}

/// Connection parameters for the market-data feed.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataSettings {
    /// Base URL of the Yahoo Finance chart API.
    pub base_url: String,
}

/// Parameters for the Total Return Index builder.
#[derive(Debug, Clone, Deserialize)]
pub struct TriSettings {
    /// Index value assigned to the first point of a never-before-computed
    /// series (typically 100.0).
    pub base_value: f64,
}

/// Parameters for the strict-window backtest engine.
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestSettings {
    /// Trailing window lengths in calendar years (e.g. [1, 3, 10]). Windows
    /// whose full history does not exist are skipped, never shortened.
    pub window_years: Vec<i32>,
    /// Annual risk-free rate used for the Sharpe ratio's excess returns.
    pub risk_free_rate_annual: f64,
    /// Trading days per year used to annualize volatility and Sharpe.
    pub annualization: u32,
}

impl Config {
    /// Rejects configurations that would make the planner or the backtest
    /// engine misbehave in ways a typo should not be able to cause.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tri.base_value <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "tri.base_value must be positive, got {}",
                self.tri.base_value
            )));
        }
        if self.backtest.window_years.is_empty() {
            return Err(ConfigError::ValidationError(
                "backtest.window_years must not be empty".to_string(),
            ));
        }
        if self.backtest.window_years.iter().any(|y| *y <= 0) {
            return Err(ConfigError::ValidationError(
                "backtest.window_years entries must be positive".to_string(),
            ));
        }
        if self.backtest.annualization == 0 {
            return Err(ConfigError::ValidationError(
                "backtest.annualization must be positive".to_string(),
            ));
        }
        if self.sync.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database: DatabaseSettings {
                max_connections: 10,
                acquire_timeout_secs: 5,
            },
            sync: SyncSettings {
                default_start_date: "2015-01-01".parse().unwrap(),
                hard_baseline_date: "2015-01-01".parse().unwrap(),
                max_concurrency: 4,
                instrument_timeout_secs: 120,
            },
            market_data: MarketDataSettings {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            },
            tri: TriSettings { base_value: 100.0 },
            backtest: BacktestSettings {
                window_years: vec![1, 3, 10],
                risk_free_rate_annual: 0.0,
                annualization: 252,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_base_value() {
        let mut config = base_config();
        config.tri.base_value = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_an_empty_connection_pool() {
        let mut config = base_config();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_or_non_positive_windows() {
        let mut config = base_config();
        config.backtest.window_years = vec![];
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.backtest.window_years = vec![1, 0];
        assert!(config.validate().is_err());
    }
}
