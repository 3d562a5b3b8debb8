use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Market data error: {0}")]
    MarketData(#[from] api_client::error::ApiError),

    #[error("TRI build error: {0}")]
    Tri(#[from] tri_builder::TriError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] backtester::BacktestError),
}
