use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),
}
