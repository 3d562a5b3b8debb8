use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),
}
