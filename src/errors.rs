use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChronodError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cron error: {0}")]
    Cron(String),

    #[error("Schedule unreachable: {0}")]
    ScheduleUnreachable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

impl From<std::io::Error> for ChronodError {
    fn from(err: std::io::Error) -> Self {
        ChronodError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChronodError {
    fn from(err: serde_json::Error) -> Self {
        ChronodError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for ChronodError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ChronodError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ChronodError::Conflict(db.to_string())
            }
            _ => ChronodError::Storage(err.to_string()),
        }
    }
}
