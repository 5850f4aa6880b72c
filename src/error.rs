use thiserror::Error;

pub type CreditResult<T> = Result<T, CreditError>;

#[derive(Error, Debug)]
pub enum CreditError {
    #[error("user is not eligible for credit")]
    NotEligible,
    #[error("credit provider is not configured: {0}")]
    ProviderNotConfigured(String),
    #[error("credit request has already been completed")]
    RequestAlreadyCompleted,
    #[error("credit request not found: {0}")]
    RequestNotFound(String),
    #[error("invalid credit status: {0}")]
    InvalidStatus(String),
    #[error("invalid course key: {0}")]
    InvalidCourseKey(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for CreditError {
    fn from(e: sqlx::Error) -> Self {
        CreditError::Storage(e.to_string())
    }
}
