use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("You have already voted in this poll")]
    DuplicateVote,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("{0}")]
    Validation(String),
    #[error("Poll not found")]
    NotFound,
    #[error("This poll has expired")]
    Expired,
    #[error("You have already voted in this poll")]
    DuplicateVote,
    #[error("Store error: {0}")]
    Store(sqlx::Error),
}

impl PollError {
    pub fn validation(message: impl Into<String>) -> Self {
        PollError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PollError::Validation(_) => StatusCode::BAD_REQUEST,
            PollError::NotFound => StatusCode::NOT_FOUND,
            PollError::Expired => StatusCode::BAD_REQUEST,
            PollError::DuplicateVote => StatusCode::CONFLICT,
            PollError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status();

        // store failures are logged here and never leak to the client
        let message = match &self {
            PollError::Store(e) => {
                error!("store failure: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for PollError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateVote => PollError::DuplicateVote,
            StoreError::Database(e) => PollError::Store(e),
        }
    }
}

impl From<sqlx::Error> for PollError {
    fn from(error: sqlx::Error) -> Self {
        PollError::Store(error)
    }
}
