use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("No flag definitions have been loaded yet")]
    FlagsUnavailable,
    #[error("database unavailable")]
    DatabaseUnavailable,
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Timed out while fetching data")]
    TimeoutError,
    #[error("Failed to parse data")]
    DataParsingError,
}

impl FlagError {
    /// Returns (error_code, status_code) for this error.
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            FlagError::RequestDecodingError(_) => {
                ("request_decoding_error", StatusCode::BAD_REQUEST)
            }

            FlagError::DatabaseError(_) => ("database_error", StatusCode::INTERNAL_SERVER_ERROR),
            FlagError::DataParsingError => {
                ("data_parsing_error", StatusCode::INTERNAL_SERVER_ERROR)
            }

            FlagError::FlagsUnavailable => ("flags_unavailable", StatusCode::SERVICE_UNAVAILABLE),
            FlagError::DatabaseUnavailable => {
                ("database_unavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
            FlagError::TimeoutError => ("timeout", StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    /// Returns a short error code for logging and metric labels.
    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }

    pub fn is_5xx(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<tokio::time::error::Elapsed> for FlagError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FlagError::TimeoutError
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            FlagError::RequestDecodingError(msg) => {
                format!("Failed to decode request: {msg}. Please check your request format and try again.")
            }
            FlagError::FlagsUnavailable => {
                tracing::error!("Flag definitions unavailable: {:?}", self);
                "Feature flags could not be loaded. This is likely a temporary issue. Please try again later.".to_string()
            }
            FlagError::DatabaseUnavailable | FlagError::TimeoutError => {
                tracing::error!("Database unavailable: {:?}", self);
                "Our database service is currently unavailable. This is likely a temporary issue. Please try again later.".to_string()
            }
            FlagError::DatabaseError(ref e) => {
                tracing::error!("Database error: {}", e);
                "A database error occurred. Please try again later or contact support if the problem persists.".to_string()
            }
            FlagError::DataParsingError => {
                tracing::error!("Internal server error: {:?}", self);
                "An internal server error occurred. Please try again later or contact support if the problem persists.".to_string()
            }
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_failure_is_service_unavailable() {
        let error = FlagError::FlagsUnavailable;
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.error_code(), "flags_unavailable");
        assert!(error.is_5xx());
    }

    #[test]
    fn test_request_errors_are_client_errors() {
        let error = FlagError::RequestDecodingError("bad query".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(!error.is_5xx());
    }

    #[test]
    fn test_into_response_uses_status_code() {
        let response = FlagError::TimeoutError.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = FlagError::DataParsingError.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
