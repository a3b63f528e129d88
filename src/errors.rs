use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or invalid token")]
    Unauthenticated,
    #[error("invalid token")]
    InvalidCredential,
    #[error("path outside sanctioned root")]
    PathTraversal,
    #[error("not found")]
    NotFound,
    #[error("payment provider not allowed")]
    InvalidProvider,
    #[error("filter operator not allowed")]
    InvalidOperator,
    #[error("payment failed")]
    PaymentFailed,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "Unauthenticated",
            AppError::InvalidCredential => "InvalidCredential",
            AppError::PathTraversal => "PathTraversal",
            AppError::NotFound => "NotFound",
            AppError::InvalidProvider => "InvalidProvider",
            AppError::InvalidOperator => "InvalidOperator",
            AppError::PaymentFailed => "PaymentFailed",
            AppError::BadRequest(_) => "BadRequest",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::InvalidCredential | AppError::PathTraversal => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::InvalidProvider | AppError::InvalidOperator | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PaymentFailed => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound
        } else {
            AppError::Internal(e.to_string())
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
