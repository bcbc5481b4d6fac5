use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use friendzi_types::api::ErrorBody;

use crate::auth::AppState;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Underlying error text of a 500, carried in the response extensions until
/// `expose_error_detail` decides whether the client may see it.
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed input, rejected before touching the store.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated, but not a participant/owner.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate like/follow/account; nothing was written.
    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                let body = ErrorBody {
                    success: false,
                    message: INTERNAL_MESSAGE.to_string(),
                    error: None,
                };
                let mut response = (status, Json(body)).into_response();
                response
                    .extensions_mut()
                    .insert(InternalErrorDetail(format!("{:#}", e)));
                return response;
            }
            other => ErrorBody {
                success: false,
                message: other.to_string(),
                error: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Router-wide response mapper: in development mode, rewrite 500 bodies to
/// include the error detail.
pub async fn expose_error_detail(State(state): State<AppState>, response: Response) -> Response {
    with_error_detail(response, state.expose_internal_errors)
}

fn with_error_detail(mut response: Response, expose: bool) -> Response {
    let Some(InternalErrorDetail(detail)) = response.extensions_mut().remove::<InternalErrorDetail>() else {
        return response;
    };
    if !expose {
        return response;
    }
    let body = ErrorBody {
        success: false,
        message: INTERNAL_MESSAGE.to_string(),
        error: Some(detail),
    };
    (response.status(), Json(body)).into_response()
}

pub type ApiResult<T> = Result<T, ApiError>;
