use crate::classify::ClassifyError;
use crate::concentrations::ConcentrationError;
use crate::crypto::CryptoError;
use crate::domain::{InvalidSegment, InvalidSite};
use crate::payload::PayloadError;
use crate::store::StoreError;
use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

/// Every failure a handler can report.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("{0}")]
    MissingRecord(String),
    #[error(transparent)]
    InvalidSite(#[from] InvalidSite),
    #[error(transparent)]
    InvalidSegment(#[from] InvalidSegment),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Decryption(#[from] CryptoError),
    #[error(transparent)]
    Concentrations(#[from] ConcentrationError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Classify(ClassifyError::UnknownScheme(_))
            | ApiError::MissingRecord(_)
            | ApiError::InvalidSite(_)
            | ApiError::InvalidSegment(_)
            | ApiError::Payload(_)
            | ApiError::Decryption(_)
            | ApiError::Concentrations(ConcentrationError::MissingColumn(_))
            | ApiError::Concentrations(ConcentrationError::NotFound(_))
            | ApiError::Concentrations(ConcentrationError::NotUtf8) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine readable name of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Classify(ClassifyError::UnknownScheme(_)) => "unknown_scheme",
            ApiError::Classify(ClassifyError::MalformedColor(_)) => "malformed_color",
            ApiError::Classify(ClassifyError::InvalidScheme { .. }) => "invalid_scheme",
            ApiError::MissingRecord(_) | ApiError::Concentrations(ConcentrationError::NotFound(_)) => {
                "missing_record"
            }
            ApiError::Concentrations(ConcentrationError::MissingColumn(_)) => "missing_column",
            ApiError::Concentrations(ConcentrationError::NotUtf8) => "invalid_payload",
            ApiError::Concentrations(_) => "malformed_file",
            ApiError::Store(StoreError::CorruptData { .. }) => "corrupt_data",
            ApiError::Store(StoreError::Database(_)) => "storage",
            ApiError::Payload(_) | ApiError::InvalidSite(_) | ApiError::InvalidSegment(_) => {
                "invalid_payload"
            }
            ApiError::Decryption(_) => "decryption",
            ApiError::Task(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    code: &'static str,
    message: String,
}

fn error_reply(status: StatusCode, code: &'static str, message: String) -> warp::reply::Response {
    let body = ErrorBody {
        status: "error",
        code,
        message,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Turns rejections into JSON error bodies.
pub async fn handle_rejection(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(error) = rejection.find::<ApiError>() {
        let status = error.status();
        if status.is_server_error() {
            log::error!("{}", error);
        } else {
            log::warn!("{}", error);
        }
        return Ok(error_reply(status, error.code(), error.to_string()));
    }

    if rejection.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "not_found", "not found".to_string()));
    }
    if let Some(e) = rejection.find::<warp::reject::LengthRequired>() {
        return Ok(error_reply(StatusCode::LENGTH_REQUIRED, "invalid_payload", e.to_string()));
    }
    if let Some(e) = rejection.find::<warp::reject::UnsupportedMediaType>() {
        return Ok(error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "invalid_payload", e.to_string()));
    }
    if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string()));
    }
    if let Some(e) = rejection.find::<warp::reject::PayloadTooLarge>() {
        return Ok(error_reply(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", e.to_string()));
    }
    if let Some(e) = rejection.find::<warp::reject::MethodNotAllowed>() {
        return Ok(error_reply(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", e.to_string()));
    }

    log::error!("unhandled rejection: {:?}", rejection);
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal error".to_string(),
    ))
}
