//! 领域错误与统一的 API 错误响应。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde_json::json;
use std::io::{self, ErrorKind};
use thiserror::Error;
use tracing::error;

/// 录音元数据、时间戳与查询参数的校验错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordingError {
    #[error("startTime/endTime must be numeric")]
    InvalidTimestamp,
    #[error("{0}")]
    InvalidMetadata(String),
    #[error("from_time/to_time must be ISO datetime")]
    InvalidTimeRange,
}

/// 存储目录访问错误。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    RangeNotSatisfiable(u64),
}

impl ApiError {
    /// 检索接口中，非法路径与缺失文件一律视为 404。
    pub fn not_found_from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::NotFound("File not found".into()),
            StorageError::Io(err) if err.kind() == ErrorKind::NotFound => {
                ApiError::NotFound("File not found".into())
            }
            StorageError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => detail_response(StatusCode::BAD_REQUEST, &msg),
            ApiError::NotFound(msg) => detail_response(StatusCode::NOT_FOUND, &msg),
            ApiError::Internal(msg) => {
                error!(detail = %msg, "internal server error");
                detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            ApiError::RangeNotSatisfiable(size) => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    headers,
                    JsonResponse(json!({ "detail": "range not satisfiable" })),
                )
                    .into_response()
            }
        }
    }
}

fn detail_response(status: StatusCode, detail: &str) -> Response {
    (status, JsonResponse(json!({ "detail": detail }))).into_response()
}

impl From<RecordingError> for ApiError {
    fn from(error: RecordingError) -> Self {
        ApiError::BadRequest(error.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("File not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
