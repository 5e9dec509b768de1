//! # API 统一错误处理
//!
//! 将下层各 crate 的错误类型统一映射到 HTTP 状态码与 JSON 响应体。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::types::ApiErrorResponse;
use barstream_core::common::{Symbol, SubscriptionType};
use barstream_core::store::error::StoreError;
use barstream_registry::RegistryError;

/// API 层统一错误枚举
#[derive(Error, Debug)]
pub enum ApiError {
    /// 认证失败 (401)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 请求参数错误 (400)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 订阅数超出配额 (400)
    #[error("subscription cap exceeded for {subscription_type} on {symbol}")]
    CapExceeded {
        symbol: Symbol,
        subscription_type: SubscriptionType,
    },

    /// 资源未找到 (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// 下层业务错误 (500)
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::CapExceeded { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = Json(ApiErrorResponse::from_msg(message));
        (status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CapExceeded {
                symbol,
                subscription_type,
            } => ApiError::CapExceeded {
                symbol,
                subscription_type,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<barstream_fanout::FanoutError> for ApiError {
    fn from(err: barstream_fanout::FanoutError) -> Self {
        match &err {
            barstream_fanout::FanoutError::SymbolNotSubscribed(_) => {
                ApiError::NotFound(err.to_string())
            }
        }
    }
}
