//! # DTO (Data Transfer Object) 层
//!
//! 将内部领域模型转化为面向前端 JSON 输出的轻量结构体。
//! 所有 DTO 必须派生 `utoipa::ToSchema` 以自动进入 Swagger 文档。

use barstream_core::market::entity::Candle;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================
//  通用响应 DTO
// ============================================================

/// 统一 API 响应包装器
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T: Serialize + ToSchema> {
    /// 是否成功
    pub success: bool,
    /// 数据载荷 (成功时)
    pub data: Option<T>,
    /// 错误信息 (失败时)
    pub error: Option<String>,
}

impl<T: Serialize + ToSchema> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// 失败响应 (不含泛型载荷)
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ApiErrorResponse {
    pub fn from_msg(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: msg.into(),
        }
    }
}

/// JWT Claims 内容 (内部使用，不暴露到 Swagger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id carried in `sub`.
    pub sub: String,
    /// Token 过期时间 (Unix 时间戳)
    pub exp: usize,
}

// ============================================================
//  健康检查
// ============================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "barstream")]
    pub service: String,
    #[schema(example = "production")]
    pub environment: String,
}

// ============================================================
//  订阅相关 DTO
// ============================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubscribeQuery {
    /// One of `trades`, `quotes`, `bars`. Defaults to `trades`.
    #[serde(default = "default_subscription_type")]
    pub r#type: String,
}

fn default_subscription_type() -> String {
    "trades".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscribeResponse {
    #[schema(example = "subscribed")]
    pub status: String,
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(example = 3)]
    pub subscriber_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnsubscribeResponse {
    #[schema(example = "unsubscribed")]
    pub status: String,
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(example = 2)]
    pub remaining_subscribers: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionsResponse {
    pub symbols: Vec<String>,
    pub count: usize,
}

// ============================================================
//  K 线 / 快照 DTO
// ============================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CandleDto {
    #[schema(example = 150.0)]
    pub o: f64,
    #[schema(example = 155.0)]
    pub h: f64,
    #[schema(example = 148.0)]
    pub l: f64,
    #[schema(example = 152.0)]
    pub c: f64,
    #[schema(example = 250.0)]
    pub v: f64,
}

impl From<Candle> for CandleDto {
    fn from(c: Candle) -> Self {
        Self {
            o: c.open,
            h: c.high,
            l: c.low,
            c: c.close,
            v: c.volume,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SnapshotResponse {
    #[schema(example = "AAPL")]
    pub symbol: String,
    /// Minute timestamp (RFC 3339) -> candle.
    pub candles: std::collections::BTreeMap<String, CandleDto>,
    #[schema(example = "2024-01-01T00:01:00Z")]
    pub update_timestamp: String,
    pub is_initial: bool,
}

/// SSE frame payload — same shape as `SnapshotResponse` but sent as a
/// single JSON object per `data:` line rather than wrapped in `ApiResponse`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StreamFrame {
    pub symbol: String,
    pub candles: std::collections::BTreeMap<String, CandleDto>,
    pub update_timestamp: String,
    pub is_initial: bool,
}

// ============================================================
//  TradingView UDF DTO
// ============================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UdfConfigResponse {
    pub supports_search: bool,
    pub supports_group_request: bool,
    pub supported_resolutions: Vec<String>,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
}

impl Default for UdfConfigResponse {
    fn default() -> Self {
        Self {
            supports_search: false,
            supports_group_request: false,
            supported_resolutions: vec!["1".to_string()],
            supports_marks: false,
            supports_timescale_marks: false,
            supports_time: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UdfSymbolInfoQuery {
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UdfSymbolInfoResponse {
    pub name: String,
    pub ticker: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub minmov: i64,
    pub pricescale: i64,
    pub has_intraday: bool,
    pub supported_resolutions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UdfHistoryQuery {
    pub symbol: String,
    pub resolution: String,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UdfHistoryResponse {
    #[schema(example = "ok")]
    pub s: String,
    pub t: Vec<i64>,
    pub o: Vec<f64>,
    pub h: Vec<f64>,
    pub l: Vec<f64>,
    pub c: Vec<f64>,
    pub v: Vec<f64>,
}

impl UdfHistoryResponse {
    pub fn no_data() -> Self {
        Self {
            s: "no_data".to_string(),
            t: Vec::new(),
            o: Vec::new(),
            h: Vec::new(),
            l: Vec::new(),
            c: Vec::new(),
            v: Vec::new(),
        }
    }
}
