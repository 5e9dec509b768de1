//! # `barstream-api` - HTTP API 网关
//!
//! 市场数据风扇出服务的 HTTP/SSE 入口。使用 `axum` 构建路由，通过
//! `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 接收下游订阅者的订阅/取消订阅/快照/SSE 流请求
//! - 执行 JWT 鉴权，将请求中的 principal 转发给 `SubscriptionOrchestrator`
//! - 将领域模型转换为 DTO 返回给前端

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;
