//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`，而是由 `barstream-app` 的 DI 容器持有并调用。

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use barstream_fanout::FanOut;
use barstream_registry::SubscriptionOrchestrator;

use crate::routes::{health, snapshot, stream, subscriptions, tradingview};

// ============================================================
//  共享应用状态
// ============================================================

/// Shared application state injected into every handler via axum's `State`
/// extractor.
///
/// # Invariants
/// - Every field is constructed once by the DI container at startup and
///   lives for the process lifetime.
#[derive(Clone)]
pub struct AppState {
    /// Single entry point for subscribe/unsubscribe.
    pub orchestrator: Arc<SubscriptionOrchestrator>,
    /// SSE slot table and broadcast dispatch.
    pub fanout: Arc<FanOut>,
    /// HMAC secret used to validate inbound bearer JWTs.
    pub jwt_secret: Arc<str>,
    /// Reported in `/health`; set from config (`production`, `staging`, ...).
    pub environment: Arc<str>,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "barstream API",
        version = "0.1.0",
        description = "Real-time equities market-data fan-out service: subscribe, snapshot, and SSE streaming endpoints.",
        contact(name = "barstream"),
        license(name = "MIT")
    ),
    tags(
        (name = "System", description = "Health and liveness"),
        (name = "Subscriptions", description = "Subscribe, unsubscribe, and list active symbols"),
        (name = "Market Data", description = "Snapshot and SSE streaming"),
        (name = "TradingView", description = "UDF-compatible charting datafeed")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("Bearer token issued by the upstream auth service."))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// Builds the full axum route tree and binds a TCP listener.
///
/// `shutdown` resolves when the app's shutdown sequence decides new
/// connections should stop being accepted; `axum::serve` then waits for
/// in-flight SSE streams to drain before returning.
///
/// # Panics
/// Never panics; binding failures are returned as `Err`.
pub async fn start_server(
    state: AppState,
    bind_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    // Public: health check, the UDF datafeed (consumed by charting widgets
    // that don't carry a user session), and the SSE stream (authenticated
    // via its own query-param token instead of the header middleware).
    let public_router = OpenApiRouter::new()
        .routes(routes!(health::health))
        .routes(routes!(stream::stream))
        .routes(routes!(tradingview::config))
        .routes(routes!(tradingview::symbol_info))
        .routes(routes!(tradingview::history));

    // Requires a valid bearer JWT.
    let protected_router = OpenApiRouter::new()
        .routes(routes!(subscriptions::subscribe))
        .routes(routes!(subscriptions::unsubscribe))
        .routes(routes!(subscriptions::list_subscriptions))
        .routes(routes!(snapshot::snapshot))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(public_router)
        .merge(protected_router)
        .with_state(state)
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app: Router = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(cors);

    tracing::info!("barstream API listening on {}", bind_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
