use axum::Json;
use axum::extract::{Path, Query, State};
use std::str::FromStr;

use crate::error::ApiError;
use crate::middleware::auth::CurrentPrincipal;
use crate::server::AppState;
use crate::types::{
    ApiErrorResponse, ApiResponse, SubscribeQuery, SubscribeResponse, SubscriptionsResponse,
    UnsubscribeResponse,
};
use barstream_core::common::{Symbol, SubscriptionType};

/// Subscribe the caller to a symbol's trade/quote/bar stream.
///
/// Sequences aggregator creation, the in-memory registry, the upstream
/// control frame and the persistent mirror through `SubscriptionOrchestrator`.
#[utoipa::path(
    post,
    path = "/api/subscribe/{symbol}",
    tag = "Subscriptions",
    security(("bearer_jwt" = [])),
    params(
        ("symbol" = String, Path, description = "Ticker symbol"),
        ("type" = String, Query, description = "trades | quotes | bars, default trades")
    ),
    responses(
        (status = 200, description = "Subscribed", body = ApiResponse<SubscribeResponse>),
        (status = 400, description = "Subscription cap exceeded or bad request")
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(symbol): Path<String>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Json<ApiResponse<SubscribeResponse>>, Json<ApiErrorResponse>> {
    let subscription_type = SubscriptionType::from_str(&query.r#type)
        .map_err(|e| Json(ApiErrorResponse::from_msg(e)))?;
    let symbol = Symbol::new(symbol);

    state
        .orchestrator
        .subscribe(&principal, &symbol, subscription_type)
        .await
        .map_err(|err| Json(ApiErrorResponse::from_msg(ApiError::from(err).to_string())))?;

    let subscriber_count = state
        .orchestrator
        .registry()
        .principals(&symbol, subscription_type)
        .await
        .len();

    Ok(Json(ApiResponse::ok(SubscribeResponse {
        status: "subscribed".to_string(),
        symbol: symbol.to_string(),
        subscriber_count,
    })))
}

/// Unsubscribe the caller from a symbol's stream.
#[utoipa::path(
    delete,
    path = "/api/subscribe/{symbol}",
    tag = "Subscriptions",
    security(("bearer_jwt" = [])),
    params(
        ("symbol" = String, Path, description = "Ticker symbol"),
        ("type" = String, Query, description = "trades | quotes | bars, default trades")
    ),
    responses(
        (status = 200, description = "Unsubscribed", body = ApiResponse<UnsubscribeResponse>)
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(symbol): Path<String>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Json<ApiResponse<UnsubscribeResponse>>, Json<ApiErrorResponse>> {
    let subscription_type = SubscriptionType::from_str(&query.r#type)
        .map_err(|e| Json(ApiErrorResponse::from_msg(e)))?;
    let symbol = Symbol::new(symbol);

    state
        .orchestrator
        .unsubscribe(&principal, &symbol, subscription_type)
        .await
        .map_err(|err| Json(ApiErrorResponse::from_msg(ApiError::from(err).to_string())))?;

    let remaining_subscribers = state
        .orchestrator
        .registry()
        .principals(&symbol, subscription_type)
        .await
        .len();

    Ok(Json(ApiResponse::ok(UnsubscribeResponse {
        status: "unsubscribed".to_string(),
        symbol: symbol.to_string(),
        remaining_subscribers,
    })))
}

/// List the symbols the caller currently has an active subscription to.
#[utoipa::path(
    get,
    path = "/api/subscriptions",
    tag = "Subscriptions",
    security(("bearer_jwt" = [])),
    responses(
        (status = 200, description = "Active subscriptions", body = ApiResponse<SubscriptionsResponse>)
    )
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> Json<ApiResponse<SubscriptionsResponse>> {
    let symbols = state.orchestrator.registry().symbols_for(&principal).await;
    let count = symbols.len();
    Json(ApiResponse::ok(SubscriptionsResponse {
        symbols: symbols.into_iter().map(|s| s.to_string()).collect(),
        count,
    }))
}
