use axum::Json;
use axum::extract::{Path, State};
use std::collections::BTreeMap;

use crate::middleware::auth::CurrentPrincipal;
use crate::server::AppState;
use crate::types::{ApiErrorResponse, ApiResponse, CandleDto, SnapshotResponse};
use barstream_core::common::Symbol;

/// Returns the current full candle window for `symbol`.
///
/// 404s if no aggregator has ever been created for the symbol (i.e. no one
/// has subscribed to it yet).
#[utoipa::path(
    get,
    path = "/api/snapshot/{symbol}",
    tag = "Market Data",
    security(("bearer_jwt" = [])),
    params(
        ("symbol" = String, Path, description = "Ticker symbol")
    ),
    responses(
        (status = 200, description = "Snapshot", body = ApiResponse<SnapshotResponse>),
        (status = 404, description = "Symbol not subscribed")
    )
)]
pub async fn snapshot(
    State(state): State<AppState>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<SnapshotResponse>>, Json<ApiErrorResponse>> {
    let symbol = Symbol::new(symbol);
    let aggregator = state
        .orchestrator
        .aggregators()
        .get(&symbol)
        .ok_or_else(|| Json(ApiErrorResponse::from_msg(format!("symbol not subscribed: {symbol}"))))?;

    let candles = aggregator.snapshot().await;
    let update_timestamp = candles
        .last()
        .map(|c| c.time.to_string())
        .unwrap_or_default();

    let candles: BTreeMap<String, CandleDto> = candles
        .into_iter()
        .map(|c| (c.time.to_string(), CandleDto::from(c)))
        .collect();

    Ok(Json(ApiResponse::ok(SnapshotResponse {
        symbol: symbol.to_string(),
        candles,
        update_timestamp,
        is_initial: true,
    })))
}
