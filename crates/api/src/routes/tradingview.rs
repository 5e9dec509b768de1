use axum::Json;
use axum::extract::{Query, State};
use chrono::{TimeZone, Utc};

use crate::server::AppState;
use crate::types::{
    UdfConfigResponse, UdfHistoryQuery, UdfHistoryResponse, UdfSymbolInfoQuery,
    UdfSymbolInfoResponse,
};
use barstream_core::common::{Minute, Symbol};

/// TradingView UDF `config` endpoint — capability negotiation for the
/// charting library's datafeed adapter.
#[utoipa::path(
    get,
    path = "/api/tradingview/config",
    tag = "TradingView",
    responses((status = 200, body = UdfConfigResponse))
)]
pub async fn config() -> Json<UdfConfigResponse> {
    Json(UdfConfigResponse::default())
}

/// TradingView UDF `symbol_info` endpoint.
#[utoipa::path(
    get,
    path = "/api/tradingview/symbol_info",
    tag = "TradingView",
    params(("symbol" = String, Query)),
    responses((status = 200, body = UdfSymbolInfoResponse))
)]
pub async fn symbol_info(Query(query): Query<UdfSymbolInfoQuery>) -> Json<UdfSymbolInfoResponse> {
    let symbol = Symbol::new(query.symbol);
    Json(UdfSymbolInfoResponse {
        name: symbol.to_string(),
        ticker: symbol.to_string(),
        kind: "stock".to_string(),
        session: "0930-1600".to_string(),
        timezone: "America/New_York".to_string(),
        exchange: "barstream".to_string(),
        minmov: 1,
        pricescale: 100,
        has_intraday: true,
        supported_resolutions: vec!["1".to_string()],
    })
}

/// TradingView UDF `history` endpoint, serving the in-memory candle window
/// for minute resolution. Does not hit the analytical store directly —
/// longer history is served outside this core, per the system's scope.
#[utoipa::path(
    get,
    path = "/api/tradingview/history",
    tag = "TradingView",
    params(
        ("symbol" = String, Query),
        ("resolution" = String, Query),
        ("from" = i64, Query),
        ("to" = i64, Query)
    ),
    responses((status = 200, body = UdfHistoryResponse))
)]
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<UdfHistoryQuery>,
) -> Json<UdfHistoryResponse> {
    let symbol = Symbol::new(query.symbol);
    let Some(aggregator) = state.orchestrator.aggregators().get(&symbol) else {
        return Json(UdfHistoryResponse::no_data());
    };

    let Some(from) = Utc.timestamp_opt(query.from, 0).single() else {
        return Json(UdfHistoryResponse::no_data());
    };
    let Some(to) = Utc.timestamp_opt(query.to, 0).single() else {
        return Json(UdfHistoryResponse::no_data());
    };
    let start = Minute::align(from);
    let end = Minute::align(to);

    let candles: Vec<_> = aggregator
        .snapshot()
        .await
        .into_iter()
        .filter(|c| c.time >= start && c.time <= end)
        .collect();

    if candles.is_empty() {
        return Json(UdfHistoryResponse::no_data());
    }

    Json(UdfHistoryResponse {
        s: "ok".to_string(),
        t: candles.iter().map(|c| c.time.as_datetime().timestamp()).collect(),
        o: candles.iter().map(|c| c.open).collect(),
        h: candles.iter().map(|c| c.high).collect(),
        l: candles.iter().map(|c| c.low).collect(),
        c: candles.iter().map(|c| c.close).collect(),
        v: candles.iter().map(|c| c.volume).collect(),
    })
}
