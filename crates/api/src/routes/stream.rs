use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::middleware::auth::verify_token;
use crate::server::AppState;
use crate::types::{CandleDto, StreamFrame};
use barstream_core::common::{Principal, Symbol};
use barstream_core::market::entity::AggregatorUpdate;
use barstream_fanout::{FanOut, SseMessage};
use barstream_registry::SubscriptionOrchestrator;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StreamQuery {
    /// JWT, passed as a query parameter because `EventSource` cannot set
    /// custom request headers.
    pub token: String,
}

/// Guard dropped when the SSE connection ends, whether the server sent a
/// `Terminate` sentinel or the client simply disconnected. Spawns the
/// cleanup off the drop path since `Drop` itself can't be async.
struct StreamGuard {
    symbol: Symbol,
    principal: Principal,
    tx: mpsc::Sender<SseMessage>,
    fanout: Arc<FanOut>,
    orchestrator: Arc<SubscriptionOrchestrator>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let symbol = self.symbol.clone();
        let principal = self.principal.clone();
        let tx = self.tx.clone();
        let fanout = self.fanout.clone();
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            fanout.remove_slot_if_current(&symbol, &principal, &tx);
            fanout
                .maybe_cascade_unsubscribe(
                    &symbol,
                    &**orchestrator.persistent(),
                    orchestrator.registry(),
                    orchestrator.upstream(),
                )
                .await;
        });
    }
}

fn to_stream_frame(update: &AggregatorUpdate) -> StreamFrame {
    let symbol = update.symbol().to_string();
    let is_initial = update.is_initial();

    let candles: BTreeMap<String, CandleDto> = match update {
        AggregatorUpdate::InProgress { candle, .. } | AggregatorUpdate::Closed { candle, .. } => {
            std::iter::once((candle.time.to_string(), CandleDto::from(*candle))).collect()
        }
        AggregatorUpdate::Snapshot { candles, .. } => candles
            .iter()
            .map(|c| (c.time.to_string(), CandleDto::from(*c)))
            .collect(),
    };

    let update_timestamp = candles.keys().next_back().cloned().unwrap_or_default();

    StreamFrame {
        symbol,
        candles,
        update_timestamp,
        is_initial,
    }
}

/// Server-sent event stream of candle updates for `symbol`. The first frame
/// is always `is_initial=true`; later frames are deltas. Opening a second
/// stream for the same `(symbol, token-subject)` terminates this one.
#[utoipa::path(
    get,
    path = "/stream/{symbol}",
    tag = "Market Data",
    params(
        ("symbol" = String, Path, description = "Ticker symbol"),
        ("token" = String, Query, description = "JWT, since EventSource can't set headers")
    ),
    responses(
        (status = 200, description = "text/event-stream of StreamFrame JSON")
    )
)]
pub async fn stream(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let claims = verify_token(&state.jwt_secret, &query.token)?;
    let principal = Principal::new(claims.sub);
    let symbol = Symbol::new(symbol);

    let (rx, tx) = state
        .fanout
        .open_stream(state.orchestrator.aggregators(), &symbol, &principal)
        .await?;

    let guard = StreamGuard {
        symbol: symbol.clone(),
        principal: principal.clone(),
        tx,
        fanout: state.fanout.clone(),
        orchestrator: state.orchestrator.clone(),
    };

    let event_stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        match rx.recv().await {
            Some(SseMessage::Update(update)) => {
                let frame = to_stream_frame(&update);
                let payload = serde_json::to_string(&frame).unwrap_or_default();
                Some((
                    Ok::<Event, Infallible>(Event::default().data(payload)),
                    (rx, guard),
                ))
            }
            Some(SseMessage::Terminate) | None => None,
        }
    });

    let sse = Sse::new(event_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, axum::http::HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, axum::http::HeaderValue::from_static("keep-alive"));
    Ok(response)
}
