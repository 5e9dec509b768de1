mod dataplane;

use std::sync::Arc;
use std::time::Duration;

use barstream_feed::{HistoryBackfill, ReconnectPolicy, UpstreamConnection};
use barstream_market::AggregatorRegistry;
use barstream_registry::{SubscriptionOrchestrator, SubscriptionRegistry};
use barstream_store::candle_store::SqliteCandleStore;
use barstream_store::subscription_store::SqliteSubscriptionStore;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件，把它们通过 `Arc<dyn Trait>` / `Arc<具体类型>`
/// 注入到 `SubscriptionOrchestrator` 与 API 层，并在收到退出信号后按顺序收尾。
///
/// # Logic
/// 1. 初始化全局日志。
/// 2. 加载分层配置（文件 + 环境变量，缺省回退到 `AppConfig::default()`）。
/// 3. 实例化基础设施层（上游连接、历史回填、Sqlite 存储）。
/// 4. 实例化领域层（聚合器注册表、订阅注册表、编排器）。
/// 5. 启动数据面 worker 与 SSE 分发循环、挂载 API 服务。
/// 6. 等待退出信号，按固定顺序优雅关闭。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_appender = tracing_appender::rolling::daily("logs", "barstream.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(
            std::io::stdout
                .with_max_level(tracing::Level::INFO)
                .and(non_blocking.with_max_level(tracing::Level::DEBUG)),
        )
        .with_ansi(true)
        .init();

    info!("barstream starting...");

    let config_file_path = std::path::Path::new("config.toml");
    let mut builder = config::Config::builder();

    if config_file_path.exists() {
        builder = builder.add_source(config::File::from(config_file_path).required(true));
    } else if std::path::Path::new("config").exists() {
        builder = builder.add_source(config::File::with_name("config").required(true));
    }

    builder = builder.add_source(config::Environment::with_prefix("BARSTREAM").separator("_"));

    let config_val = builder.build()?;

    let app_config: barstream_core::config::AppConfig = if config_file_path.exists()
        || std::path::Path::new("config").exists()
        || std::env::var("BARSTREAM_SERVER_PORT").is_ok()
    {
        config_val.try_deserialize()?
    } else {
        barstream_core::config::AppConfig::default()
    };

    info!("configuration loaded: {:?}", app_config);

    barstream_store::config::set_root_dir(std::path::PathBuf::from(
        app_config.database.data_dir.clone(),
    ));

    // 2. 基础设施层：持久化存储
    let candle_store: Arc<dyn barstream_core::store::port::CandleStore> =
        Arc::new(SqliteCandleStore::new().await?);
    let subscription_store: Arc<dyn barstream_core::store::port::SubscriptionStore> = Arc::new(
        SqliteSubscriptionStore::new(Duration::from_secs(
            app_config.limits.active_symbols_cache_ttl_secs,
        ))
        .await?,
    );

    // 3. 基础设施层：上游行情连接与历史回填
    let (event_tx, event_rx) = mpsc::channel(app_config.limits.inbound_queue_capacity);
    let reconnect_policy = ReconnectPolicy {
        handshake_timeout: Duration::from_secs(app_config.upstream.handshake_timeout_secs),
        base_delay: Duration::from_secs(app_config.upstream.reconnect_base_secs),
        max_delay: Duration::from_secs(app_config.upstream.reconnect_max_secs),
        attempts_before_cooldown: app_config.upstream.reconnect_attempts_before_cooldown,
        cooldown: Duration::from_secs(app_config.upstream.reconnect_cooldown_secs),
    };
    let upstream = UpstreamConnection::spawn(
        app_config.upstream.ws_url.clone(),
        app_config.upstream.api_key_id.clone(),
        app_config.upstream.api_secret_key.clone(),
        reconnect_policy,
        event_tx,
    );
    let history: Arc<dyn barstream_core::market::port::HistoryProvider> =
        Arc::new(HistoryBackfill::new(
            app_config.upstream.history_url.clone(),
            app_config.upstream.api_key_id.clone(),
            app_config.upstream.api_secret_key.clone(),
            Duration::from_secs(app_config.upstream.history_timeout_secs),
        )?);

    // 4. 领域层：聚合器与订阅注册表、编排器
    let (update_tx, update_rx) = mpsc::channel(app_config.limits.inbound_queue_capacity);
    let aggregators = Arc::new(AggregatorRegistry::new(
        Some(candle_store.clone()),
        Some(history.clone()),
        update_tx,
        app_config.limits.max_candles_per_symbol,
        app_config.limits.max_candles_per_symbol,
    ));
    let registry = Arc::new(SubscriptionRegistry::new(app_config.limits.max_capped_symbols));
    let orchestrator = Arc::new(SubscriptionOrchestrator::new(
        registry.clone(),
        aggregators.clone(),
        upstream.clone(),
        subscription_store.clone(),
    ));

    match orchestrator.rehydrate().await {
        Ok(count) => info!(count, "rehydrated persisted subscriptions"),
        Err(err) => tracing::error!(%err, "failed to rehydrate persisted subscriptions"),
    }

    // 5. 数据面 worker：上游事件 -> 聚合器
    let dataplane_handle = tokio::spawn(dataplane::run(aggregators.clone(), event_rx));

    // SSE 槽位表与分发循环：聚合器更新 -> 订阅者
    let fanout = Arc::new(barstream_fanout::FanOut::new(app_config.limits.sse_slot_capacity));
    fanout.clone().spawn_dispatch_loop(update_rx);

    // 6. 挂载 API 服务
    let app_state = barstream_api::server::AppState {
        orchestrator: orchestrator.clone(),
        fanout: fanout.clone(),
        jwt_secret: Arc::from(app_config.server.jwt_secret.as_str()),
        environment: Arc::from(
            std::env::var("BARSTREAM_ENVIRONMENT")
                .unwrap_or_else(|_| "production".to_string())
                .as_str(),
        ),
    };

    let bind_addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = barstream_api::server::start_server(app_state, &bind_addr, shutdown).await {
            tracing::error!("API server failed: {}", e);
        }
    });

    info!("barstream is fully running. Waiting for signals...");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in order");

    // Graceful shutdown, in order: stop accepting new SSE connections, then
    // tear down the rest of the pipeline behind it.
    let _ = shutdown_tx.send(());
    if let Err(err) = server_handle.await {
        tracing::error!(%err, "API server task panicked during shutdown");
    }

    upstream.shutdown().await;
    drop(upstream);

    // Once the upstream task drops its event_tx the inbound queue closes and
    // the data-plane worker exits on its own; this is just a bound on how
    // long shutdown waits for that in the unlikely case it's stuck mid-reconnect.
    if tokio::time::timeout(Duration::from_secs(10), dataplane_handle)
        .await
        .is_err()
    {
        tracing::warn!("data-plane worker did not exit within the shutdown window");
    }

    info!("barstream shut down cleanly");
    Ok(())
}
