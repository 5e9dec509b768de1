use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// 上游行情连接配置：端点、鉴权与重连策略。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub ws_url: String,
    pub history_url: String,
    pub api_key_id: String,
    pub api_secret_key: String,
    pub handshake_timeout_secs: u64,
    pub history_timeout_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    pub reconnect_attempts_before_cooldown: u32,
    pub reconnect_cooldown_secs: u64,
}

/// 订阅配额与运行时边界。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_capped_symbols: usize,
    pub max_candles_per_symbol: usize,
    pub inbound_queue_capacity: usize,
    pub sse_slot_capacity: usize,
    pub active_symbols_cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                jwt_secret: "YOUR_SUPER_SECRET_KEY".to_string(), // Default for dev, should be overwritten by config
            },
            database: DatabaseConfig {
                data_dir: "data".to_string(),
            },
            upstream: UpstreamConfig {
                ws_url: "wss://stream.example.com/v2/iex".to_string(),
                history_url: "https://data.example.com/v2/stocks".to_string(),
                api_key_id: "".to_string(),
                api_secret_key: "".to_string(),
                handshake_timeout_secs: 10,
                history_timeout_secs: 30,
                reconnect_base_secs: 2,
                reconnect_max_secs: 60,
                reconnect_attempts_before_cooldown: 5,
                reconnect_cooldown_secs: 300,
            },
            limits: LimitsConfig {
                max_capped_symbols: 30,
                max_candles_per_symbol: 10_000,
                inbound_queue_capacity: 500,
                sse_slot_capacity: 10,
                active_symbols_cache_ttl_secs: 60,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.jwt_secret, "YOUR_SUPER_SECRET_KEY");
        assert_eq!(config.database.data_dir, "data");
        assert_eq!(config.limits.max_capped_symbols, 30);
        assert_eq!(config.upstream.reconnect_base_secs, 2);
    }
}
