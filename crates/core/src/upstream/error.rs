use thiserror::Error;

/// # Summary
/// 上游流式连接错误的分类，决定连接管理器在一次失联后的处置方式。
///
/// # Invariants
/// - `Fatal` 永不自动重连，必须冒泡给运维/启动逻辑。
/// - `AuthRejected` 视为致命：凭据错误不会因为重试而自愈。
/// - `TransientNet` / `TransientProto` 都会触发带退避的重连。
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// 凭据被上游拒绝（鉴权握手失败）。
    #[error("upstream rejected credentials: {0}")]
    AuthRejected(String),
    /// 不可恢复的协议错误（例如上游发送了无法解析的控制帧格式）。
    #[error("fatal upstream error: {0}")]
    Fatal(String),
    /// 传输层瞬时故障（TCP 断开、DNS 超时等），应当重试。
    #[error("transient network error: {0}")]
    TransientNet(String),
    /// 协议层瞬时故障（服务端 close 帧、心跳超时等），应当重试。
    #[error("transient protocol error: {0}")]
    TransientProto(String),
}

impl UpstreamError {
    /// 是否应当触发带退避的自动重连。
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UpstreamError::TransientNet(_) | UpstreamError::TransientProto(_)
        )
    }

    /// 根据 WebSocket close code 对断线原因分类。
    ///
    /// 1008 (policy violation) 与鉴权失败的 close code 一律视为致命；
    /// 其余关闭码按瞬时协议错误处理。
    pub fn from_close_code(code: u16, reason: &str) -> Self {
        match code {
            1008 => UpstreamError::AuthRejected(reason.to_string()),
            1002 | 1003 => UpstreamError::Fatal(format!("close code {code}: {reason}")),
            _ => UpstreamError::TransientProto(format!("close code {code}: {reason}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retriable() {
        assert!(UpstreamError::TransientNet("x".into()).is_retriable());
        assert!(UpstreamError::TransientProto("x".into()).is_retriable());
    }

    #[test]
    fn fatal_and_auth_errors_are_not_retriable() {
        assert!(!UpstreamError::Fatal("x".into()).is_retriable());
        assert!(!UpstreamError::AuthRejected("x".into()).is_retriable());
    }

    #[test]
    fn close_code_1008_is_auth_rejected() {
        assert!(matches!(
            UpstreamError::from_close_code(1008, "bad creds"),
            UpstreamError::AuthRejected(_)
        ));
    }

    #[test]
    fn close_code_1002_is_fatal() {
        assert!(matches!(
            UpstreamError::from_close_code(1002, "protocol error"),
            UpstreamError::Fatal(_)
        ));
    }
}
