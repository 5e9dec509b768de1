use crate::common::{Principal, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 持久化订阅表的一行：某个主体对某个符号的某种订阅类型的当前状态。
///
/// # Invariants
/// - `(principal, symbol, subscription_type)` 组合唯一。
/// - `is_active = false` 表示曾经订阅过、现已取消（保留行以便审计与重新订阅的幂等性）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub principal: Principal,
    pub symbol: Symbol,
    pub subscription_type: crate::common::SubscriptionType,
    pub is_active: bool,
    pub last_active_at: DateTime<Utc>,
}
