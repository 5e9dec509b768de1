use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 证券代码标识符，所有上游/缓存/存储层以此作为路由键。
///
/// # Invariants
/// - 内部存储始终为大写、去除首尾空白的字符串。
/// - 两个 `Symbol` 的相等性即代表同一条聚合流水线。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// # Summary
/// 订阅方的不透明身份标识，来自鉴权层（JWT `sub` 或 API key 主体）。
///
/// # Invariants
/// - 本层不关心该标识的内部结构，只用于在注册表/风扇出表中分组。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Principal {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// # Summary
/// 订阅类型：决定上游控制帧投递到哪个数组，以及是否受符号数配额约束。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Trades,
    Quotes,
    Bars,
}

impl SubscriptionType {
    /// 受上游 N=30 符号配额约束的订阅类型；`Bars` 在上游侧不设上限。
    pub fn is_capped(self) -> bool {
        matches!(self, SubscriptionType::Trades | SubscriptionType::Quotes)
    }
}

impl FromStr for SubscriptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trades" | "trade" => Ok(SubscriptionType::Trades),
            "quotes" | "quote" => Ok(SubscriptionType::Quotes),
            "bars" | "bar" => Ok(SubscriptionType::Bars),
            _ => Err(format!("unknown subscription type: {s}")),
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionType::Trades => write!(f, "trades"),
            SubscriptionType::Quotes => write!(f, "quotes"),
            SubscriptionType::Bars => write!(f, "bars"),
        }
    }
}

/// # Summary
/// 分钟对齐的时间戳，K 线桶的唯一键。
///
/// # Invariants
/// - 秒、纳秒分量恒为零；构造路径只能通过 `align`。
/// - 实现 `Ord` 以支持 `BTreeMap<Minute, Candle>` 的按键排序迭代。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Minute(DateTime<Utc>);

impl Minute {
    /// 将任意时间戳向下取整到分钟边界。
    pub fn align(ts: DateTime<Utc>) -> Self {
        let aligned = ts
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(ts);
        Self(aligned)
    }

    pub fn now() -> Self {
        Self::align(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn succ(&self) -> Self {
        Self(self.0 + Duration::minutes(1))
    }

    pub fn pred(&self) -> Self {
        Self(self.0 - Duration::minutes(1))
    }
}

impl From<DateTime<Utc>> for Minute {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::align(ts)
    }
}

impl fmt::Display for Minute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

impl FromStr for Minute {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self::align(dt.with_timezone(&Utc)))
    }
}

/// 自 Unix epoch 起的毫秒数构造一个 UTC 时间戳；上游帧里的常见格式。
pub fn datetime_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_canonicalizes_case_and_whitespace() {
        assert_eq!(Symbol::new(" aapl "), Symbol::new("AAPL"));
    }

    #[test]
    fn subscription_type_capped() {
        assert!(SubscriptionType::Trades.is_capped());
        assert!(SubscriptionType::Quotes.is_capped());
        assert!(!SubscriptionType::Bars.is_capped());
    }

    #[test]
    fn subscription_type_roundtrips_display() {
        for ty in [
            SubscriptionType::Trades,
            SubscriptionType::Quotes,
            SubscriptionType::Bars,
        ] {
            assert_eq!(ty.to_string().parse::<SubscriptionType>().unwrap(), ty);
        }
    }

    #[test]
    fn minute_truncates_seconds_and_nanos() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 31, 47).unwrap();
        let minute = Minute::align(ts);
        assert_eq!(minute.as_datetime().second(), 0);
        assert_eq!(minute.as_datetime().nanosecond(), 0);
    }

    #[test]
    fn minute_is_idempotent() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 31, 0).unwrap();
        assert_eq!(Minute::align(ts), Minute::align(Minute::align(ts).as_datetime()));
    }

    #[test]
    fn minute_succ_pred_roundtrip() {
        let m = Minute::now();
        assert_eq!(m.succ().pred(), m);
    }
}
