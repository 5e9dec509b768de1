use barstream_core::common::Minute;
use barstream_core::market::entity::Candle;
use std::collections::BTreeMap;

/// Bounded, key-ordered window of recent minute candles for one symbol.
///
/// # Summary
/// Unlike a ring buffer, a `BTreeMap<Minute, Candle>` keeps entries sorted
/// by the minute they belong to regardless of insertion order — needed
/// because backfilled history, upstream bar frames, and locally aggregated
/// trades can all populate the same buffer out of order.
///
/// # Invariants
/// - Never holds more than `capacity` entries; the oldest minute is evicted
///   first once that cap is reached.
pub struct CandleBuffer {
    data: BTreeMap<Minute, Candle>,
    capacity: usize,
}

pub const MAX_CANDLES: usize = 10_000;

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BTreeMap::new(),
            capacity,
        }
    }

    fn evict_if_over_capacity(&mut self) {
        while self.data.len() > self.capacity {
            self.data.pop_first();
        }
    }

    /// Applies a trade to the candle for its minute, opening a new one if
    /// none exists yet. Returns the candle after the update.
    pub fn update_trade(&mut self, time: Minute, price: f64, size: f64) -> Candle {
        let candle = self
            .data
            .entry(time)
            .and_modify(|c| c.apply_trade(price, size))
            .or_insert_with(|| Candle::open_with_trade(time, price, size));
        let result = *candle;
        self.evict_if_over_capacity();
        result
    }

    /// Inserts or overwrites the candle at its own `time` key.
    pub fn set(&mut self, candle: Candle) {
        self.data.insert(candle.time, candle);
        self.evict_if_over_capacity();
    }

    /// Inserts every candle whose minute isn't already present; existing
    /// entries are left untouched. Returns how many were actually inserted.
    pub fn bulk_insert(&mut self, candles: impl IntoIterator<Item = Candle>) -> usize {
        let mut inserted = 0;
        for candle in candles {
            if let std::collections::btree_map::Entry::Vacant(entry) = self.data.entry(candle.time)
            {
                entry.insert(candle);
                inserted += 1;
            }
        }
        self.evict_if_over_capacity();
        inserted
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.data.values().next_back()
    }

    /// Candles within `[start, end]`; either bound `None` means unbounded
    /// on that side.
    pub fn range(&self, start: Option<Minute>, end: Option<Minute>) -> Vec<Candle> {
        match (start, end) {
            (Some(s), Some(e)) => self.data.range(s..=e).map(|(_, c)| *c).collect(),
            (Some(s), None) => self.data.range(s..).map(|(_, c)| *c).collect(),
            (None, Some(e)) => self.data.range(..=e).map(|(_, c)| *c).collect(),
            (None, None) => self.data.values().copied().collect(),
        }
    }

    pub fn get(&self, time: &Minute) -> Option<&Candle> {
        self.data.get(time)
    }

    pub fn contains(&self, time: &Minute) -> bool {
        self.data.contains_key(time)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn minute(offset: i64) -> Minute {
        Minute::align(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap() + chrono::Duration::minutes(offset))
    }

    #[test]
    fn update_trade_opens_then_updates_candle() {
        let mut buf = CandleBuffer::new(10);
        buf.update_trade(minute(0), 100.0, 10.0);
        let c = buf.update_trade(minute(0), 105.0, 5.0);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 105.0);
        assert_eq!(c.close, 105.0);
        assert_eq!(c.volume, 15.0);
        assert_eq!(c.trade_count, 2);
    }

    #[test]
    fn bulk_insert_does_not_clobber_existing() {
        let mut buf = CandleBuffer::new(10);
        buf.update_trade(minute(0), 100.0, 1.0);
        let inserted = buf.bulk_insert(vec![Candle {
            time: minute(0),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            trade_count: 0,
            is_final: true,
        }]);
        assert_eq!(inserted, 0);
        assert_eq!(buf.get(&minute(0)).unwrap().open, 100.0);
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let mut buf = CandleBuffer::new(2);
        buf.update_trade(minute(0), 1.0, 1.0);
        buf.update_trade(minute(1), 2.0, 1.0);
        buf.update_trade(minute(2), 3.0, 1.0);
        assert_eq!(buf.len(), 2);
        assert!(!buf.contains(&minute(0)));
        assert!(buf.contains(&minute(2)));
    }

    #[test]
    fn range_is_open_ended_on_either_side() {
        let mut buf = CandleBuffer::new(10);
        for i in 0..5 {
            buf.update_trade(minute(i), 1.0, 1.0);
        }
        assert_eq!(buf.range(None, None).len(), 5);
        assert_eq!(buf.range(Some(minute(2)), None).len(), 3);
        assert_eq!(buf.range(None, Some(minute(2))).len(), 3);
    }

    #[test]
    fn latest_returns_most_recent_minute() {
        let mut buf = CandleBuffer::new(10);
        buf.update_trade(minute(5), 1.0, 1.0);
        buf.update_trade(minute(1), 2.0, 1.0);
        assert_eq!(buf.latest().unwrap().time, minute(5));
    }
}
