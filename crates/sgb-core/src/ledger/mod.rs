//! Per-user daily token quota.
//!
//! Usage is checked before a request and debited with the provider-reported
//! token count after the reply is posted, so a user may overshoot the limit
//! by the cost of one request. Counters reset on the calendar-day boundary
//! in UTC+9.

mod row;
mod store;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::{domain::UserId, Result};

pub use row::{decode_row, encode_row, LEDGER_COLUMNS, LEDGER_RANGE};
pub use store::{LedgerStore, MemoryTable, RecordUpdate, RowTable, TableLedger};

pub const DAILY_TOKEN_LIMIT: u64 = 20_000;

/// Offset (seconds east of UTC) in which the daily boundary is evaluated.
pub const DAY_BOUNDARY_OFFSET_SECS: i32 = 9 * 60 * 60;

pub fn day_boundary_offset() -> FixedOffset {
    FixedOffset::east_opt(DAY_BOUNDARY_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageRecord {
    pub user_id: UserId,
    pub total_interactions: u64,
    pub last_used_at: Option<DateTime<FixedOffset>>,
    pub tokens_used_today: u64,
    pub tokens_used_all_time: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allowance {
    Allowed,
    Blocked,
}

impl UsageRecord {
    /// Zero record for a user seen for the first time.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_interactions: 0,
            last_used_at: None,
            tokens_used_today: 0,
            tokens_used_all_time: 0,
        }
    }

    /// Zero today's counter if `now` falls on a different UTC+9 calendar day
    /// than the last use, then stamp the record with `now`.
    pub fn reset_if_new_day(&mut self, now: DateTime<Utc>) {
        let offset = day_boundary_offset();
        let now = now.with_timezone(&offset);

        if let Some(last) = self.last_used_at {
            if last.with_timezone(&offset).date_naive() != now.date_naive() {
                self.tokens_used_today = 0;
            }
        }

        self.last_used_at = Some(now);
    }

    /// Strictly greater-than: a record sitting exactly at the limit still gets
    /// one more request.
    pub fn check_allowance(&self, daily_limit: u64) -> Allowance {
        if self.tokens_used_today > daily_limit {
            Allowance::Blocked
        } else {
            Allowance::Allowed
        }
    }

    pub fn add_usage(&mut self, tokens: u64) {
        self.total_interactions += 1;
        self.tokens_used_today += tokens;
        self.tokens_used_all_time += tokens;
    }
}

/// Quota operations over a [`LedgerStore`].
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn LedgerStore>,
    daily_limit: u64,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_limit(store, DAILY_TOKEN_LIMIT)
    }

    pub fn with_limit(store: Arc<dyn LedgerStore>, daily_limit: u64) -> Self {
        Self { store, daily_limit }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<UsageRecord>> {
        self.store.get(user_id).await
    }

    pub async fn ensure_record(&self, user_id: &UserId) -> Result<UsageRecord> {
        Ok(self
            .get(user_id)
            .await?
            .unwrap_or_else(|| UsageRecord::new(user_id.clone())))
    }

    pub fn check_allowance(&self, record: &UsageRecord) -> Allowance {
        record.check_allowance(self.daily_limit)
    }

    /// Debit `tokens` against the stored record for `user_id`.
    ///
    /// The day reset is re-applied to the freshly read record inside the
    /// store's atomic update, so a concurrent commit for the same user is
    /// never overwritten by a stale copy.
    pub async fn commit(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        tokens: u64,
    ) -> Result<UsageRecord> {
        let owner = user_id.clone();
        self.store
            .update(
                user_id,
                Box::new(move |current| {
                    let mut record = current.unwrap_or_else(|| UsageRecord::new(owner));
                    record.reset_if_new_day(now);
                    record.add_usage(tokens);
                    record
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jst(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        day_boundary_offset()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(today: u64, last: Option<DateTime<Utc>>) -> UsageRecord {
        UsageRecord {
            user_id: UserId("U1".to_string()),
            total_interactions: 3,
            last_used_at: last.map(|t| t.with_timezone(&day_boundary_offset())),
            tokens_used_today: today,
            tokens_used_all_time: 5_000,
        }
    }

    #[test]
    fn same_day_keeps_counter() {
        let mut r = record(100, Some(jst(2026, 10, 18, 0, 5)));
        let now = jst(2026, 10, 18, 23, 59);
        r.reset_if_new_day(now);
        assert_eq!(r.tokens_used_today, 100);
        assert_eq!(r.last_used_at.unwrap().with_timezone(&Utc), now);
    }

    #[test]
    fn previous_day_resets_counter() {
        let mut r = record(100, Some(jst(2026, 10, 17, 23, 59)));
        r.reset_if_new_day(jst(2026, 10, 18, 0, 0));
        assert_eq!(r.tokens_used_today, 0);
        assert_eq!(r.tokens_used_all_time, 5_000);
    }

    #[test]
    fn boundary_is_evaluated_in_utc_plus_nine() {
        // 14:00 and 16:00 UTC straddle midnight in UTC+9 while sharing a UTC date.
        let before = Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).single().unwrap();
        let after = Utc.with_ymd_and_hms(2026, 10, 18, 16, 0, 0).single().unwrap();
        let mut r = record(100, Some(before));
        r.reset_if_new_day(after);
        assert_eq!(r.tokens_used_today, 0);

        // 16:00 UTC on the 17th and 14:00 UTC on the 18th are both the 18th in UTC+9.
        let before = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).single().unwrap();
        let mut r = record(100, Some(before));
        r.reset_if_new_day(Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).single().unwrap());
        assert_eq!(r.tokens_used_today, 100);
    }

    #[test]
    fn missing_last_used_sets_now_without_reset() {
        let mut r = record(42, None);
        let now = jst(2026, 10, 18, 12, 0);
        r.reset_if_new_day(now);
        assert_eq!(r.tokens_used_today, 42);
        let stamped = r.last_used_at.unwrap();
        assert_eq!(stamped.with_timezone(&Utc), now);
        assert_eq!(stamped.offset().local_minus_utc(), DAY_BOUNDARY_OFFSET_SECS);
    }

    #[test]
    fn allowance_is_strictly_greater_than() {
        assert_eq!(
            record(15_000, None).check_allowance(DAILY_TOKEN_LIMIT),
            Allowance::Allowed
        );
        assert_eq!(
            record(20_000, None).check_allowance(DAILY_TOKEN_LIMIT),
            Allowance::Allowed
        );
        assert_eq!(
            record(20_001, None).check_allowance(DAILY_TOKEN_LIMIT),
            Allowance::Blocked
        );
    }

    #[test]
    fn add_usage_bumps_all_counters() {
        let mut r = record(10, None);
        r.add_usage(50);
        assert_eq!(r.total_interactions, 4);
        assert_eq!(r.tokens_used_today, 60);
        assert_eq!(r.tokens_used_all_time, 5_050);
    }

    fn memory_ledger() -> QuotaLedger {
        QuotaLedger::new(Arc::new(TableLedger::new(MemoryTable::default())))
    }

    #[tokio::test]
    async fn ensure_record_defaults_to_zero() {
        let ledger = memory_ledger();
        let user = UserId("U9".to_string());
        assert!(ledger.get(&user).await.unwrap().is_none());
        assert_eq!(
            ledger.ensure_record(&user).await.unwrap(),
            UsageRecord::new(user)
        );
    }

    #[tokio::test]
    async fn commit_creates_then_accumulates() {
        let ledger = memory_ledger();
        let user = UserId("U9".to_string());
        let now = jst(2026, 10, 18, 9, 0);

        ledger.commit(&user, now, 30).await.unwrap();
        let stored = ledger.commit(&user, now, 12).await.unwrap();

        assert_eq!(stored.total_interactions, 2);
        assert_eq!(stored.tokens_used_today, 42);
        assert_eq!(stored.tokens_used_all_time, 42);
        assert_eq!(ledger.get(&user).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn concurrent_commits_do_not_lose_updates() {
        let ledger = memory_ledger();
        let user = UserId("U9".to_string());
        let now = jst(2026, 10, 18, 9, 0);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                ledger.commit(&user, now, 10).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = ledger.get(&user).await.unwrap().unwrap();
        assert_eq!(stored.total_interactions, 16);
        assert_eq!(stored.tokens_used_today, 160);
    }
}
