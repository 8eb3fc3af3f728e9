use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{decode_row, encode_row, UsageRecord};
use crate::{domain::UserId, errors::Error, Result};

/// Mutation applied to the current stored record (if any) for one user.
pub type RecordUpdate = Box<dyn FnOnce(Option<UsageRecord>) -> UsageRecord + Send>;

/// Keyed usage store.
///
/// `update` must run the read-modify-write for a key atomically with respect
/// to other `update` calls on the same store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<UsageRecord>>;
    async fn update(&self, user_id: &UserId, apply: RecordUpdate) -> Result<UsageRecord>;
}

/// A whole-table backend: reads return every row, writes replace every row.
#[async_trait]
pub trait RowTable: Send + Sync {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>>;
    async fn write_rows(&self, rows: Vec<Vec<String>>) -> Result<()>;
}

/// [`LedgerStore`] over a [`RowTable`].
///
/// Every update rereads the table, rewrites it sorted ascending by user id,
/// and holds a lock for the duration so updates within this process are
/// serialized. Writers in other processes can still race.
///
/// When a user has several rows, the last one wins for both reads and
/// updates; the rewrite collapses them into one.
pub struct TableLedger<T> {
    table: T,
    write_lock: Mutex<()>,
}

impl<T: RowTable> TableLedger<T> {
    pub fn new(table: T) -> Self {
        Self {
            table,
            write_lock: Mutex::new(()),
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    async fn load(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let rows = self.table.read_rows().await?;
        let mut by_user = BTreeMap::new();
        for row in rows {
            if decode_row(&row).is_none() {
                continue;
            }
            by_user.insert(row[0].clone(), row);
        }
        Ok(by_user)
    }
}

#[async_trait]
impl<T: RowTable> LedgerStore for TableLedger<T> {
    async fn get(&self, user_id: &UserId) -> Result<Option<UsageRecord>> {
        let by_user = self.load().await?;
        Ok(by_user.get(user_id.as_str()).and_then(|row| decode_row(row)))
    }

    async fn update(&self, user_id: &UserId, apply: RecordUpdate) -> Result<UsageRecord> {
        let _guard = self.write_lock.lock().await;

        let mut by_user = self.load().await?;
        let current = by_user.get(user_id.as_str()).and_then(|row| decode_row(row));
        let updated = apply(current);
        by_user.insert(user_id.0.clone(), encode_row(&updated));

        self.table
            .write_rows(by_user.into_values().collect())
            .await?;

        tracing::debug!(
            user = %user_id,
            tokens_today = updated.tokens_used_today,
            "ledger row written"
        );
        Ok(updated)
    }
}

/// In-process table, used in tests and when no persistent backend is configured.
#[derive(Default)]
pub struct MemoryTable {
    rows: std::sync::Mutex<Vec<Vec<String>>>,
}

impl MemoryTable {
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: std::sync::Mutex::new(rows),
        }
    }

    pub fn rows(&self) -> Result<Vec<Vec<String>>> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .map_err(|_| Error::External("memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl RowTable for MemoryTable {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        self.rows()
    }

    async fn write_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let mut guard = self
            .rows
            .lock()
            .map_err(|_| Error::External("memory ledger lock poisoned".to_string()))?;
        *guard = rows;
        Ok(())
    }
}
