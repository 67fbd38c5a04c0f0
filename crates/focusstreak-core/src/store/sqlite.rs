use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{SavePassBalance, StreakRecord, StreakStore, StreakUpdate};
use crate::billing::Plan;
use crate::error::StoreError;
use crate::identity::UserId;
use crate::storage::Database;

/// [`StreakStore`] over the SQLite [`Database`].
///
/// rusqlite is blocking, so every call hops onto the blocking pool. Writes
/// run in IMMEDIATE transactions, which makes the CAS hold across processes
/// sharing the file.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Shared handle to the database, e.g. for the kv table.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    async fn with_db<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| StoreError::Fatal("database mutex poisoned".into()))?;
            op(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl StreakStore for SqliteStore {
    async fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>, StoreError> {
        let user_id = user_id.clone();
        self.with_db(move |db| Ok(db.get_streak(&user_id)?)).await
    }

    async fn get_save_pass_balance(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError> {
        let user_id = user_id.clone();
        self.with_db(move |db| Ok(db.get_save_pass_balance(&user_id)?))
            .await
    }

    async fn apply_streak_update(&self, update: &StreakUpdate) -> Result<(), StoreError> {
        let update = update.clone();
        self.with_db(move |db| db.apply_streak_update(&update)).await
    }

    async fn record_payment(
        &self,
        user_id: &UserId,
        plan: Plan,
        passes: u32,
    ) -> Result<SavePassBalance, StoreError> {
        let user_id = user_id.clone();
        self.with_db(move |db| db.record_payment(&user_id, plan, passes))
            .await
    }

    async fn revoke_entitlement(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError> {
        let user_id = user_id.clone();
        self.with_db(move |db| db.revoke_entitlement(&user_id)).await
    }
}
