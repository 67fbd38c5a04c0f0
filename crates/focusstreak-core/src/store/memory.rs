use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{check_update, SavePassBalance, StreakRecord, StreakStore, StreakUpdate};
use crate::billing::Plan;
use crate::error::StoreError;
use crate::identity::UserId;

#[derive(Debug, Default)]
struct Inner {
    streaks: HashMap<UserId, StreakRecord>,
    balances: HashMap<UserId, SavePassBalance>,
}

/// Process-local store. Both maps sit behind one lock, so every update is
/// atomic with respect to every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a streak record.
    pub fn insert_streak(&self, record: StreakRecord) {
        if let Ok(mut inner) = self.lock() {
            inner.streaks.insert(record.user_id.clone(), record);
        }
    }

    /// Seed or overwrite a save-pass balance.
    pub fn insert_balance(&self, balance: SavePassBalance) {
        if let Ok(mut inner) = self.lock() {
            inner.balances.insert(balance.user_id.clone(), balance);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl StreakStore for MemoryStore {
    async fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>, StoreError> {
        Ok(self.lock()?.streaks.get(user_id).cloned())
    }

    async fn get_save_pass_balance(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError> {
        Ok(self.lock()?.balances.get(user_id).cloned())
    }

    async fn apply_streak_update(&self, update: &StreakUpdate) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let user_id = update.user_id();
        let passes = check_update(
            update,
            inner.streaks.get(user_id),
            inner.balances.get(user_id),
        )?;

        if let Some(passes) = passes {
            inner
                .balances
                .entry(user_id.clone())
                .or_insert_with(|| SavePassBalance::empty(user_id.clone()))
                .passes_remaining = passes;
        }
        inner.streaks.insert(user_id.clone(), update.record.clone());
        Ok(())
    }

    async fn record_payment(
        &self,
        user_id: &UserId,
        plan: Plan,
        passes: u32,
    ) -> Result<SavePassBalance, StoreError> {
        let mut inner = self.lock()?;
        let balance = inner
            .balances
            .entry(user_id.clone())
            .or_insert_with(|| SavePassBalance::empty(user_id.clone()));
        balance.passes_remaining = balance.passes_remaining.saturating_add(passes);
        balance.entitled = true;
        balance.plan = Some(plan);
        Ok(balance.clone())
    }

    async fn revoke_entitlement(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.balances.get_mut(user_id).map(|balance| {
            balance.entitled = false;
            balance.clone()
        }))
    }
}
