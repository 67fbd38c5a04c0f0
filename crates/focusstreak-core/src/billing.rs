//! Billing collaborator.
//!
//! Translates subscription lifecycle events (already verified and decoded
//! by the webhook layer) into save-pass credits and entitlement changes.
//! Billing never touches streak records, and reconciliation never triggers
//! billing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BillingError, StoreError};
use crate::identity::UserId;
use crate::metrics::{Metric, MetricsSink, NoopMetrics};
use crate::retry::RetryPolicy;
use crate::storage::BillingConfig;
use crate::store::{SavePassBalance, StreakStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Yearly,
}

impl Plan {
    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Monthly => "monthly",
            Plan::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(Plan::Monthly),
            "yearly" | "year" | "annual" => Ok(Plan::Yearly),
            other => Err(format!("unknown plan '{other}' (expected monthly or yearly)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    PaymentSucceeded { user_id: UserId, plan: Plan },
    SubscriptionCancelled { user_id: UserId },
}

impl BillingEvent {
    pub fn user_id(&self) -> &UserId {
        match self {
            BillingEvent::PaymentSucceeded { user_id, .. }
            | BillingEvent::SubscriptionCancelled { user_id } => user_id,
        }
    }
}

pub struct BillingHandler<S> {
    store: Arc<S>,
    passes: BillingConfig,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl<S: StreakStore> BillingHandler<S> {
    pub fn new(store: Arc<S>, passes: BillingConfig) -> Self {
        Self {
            store,
            passes,
            policy: RetryPolicy::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Apply one billing event. Returns the resulting balance, or `None` when
    /// a cancellation arrives for a user who never paid.
    pub async fn apply(&self, event: &BillingEvent) -> Result<Option<SavePassBalance>, BillingError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.apply_once(event).await {
                Ok(balance) => {
                    info!(
                        user = %event.user_id(),
                        passes = balance.as_ref().map(|b| b.passes_remaining),
                        "billing event applied"
                    );
                    self.metrics.record(Metric::BillingApplied {
                        plan: balance.as_ref().and_then(|b| b.plan),
                        entitled: balance.as_ref().is_some_and(|b| b.entitled),
                    });
                    return Ok(balance);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(BillingError::Store(err));
            }
            if !self.policy.allows_retry_after(attempt) {
                return Err(BillingError::ExhaustedRetries {
                    attempts: attempt,
                    source: err,
                });
            }
            warn!(user = %event.user_id(), attempt, "billing update failed, retrying: {err}");
            self.policy.pause().await;
        }
    }

    async fn apply_once(&self, event: &BillingEvent) -> Result<Option<SavePassBalance>, StoreError> {
        match event {
            BillingEvent::PaymentSucceeded { user_id, plan } => {
                let passes = self.passes.passes_for(*plan);
                self.store
                    .record_payment(user_id, *plan, passes)
                    .await
                    .map(Some)
            }
            BillingEvent::SubscriptionCancelled { user_id } => {
                self.store.revoke_entitlement(user_id).await
            }
        }
    }
}
