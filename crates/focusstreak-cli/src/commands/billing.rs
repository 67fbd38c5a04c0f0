use std::sync::Arc;

use clap::Subcommand;
use focusstreak_core::{BillingEvent, BillingHandler, Config, Plan, TracingMetrics, UserId};

use super::{open_store, CliResult};

#[derive(Subcommand)]
pub enum BillingAction {
    /// A subscription payment went through
    Payment {
        #[arg(long)]
        user: UserId,
        /// monthly or yearly
        #[arg(long)]
        plan: Plan,
    },
    /// The subscription was cancelled
    Cancel {
        #[arg(long)]
        user: UserId,
    },
    /// Apply a webhook event given as JSON
    Apply {
        /// e.g. {"type":"payment_succeeded","user_id":"u1","plan":"monthly"}
        event: String,
    },
}

pub async fn run(action: BillingAction) -> CliResult {
    let config = Config::load()?;
    let handler = BillingHandler::new(open_store()?, config.billing.clone())
        .with_retry_policy(config.retry_policy())
        .with_metrics(Arc::new(TracingMetrics));

    let event = match action {
        BillingAction::Payment { user, plan } => BillingEvent::PaymentSucceeded {
            user_id: user,
            plan,
        },
        BillingAction::Cancel { user } => BillingEvent::SubscriptionCancelled { user_id: user },
        BillingAction::Apply { event } => serde_json::from_str(&event)?,
    };

    let balance = handler.apply(&event).await?;
    println!("{}", serde_json::to_string_pretty(&balance)?);
    Ok(())
}
