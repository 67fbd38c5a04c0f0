//! # focusstreak Core Library
//!
//! Core logic for a Pomodoro focus timer with daily streaks. Everything is
//! available through the `focusstreak-cli` binary; any GUI is a thin layer
//! over this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a tick-driven work/break state machine. The caller
//!   invokes `tick()` once per second; the engine performs no I/O.
//! - **Streak Service**: turns each completed work session into an atomic
//!   streak update, spending a save pass to bridge one missed day, with
//!   bounded retries and a timeout budget.
//! - **Store**: the `StreakStore` trait with SQLite and in-memory backends.
//! - **Billing**: credits save passes and toggles entitlement on
//!   subscription events.
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`StreakService`]: Streak reconciliation
//! - [`StreakStore`]: Durable store contract
//! - [`Config`]: Application configuration management

pub mod billing;
pub mod error;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod retry;
pub mod storage;
pub mod store;
pub mod streak;
pub mod timer;

pub use billing::{BillingEvent, BillingHandler, Plan};
pub use error::{
    BillingError, ConfigError, CoreError, DatabaseError, ReconcileError, StoreError,
    ValidationError,
};
pub use events::{Event, EventBus};
pub use identity::{Identity, UserId};
pub use metrics::{Metric, MetricsSink, NoopMetrics, RecordingMetrics, TracingMetrics};
pub use retry::RetryPolicy;
pub use storage::{Config, Database};
pub use store::{MemoryStore, SavePassBalance, SqliteStore, StreakRecord, StreakStore, StreakUpdate};
pub use streak::{PendingQueue, ReconcileOutcome, StreakResult, StreakService};
pub use timer::{SessionKind, TimerDurations, TimerEngine, TimerState};
