mod engine;
mod schedule;

pub use engine::{TimerEngine, TimerState};
pub use schedule::{SessionKind, TimerDurations};
