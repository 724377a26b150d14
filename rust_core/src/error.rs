//! Typed errors for settlement operations that callers branch on.
//!
//! Expected business outcomes (no winners, insufficient funds, a week
//! already scored) are carried in the stage reports instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("week {0} not found")]
    WeekNotFound(i64),

    #[error("no week found for slate date {0}")]
    NoWeekForDate(chrono::NaiveDate),

    #[error("no active week for season {0}")]
    NoActiveWeek(i32),

    #[error("week {week_id} has perfect pickers but no prize pools")]
    MissingPrizePools { week_id: i64 },
}
