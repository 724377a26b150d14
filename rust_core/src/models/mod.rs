// Shared domain models for the Pick 4 settlement services
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::fmt;

use crate::utils::money::Money;

// ============================================================================
// Pick Categories
// ============================================================================

/// The four weekly pick categories.
///
/// Stored in the database by wire code ("2H", "HR", "SWP", "S").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Batter records 2 or more hits on the slate date
    #[serde(rename = "2H")]
    TwoHits,
    /// Batter hits at least one home run
    #[serde(rename = "HR")]
    HomeRun,
    /// Pitcher starts the game and is credited with the win
    #[serde(rename = "SWP")]
    StartingWinningPitcher,
    /// Pitcher is credited with a save
    #[serde(rename = "S")]
    Save,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::TwoHits,
        Category::HomeRun,
        Category::StartingWinningPitcher,
        Category::Save,
    ];

    /// Number of picks in a complete weekly entry (one per category).
    pub const PICKS_PER_ENTRY: i32 = 4;

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TwoHits => "2H",
            Category::HomeRun => "HR",
            Category::StartingWinningPitcher => "SWP",
            Category::Save => "S",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "2H" => Some(Category::TwoHits),
            "HR" => Some(Category::HomeRun),
            "SWP" => Some(Category::StartingWinningPitcher),
            "S" => Some(Category::Save),
            _ => None,
        }
    }

    /// Whether this category is satisfied by pitching rather than batting stats.
    pub fn is_pitching(&self) -> bool {
        matches!(
            self,
            Category::StartingWinningPitcher | Category::Save
        )
    }

    /// Achievement threshold against the summed stat value for the slate date.
    ///
    /// For SWP the stat is 1 iff the pitcher both started and got the win,
    /// so the shared >= 1 threshold applies there too.
    pub fn achieved(&self, stat_value: i32) -> bool {
        match self {
            Category::TwoHits => stat_value >= 2,
            Category::HomeRun => stat_value >= 1,
            Category::StartingWinningPitcher => stat_value >= 1,
            Category::Save => stat_value >= 1,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickResult {
    Pending,
    Hit,
    Miss,
}

impl PickResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickResult::Pending => "pending",
            PickResult::Hit => "hit",
            PickResult::Miss => "miss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PickResult::Pending),
            "hit" => Some(PickResult::Hit),
            "miss" => Some(PickResult::Miss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Payment,
    Refund,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Payment => "payment",
            TransactionType::Refund => "refund",
            TransactionType::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            "payment" => Some(TransactionType::Payment),
            "refund" => Some(TransactionType::Refund),
            "adjustment" => Some(TransactionType::Adjustment),
            _ => None,
        }
    }

    /// Signed effect of a transaction of this type on the balance.
    ///
    /// Adjustments carry their own sign in the amount column.
    pub fn signed_delta(&self, amount: Money) -> Money {
        match self {
            TransactionType::Deposit | TransactionType::Refund => amount,
            TransactionType::Withdrawal | TransactionType::Payment => -amount,
            TransactionType::Adjustment => amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Core Entities
// ============================================================================

/// A contest week, anchored to its Saturday slate date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Week {
    pub id: i64,
    pub week_number: i32,
    pub season_year: i32,
    pub saturday_date: NaiveDate,
    pub deadline_utc: DateTime<Utc>,
    pub is_active: bool,
    pub is_completed: bool,
}

impl Week {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            week_number: row.try_get("week_number")?,
            season_year: row.try_get("season_year")?,
            saturday_date: row.try_get("saturday_date")?,
            deadline_utc: row.try_get("deadline_utc")?,
            is_active: row.try_get("is_active")?,
            is_completed: row.try_get("is_completed")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlbPlayer {
    pub id: i64,
    /// Player id in the MLB Stats API
    pub mlb_player_id: i64,
    pub full_name: String,
    pub team_abbreviation: String,
    pub position: String,
    pub is_pitcher: bool,
    pub is_active: bool,
}

impl MlbPlayer {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            mlb_player_id: row.try_get("mlb_player_id")?,
            full_name: row.try_get("full_name")?,
            team_abbreviation: row.try_get("team_abbreviation")?,
            position: row.try_get("position")?,
            is_pitcher: row.try_get("is_pitcher")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

/// One user's pick of a player in one category for one week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub id: i64,
    pub user_id: i64,
    pub team_id: i64,
    pub week_id: i64,
    pub category: Category,
    pub player_id: i64,
    pub result_status: PickResult,
    pub points_earned: i32,
    pub scored_at: Option<DateTime<Utc>>,
    pub notes: String,
}

impl Pick {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        let category_code: String = row.try_get("category")?;
        let category = match Category::parse(&category_code) {
            Some(c) => c,
            None => bail!("unknown pick category: {}", category_code),
        };
        let status_code: String = row.try_get("result_status")?;
        let result_status = match PickResult::parse(&status_code) {
            Some(s) => s,
            None => bail!("unknown pick result status: {}", status_code),
        };
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            team_id: row.try_get("team_id")?,
            week_id: row.try_get("week_id")?,
            category,
            player_id: row.try_get("player_id")?,
            result_status,
            points_earned: row.try_get("points_earned")?,
            scored_at: row.try_get("scored_at")?,
            notes: row.try_get("notes")?,
        })
    }
}

/// Whether a player achieved a category on the slate date.
///
/// `stat_value` is summed across all qualifying games of the date;
/// `game_ids` keeps a comma-joined provenance trail of gamePks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyResult {
    pub id: i64,
    pub week_id: i64,
    pub player_id: i64,
    pub category: Category,
    pub achieved: bool,
    pub stat_value: i32,
    pub game_date: NaiveDate,
    pub game_ids: String,
}

impl WeeklyResult {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        let category_code: String = row.try_get("category")?;
        let category = match Category::parse(&category_code) {
            Some(c) => c,
            None => bail!("unknown result category: {}", category_code),
        };
        Ok(Self {
            id: row.try_get("id")?,
            week_id: row.try_get("week_id")?,
            player_id: row.try_get("player_id")?,
            category,
            achieved: row.try_get("achieved")?,
            stat_value: row.try_get("stat_value")?,
            game_date: row.try_get("game_date")?,
            game_ids: row.try_get("game_ids")?,
        })
    }
}

/// Per-(team, week) pot bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPrizePool {
    pub id: i64,
    pub team_id: i64,
    pub week_id: i64,
    pub total_collected: Money,
    pub rollover_from_previous: Money,
    pub weekly_pool_amount: Money,
    pub season_pot_contribution: Money,
    pub company_fee: Money,
    pub num_perfect_picks: i32,
    pub payout_per_winner: Money,
    pub rollover_to_next: Money,
    pub is_scored: bool,
    pub scored_at: Option<DateTime<Utc>>,
}

impl WeeklyPrizePool {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            week_id: row.try_get("week_id")?,
            total_collected: Money::from_cents(row.try_get("total_collected_cents")?),
            rollover_from_previous: Money::from_cents(
                row.try_get("rollover_from_previous_cents")?,
            ),
            weekly_pool_amount: Money::from_cents(row.try_get("weekly_pool_cents")?),
            season_pot_contribution: Money::from_cents(
                row.try_get("season_pot_contribution_cents")?,
            ),
            company_fee: Money::from_cents(row.try_get("company_fee_cents")?),
            num_perfect_picks: row.try_get("num_perfect_picks")?,
            payout_per_winner: Money::from_cents(row.try_get("payout_per_winner_cents")?),
            rollover_to_next: Money::from_cents(row.try_get("rollover_to_next_cents")?),
            is_scored: row.try_get("is_scored")?,
            scored_at: row.try_get("scored_at")?,
        })
    }

    /// Amount this pool contributes to the week's payable pot.
    pub fn payable(&self) -> Money {
        self.weekly_pool_amount + self.rollover_from_previous
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPayout {
    pub id: i64,
    pub pool_id: i64,
    pub user_id: i64,
    pub team_id: i64,
    pub week_id: i64,
    pub amount: Money,
    pub perfect_picks: i32,
    pub total_picks: i32,
    pub payout_status: PayoutStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub status: TransactionStatus,
    pub description: String,
    pub related_payment_id: Option<i64>,
    pub related_payout_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl AccountTransaction {
    pub fn from_row(row: &PgRow) -> Result<Self> {
        let type_code: String = row.try_get("transaction_type")?;
        let transaction_type = TransactionType::parse(&type_code)
            .with_context(|| format!("unknown transaction type: {}", type_code))?;
        let status_code: String = row.try_get("status")?;
        let status = match status_code.as_str() {
            "pending" => TransactionStatus::Pending,
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            "cancelled" => TransactionStatus::Cancelled,
            other => bail!("unknown transaction status: {}", other),
        };
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            transaction_type,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            balance_before: Money::from_cents(row.try_get("balance_before_cents")?),
            balance_after: Money::from_cents(row.try_get("balance_after_cents")?),
            status,
            description: row.try_get("description")?,
            related_payment_id: row.try_get("related_payment_id")?,
            related_payout_id: row.try_get("related_payout_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes_roundtrip() {
        for cat in Category::ALL {
            assert_eq!(Category::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(Category::parse("XX"), None);
    }

    #[test]
    fn test_category_thresholds() {
        assert!(!Category::TwoHits.achieved(1));
        assert!(Category::TwoHits.achieved(2));
        assert!(Category::TwoHits.achieved(3));

        assert!(!Category::HomeRun.achieved(0));
        assert!(Category::HomeRun.achieved(1));

        assert!(!Category::StartingWinningPitcher.achieved(0));
        assert!(Category::StartingWinningPitcher.achieved(1));

        assert!(!Category::Save.achieved(0));
        assert!(Category::Save.achieved(1));
    }

    #[test]
    fn test_category_pitching_flag() {
        assert!(!Category::TwoHits.is_pitching());
        assert!(!Category::HomeRun.is_pitching());
        assert!(Category::StartingWinningPitcher.is_pitching());
        assert!(Category::Save.is_pitching());
    }

    #[test]
    fn test_category_serde_wire_codes() {
        assert_eq!(
            serde_json::to_string(&Category::TwoHits).unwrap(),
            "\"2H\""
        );
        let cat: Category = serde_json::from_str("\"SWP\"").unwrap();
        assert_eq!(cat, Category::StartingWinningPitcher);
    }

    #[test]
    fn test_transaction_signed_delta() {
        let ten = Money::from_cents(1000);
        assert_eq!(TransactionType::Deposit.signed_delta(ten), ten);
        assert_eq!(TransactionType::Refund.signed_delta(ten), ten);
        assert_eq!(TransactionType::Payment.signed_delta(ten), -ten);
        assert_eq!(TransactionType::Withdrawal.signed_delta(ten), -ten);
        assert_eq!(
            TransactionType::Adjustment.signed_delta(-ten),
            -ten
        );
    }

    #[test]
    fn test_pick_result_parse() {
        assert_eq!(PickResult::parse("hit"), Some(PickResult::Hit));
        assert_eq!(PickResult::parse("miss"), Some(PickResult::Miss));
        assert_eq!(PickResult::parse("pending"), Some(PickResult::Pending));
        assert_eq!(PickResult::parse("won"), None);
    }
}
