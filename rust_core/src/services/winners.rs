//! Winner determination and payout.
//!
//! Runs after scoring. Perfect entries (4 picks, 4 hits) split the
//! week's pooled pot across every team; with no winners the pot rolls
//! to the next week, or into the team's season pot at season end.
//! Everything happens in one database transaction, and pools already
//! marked scored short-circuit so a re-run cannot pay twice.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};

use crate::error::SettlementError;
use crate::models::{Week, WeeklyPrizePool};
use crate::services::balance;
use crate::services::scoring::EntrySummary;
use crate::utils::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverDestination {
    NextWeek { week_id: i64 },
    SeasonPot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverRecord {
    pub team_id: i64,
    pub amount: Money,
    pub destination: RolloverDestination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinnerAward {
    pub user_id: i64,
    pub team_id: i64,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct WinnerReport {
    pub week_id: i64,
    /// Every pool of the week was already settled; nothing was changed
    pub already_scored: bool,
    pub winner_count: usize,
    /// Pooled pot across all teams (weekly pools plus rollovers)
    pub pot: Money,
    pub payout_per_winner: Money,
    /// Sub-cent dust that cannot split evenly; stays unbooked
    pub undistributed: Money,
    pub winners: Vec<WinnerAward>,
    pub rollovers: Vec<RolloverRecord>,
    /// Per-team problems (a winner whose team has no pool); the payout
    /// is withheld and the rest of the week settles
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl WinnerReport {
    fn empty(week_id: i64, dry_run: bool) -> Self {
        Self {
            week_id,
            already_scored: false,
            winner_count: 0,
            pot: Money::zero(),
            payout_per_winner: Money::zero(),
            undistributed: Money::zero(),
            winners: Vec::new(),
            rollovers: Vec::new(),
            errors: Vec::new(),
            dry_run,
        }
    }
}

/// Filter graded entries down to perfect weeks.
pub fn perfect_entries(entries: &[EntrySummary]) -> Vec<EntrySummary> {
    entries.iter().filter(|e| e.is_perfect()).copied().collect()
}

/// Split winners into those whose team has a pool and those orphaned
/// by a missing one.
fn partition_winners(
    winners: &[EntrySummary],
    pool_teams: &HashSet<i64>,
) -> (Vec<EntrySummary>, Vec<EntrySummary>) {
    winners
        .iter()
        .copied()
        .partition(|w| pool_teams.contains(&w.team_id))
}

/// Settle the week's pools: pay perfect pickers or roll the pot over.
///
/// `entries` are the graded totals from the scoring stage. With
/// `dry_run` the whole transaction is rolled back after computing the
/// report.
pub async fn determine_winners(
    pool: &PgPool,
    week: &Week,
    entries: &[EntrySummary],
    dry_run: bool,
) -> Result<WinnerReport> {
    let mut tx = pool.begin().await?;
    let mut report = WinnerReport::empty(week.id, dry_run);

    let pool_rows = sqlx::query(
        "SELECT * FROM weekly_prize_pools WHERE week_id = $1 ORDER BY team_id FOR UPDATE",
    )
    .bind(week.id)
    .fetch_all(&mut *tx)
    .await
    .context("failed to lock prize pools")?;
    let pools = pool_rows
        .iter()
        .map(WeeklyPrizePool::from_row)
        .collect::<Result<Vec<_>>>()?;

    if !pools.is_empty() && pools.iter().all(|p| p.is_scored) {
        info!(week_id = week.id, "week already settled, skipping");
        report.already_scored = true;
        return Ok(report);
    }

    let winners = perfect_entries(entries);
    report.winner_count = winners.len();

    if winners.is_empty() {
        rollover_pools(&mut tx, week, &pools, &mut report).await?;
    } else {
        pay_winners(&mut tx, week, &pools, &winners, &mut report).await?;
    }

    if dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }

    Ok(report)
}

/// No perfect pickers: move each pool's payable amount forward.
async fn rollover_pools(
    tx: &mut Transaction<'_, Postgres>,
    week: &Week,
    pools: &[WeeklyPrizePool],
    report: &mut WinnerReport,
) -> Result<()> {
    let next_week = sqlx::query(
        "SELECT id FROM weeks WHERE season_year = $1 AND week_number = $2",
    )
    .bind(week.season_year)
    .bind(week.week_number + 1)
    .fetch_optional(&mut **tx)
    .await
    .context("failed to look up next week")?;
    let next_week_id: Option<i64> = match &next_week {
        Some(row) => Some(row.try_get("id")?),
        None => None,
    };

    for p in pools {
        if p.is_scored {
            continue;
        }
        let amount = p.payable();

        let destination = match next_week_id {
            Some(week_id) => {
                sqlx::query(
                    r#"
                    INSERT INTO weekly_prize_pools (team_id, week_id, rollover_from_previous_cents)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (team_id, week_id) DO UPDATE SET
                        rollover_from_previous_cents =
                            weekly_prize_pools.rollover_from_previous_cents
                            + EXCLUDED.rollover_from_previous_cents
                    "#,
                )
                .bind(p.team_id)
                .bind(week_id)
                .bind(amount.cents())
                .execute(&mut **tx)
                .await
                .context("failed to roll pot into next week")?;
                RolloverDestination::NextWeek { week_id }
            }
            None => {
                // Season over: the pot feeds the season-end prizes
                sqlx::query(
                    r#"
                    INSERT INTO season_pots (team_id, season_year, total_accumulated_cents)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (team_id, season_year) DO UPDATE SET
                        total_accumulated_cents =
                            season_pots.total_accumulated_cents + EXCLUDED.total_accumulated_cents
                    "#,
                )
                .bind(p.team_id)
                .bind(week.season_year)
                .bind(amount.cents())
                .execute(&mut **tx)
                .await
                .context("failed to divert pot to season pot")?;
                RolloverDestination::SeasonPot
            }
        };

        sqlx::query(
            r#"
            UPDATE weekly_prize_pools
            SET num_perfect_picks = 0,
                payout_per_winner_cents = 0,
                rollover_to_next_cents = $1,
                rollover_from_previous_cents = 0,
                is_scored = TRUE,
                scored_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(amount.cents())
        .bind(p.id)
        .execute(&mut **tx)
        .await
        .context("failed to close rolled-over pool")?;

        report.rollovers.push(RolloverRecord {
            team_id: p.team_id,
            amount,
            destination,
        });
        info!(
            week_id = week.id,
            team_id = p.team_id,
            %amount,
            ?destination,
            "no perfect pickers, pot rolled over"
        );
    }

    Ok(())
}

/// Perfect pickers split the pooled pot at one shared rate.
///
/// A winner whose team has no pool row is a data anomaly: the payout
/// is withheld and reported, and the remaining winners split the pot.
/// No pools at all with winners present is a hard stop.
async fn pay_winners(
    tx: &mut Transaction<'_, Postgres>,
    week: &Week,
    pools: &[WeeklyPrizePool],
    winners: &[EntrySummary],
    report: &mut WinnerReport,
) -> Result<()> {
    if pools.is_empty() {
        return Err(SettlementError::MissingPrizePools { week_id: week.id }.into());
    }
    let pool_by_team: HashMap<i64, &WeeklyPrizePool> =
        pools.iter().map(|p| (p.team_id, p)).collect();

    let pool_teams: HashSet<i64> = pools.iter().map(|p| p.team_id).collect();
    let (payable_winners, orphaned) = partition_winners(winners, &pool_teams);
    for winner in &orphaned {
        warn!(
            week_id = week.id,
            team_id = winner.team_id,
            user_id = winner.user_id,
            "winner's team has no prize pool, payout withheld"
        );
        report.errors.push(format!(
            "team {} has no prize pool; payout withheld for user {}",
            winner.team_id, winner.user_id
        ));
    }
    if payable_winners.is_empty() {
        return Err(SettlementError::MissingPrizePools { week_id: week.id }.into());
    }

    // Cross-team pooling: every team's payable amount funds one pot
    let pot: Money = pools.iter().map(|p| p.payable()).sum();
    let (per_winner, undistributed) = pot.split_even(payable_winners.len() as i64);
    report.pot = pot;
    report.payout_per_winner = per_winner;
    report.undistributed = undistributed;
    if !undistributed.is_zero() {
        warn!(week_id = week.id, %undistributed, "pot does not split evenly");
    }

    let mut winners_per_team: HashMap<i64, i32> = HashMap::new();
    for winner in &payable_winners {
        let team_pool = pool_by_team
            .get(&winner.team_id)
            .ok_or(SettlementError::MissingPrizePools { week_id: week.id })?;

        let payout_row = sqlx::query(
            r#"
            INSERT INTO weekly_payouts
                (pool_id, user_id, team_id, week_id, amount_cents,
                 perfect_picks, total_picks, payout_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'paid')
            RETURNING id
            "#,
        )
        .bind(team_pool.id)
        .bind(winner.user_id)
        .bind(winner.team_id)
        .bind(week.id)
        .bind(per_winner.cents())
        .bind(winner.points)
        .bind(winner.picks)
        .fetch_one(&mut **tx)
        .await
        .context("failed to record payout")?;
        let payout_id: i64 = payout_row.try_get("id")?;

        balance::credit_on(
            tx,
            winner.user_id,
            per_winner,
            &format!("Week {} perfect week winnings", week.week_number),
            Some(payout_id),
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE user_profiles
            SET total_lifetime_winnings_cents = total_lifetime_winnings_cents + $1
            WHERE user_id = $2
            "#,
        )
        .bind(per_winner.cents())
        .bind(winner.user_id)
        .execute(&mut **tx)
        .await
        .context("failed to update lifetime winnings")?;

        *winners_per_team.entry(winner.team_id).or_default() += 1;
        report.winners.push(WinnerAward {
            user_id: winner.user_id,
            team_id: winner.team_id,
            amount: per_winner,
        });
        info!(
            week_id = week.id,
            user_id = winner.user_id,
            team_id = winner.team_id,
            amount = %per_winner,
            "perfect week payout"
        );
    }

    for p in pools {
        sqlx::query(
            r#"
            UPDATE weekly_prize_pools
            SET num_perfect_picks = $1,
                payout_per_winner_cents = $2,
                rollover_to_next_cents = 0,
                rollover_from_previous_cents = 0,
                is_scored = TRUE,
                scored_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(winners_per_team.get(&p.team_id).copied().unwrap_or(0))
        .bind(per_winner.cents())
        .bind(p.id)
        .execute(&mut **tx)
        .await
        .context("failed to close paid pool")?;
    }

    Ok(())
}
