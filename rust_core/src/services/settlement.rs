//! Weekly settlement pipeline.
//!
//! Runs the four stages in order: result ingestion, scoring, winner
//! determination, standings aggregation. Each stage is idempotent on
//! its own, so a crashed run can simply be re-run. After a live run
//! the week is marked completed and the next week becomes the single
//! active week of the season.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::clients::statsapi::StatsProvider;
use crate::error::SettlementError;
use crate::models::Week;
use crate::services::results::{self, IngestReport};
use crate::services::scoring::{self, ScoringReport};
use crate::services::standings::{self, StandingsReport};
use crate::services::winners::{self, WinnerReport};

#[derive(Debug, Clone, Copy)]
pub struct SettlementOptions {
    /// Compute and report everything, persist nothing
    pub dry_run: bool,
    /// Fetch results from the stats API before scoring
    pub fetch_results: bool,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            fetch_results: true,
        }
    }
}

#[derive(Debug)]
pub struct SettlementReport {
    pub week_id: i64,
    pub week_number: i32,
    pub season_year: i32,
    pub ingest: Option<IngestReport>,
    pub scoring: ScoringReport,
    pub winners: WinnerReport,
    /// Skipped on dry runs: a recompute over unpersisted scoring would
    /// write stale aggregates
    pub standings: Option<StandingsReport>,
    pub week_completed: bool,
    pub activated_week_id: Option<i64>,
    pub dry_run: bool,
}

pub async fn load_week(pool: &PgPool, week_id: i64) -> Result<Week> {
    let row = sqlx::query("SELECT * FROM weeks WHERE id = $1")
        .bind(week_id)
        .fetch_optional(pool)
        .await
        .context("failed to load week")?;
    match row {
        Some(row) => Week::from_row(&row),
        None => Err(SettlementError::WeekNotFound(week_id).into()),
    }
}

/// Find the week whose Saturday slate is `date`.
pub async fn find_week_by_date(pool: &PgPool, date: chrono::NaiveDate) -> Result<Week> {
    let row = sqlx::query("SELECT * FROM weeks WHERE saturday_date = $1")
        .bind(date)
        .fetch_optional(pool)
        .await
        .context("failed to look up week by date")?;
    match row {
        Some(row) => Week::from_row(&row),
        None => Err(SettlementError::NoWeekForDate(date).into()),
    }
}

pub async fn find_active_week(pool: &PgPool, season_year: i32) -> Result<Week> {
    let row = sqlx::query(
        "SELECT * FROM weeks WHERE season_year = $1 AND is_active ORDER BY week_number LIMIT 1",
    )
    .bind(season_year)
    .fetch_optional(pool)
    .await
    .context("failed to look up active week")?;
    match row {
        Some(row) => Week::from_row(&row),
        None => Err(SettlementError::NoActiveWeek(season_year).into()),
    }
}

/// Settle one week end to end.
pub async fn run_week<P: StatsProvider + ?Sized>(
    pool: &PgPool,
    provider: &P,
    week_id: i64,
    opts: SettlementOptions,
) -> Result<SettlementReport> {
    let week = load_week(pool, week_id).await?;
    info!(
        week_id,
        week_number = week.week_number,
        season_year = week.season_year,
        dry_run = opts.dry_run,
        "settling week"
    );

    let ingest = if opts.fetch_results {
        Some(results::ingest_week(pool, provider, &week, opts.dry_run).await?)
    } else {
        None
    };

    // A dry run never persisted the fetched facts, so scoring grades
    // against the ingest report's rows instead of `weekly_results`.
    let in_memory = ingest
        .as_ref()
        .filter(|_| opts.dry_run)
        .map(|r| r.results.as_slice());
    let scoring = scoring::score_week(pool, &week, in_memory, opts.dry_run).await?;
    let winners =
        winners::determine_winners(pool, &week, &scoring.entries, opts.dry_run).await?;

    let mut report = SettlementReport {
        week_id,
        week_number: week.week_number,
        season_year: week.season_year,
        ingest,
        scoring,
        winners,
        standings: None,
        week_completed: false,
        activated_week_id: None,
        dry_run: opts.dry_run,
    };

    if opts.dry_run {
        return Ok(report);
    }

    report.standings = Some(standings::rebuild_standings(pool, week.season_year).await?);

    let (completed, activated) = complete_and_advance(pool, &week).await?;
    report.week_completed = completed;
    report.activated_week_id = activated;

    Ok(report)
}

/// Mark the week completed and hand the active flag to the next week.
///
/// The activation UPDATE assigns `is_active` across the whole season
/// in one statement, so exactly one week can be active afterward.
async fn complete_and_advance(pool: &PgPool, week: &Week) -> Result<(bool, Option<i64>)> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE weeks SET is_completed = TRUE, is_active = FALSE WHERE id = $1")
        .bind(week.id)
        .execute(&mut *tx)
        .await
        .context("failed to mark week completed")?;

    let next = sqlx::query("SELECT id FROM weeks WHERE season_year = $1 AND week_number = $2")
        .bind(week.season_year)
        .bind(week.week_number + 1)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to look up next week")?;

    let activated = match next {
        Some(row) => {
            let next_id: i64 = row.try_get("id")?;
            sqlx::query("UPDATE weeks SET is_active = (id = $1) WHERE season_year = $2")
                .bind(next_id)
                .bind(week.season_year)
                .execute(&mut *tx)
                .await
                .context("failed to activate next week")?;
            info!(week_id = week.id, next_week_id = next_id, "next week activated");
            Some(next_id)
        }
        None => {
            info!(week_id = week.id, "no next week, season complete");
            None
        }
    };

    tx.commit().await?;
    Ok((true, activated))
}
