//! Weekly Settlement Service (Rust)
//!
//! Responsibilities:
//! - Resolve which week to settle (explicit id, slate date, or active week)
//! - Ingest MLB results for the Saturday slate
//! - Score picks, determine winners, and pay or roll over the pot
//! - Rebuild season standings and advance the active week
//!
//! Normally run from cron on Sunday morning. `--dry-run` computes and
//! logs everything without persisting.

use anyhow::{Context, Result};
use chrono::Utc;
use dotenv::dotenv;
use log::{error, info, warn};
use pick4_core::clients::statsapi::StatsApiClient;
use pick4_core::db;
use pick4_core::services::settlement::{self, SettlementOptions, SettlementReport};
use std::env;

mod config;
use config::{most_recent_saturday, SettlementJobConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = SettlementJobConfig::from_env_and_args(&args);

    info!("Starting Weekly Settlement Service...");
    if config.dry_run {
        info!("DRY RUN: nothing will be persisted");
    }

    let pool_config = db::DbPoolConfig::batch();
    let pool = db::create_pool(&config.database_url, &pool_config)
        .await
        .context("failed to connect to database")?;

    if config.run_migrations {
        db::MIGRATOR
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        info!("Migrations up to date");
    }

    // Resolution order: explicit week id, explicit slate date, then the
    // slate that most recently finished, then the season's active week.
    let week = if let Some(week_id) = config.week_id {
        settlement::load_week(&pool, week_id).await?
    } else if let Some(date) = config.slate_date {
        settlement::find_week_by_date(&pool, date).await?
    } else {
        let saturday = most_recent_saturday(Utc::now().date_naive());
        match settlement::find_week_by_date(&pool, saturday).await {
            Ok(week) => week,
            Err(e) => {
                warn!(
                    "No week for {}, falling back to active week: {}",
                    saturday, e
                );
                settlement::find_active_week(&pool, config.season_year).await?
            }
        }
    };

    info!(
        "Settling week {} of season {} (slate {})",
        week.week_number, week.season_year, week.saturday_date
    );

    let client = StatsApiClient::new();
    let opts = SettlementOptions {
        dry_run: config.dry_run,
        fetch_results: !config.skip_fetch,
    };

    match settlement::run_week(&pool, &client, week.id, opts).await {
        Ok(report) => {
            log_report(&report);
            Ok(())
        }
        Err(e) => {
            error!("Settlement failed: {:#}", e);
            Err(e)
        }
    }
}

fn log_report(report: &SettlementReport) {
    info!(
        "==== Settlement report: week {} / season {} ====",
        report.week_number, report.season_year
    );

    if let Some(ingest) = &report.ingest {
        info!(
            "Ingestion: {} of {} games processed, {} results written, {} unmapped players",
            ingest.games_processed,
            ingest.games_on_schedule,
            ingest.results_written,
            ingest.unmapped_players
        );
        for (game_pk, reason) in &ingest.games_skipped {
            info!("  skipped game {}: {}", game_pk, reason);
        }
        for err in &ingest.game_errors {
            warn!("  boxscore error: {}", err);
        }
    } else {
        info!("Ingestion: skipped, scoring against stored results");
    }

    info!(
        "Scoring: {} picks, {} hits / {} misses ({:.1}% accuracy), {} entries",
        report.scoring.picks_scored,
        report.scoring.hits,
        report.scoring.misses,
        report.scoring.accuracy_pct(),
        report.scoring.entries.len()
    );
    for (category, tally) in &report.scoring.by_category {
        info!("  {}: {} hit, {} missed", category, tally.hits, tally.misses);
    }
    if !report.scoring.incomplete_entries.is_empty() {
        info!(
            "  {} entries with fewer than four picks",
            report.scoring.incomplete_entries.len()
        );
    }
    for err in &report.scoring.errors {
        warn!("  scoring: {}", err);
    }

    let winners = &report.winners;
    if winners.already_scored {
        info!("Winners: week already settled, nothing changed");
    } else if winners.winner_count == 0 {
        info!("Winners: none; pot rolled over");
        for rollover in &winners.rollovers {
            info!(
                "  team {} rolled {} to {:?}",
                rollover.team_id, rollover.amount, rollover.destination
            );
        }
    } else {
        info!(
            "Winners: {} perfect entries split {} pot, {} each",
            winners.winner_count, winners.pot, winners.payout_per_winner
        );
        for award in &winners.winners {
            info!(
                "  user {} (team {}) paid {}",
                award.user_id, award.team_id, award.amount
            );
        }
        if !winners.undistributed.is_zero() {
            info!("  {} left undistributed", winners.undistributed);
        }
    }
    for err in &winners.errors {
        warn!("  winners: {}", err);
    }

    match &report.standings {
        Some(standings) => info!(
            "Standings: {} users, {} teams updated",
            standings.users_updated, standings.teams_updated
        ),
        None => info!("Standings: skipped (dry run)"),
    }

    if report.week_completed {
        match report.activated_week_id {
            Some(next_id) => info!("Week completed; week {} is now active", next_id),
            None => info!("Week completed; no next week, season is done"),
        }
    }
    info!("==== Settlement complete ====");
}
