//! Postgres-backed settlement tests.
//!
//! Ignored by default: they need a disposable database. Run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`. Each test
//! seeds its own rows under a per-run stamp, so re-runs never collide
//! and no cleanup is required.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use pick4_core::db;
use pick4_core::models::{Category, Week, WeeklyResult};
use pick4_core::services::balance;
use pick4_core::services::scoring::{self, EntrySummary};
use pick4_core::services::winners::{self, RolloverDestination};
use pick4_core::Money;

async fn connect() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must point at a disposable test database")?;
    let pool = db::create_pool(&database_url, &db::DbPoolConfig::batch()).await?;
    db::MIGRATOR.run(&pool).await.context("migrations failed")?;
    Ok(pool)
}

/// Per-run stamp that seeds unique season years, dates, and user ids.
fn run_stamp() -> i64 {
    Utc::now().timestamp_micros()
}

async fn seed_team(pool: &PgPool, stamp: i64) -> Result<i64> {
    let row = sqlx::query("INSERT INTO teams (name) VALUES ($1) RETURNING id")
        .bind(format!("test-team-{}", stamp))
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("id")?)
}

async fn seed_week(pool: &PgPool, stamp: i64, week_number: i32) -> Result<Week> {
    // Far-future saturday keyed off the stamp keeps the UNIQUE date
    // constraint clear of any earlier run
    let saturday = NaiveDate::from_ymd_opt(2200, 1, 4)
        .ok_or_else(|| anyhow::anyhow!("bad base date"))?
        + Duration::days(stamp % 80_000_000 + week_number as i64);
    let row = sqlx::query(
        r#"
        INSERT INTO weeks (week_number, season_year, saturday_date, deadline_utc)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(week_number)
    .bind((stamp % 1_000_000_000) as i32)
    .bind(saturday)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Week::from_row(&row)
}

async fn seed_player(pool: &PgPool, mlb_player_id: i64) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO mlb_players (mlb_player_id, full_name) VALUES ($1, 'Test Player') RETURNING id",
    )
    .bind(mlb_player_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("id")?)
}

async fn seed_pick(
    pool: &PgPool,
    user_id: i64,
    team_id: i64,
    week_id: i64,
    category: Category,
    player_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO picks (user_id, team_id, week_id, category, player_id) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(user_id)
    .bind(team_id)
    .bind(week_id)
    .bind(category.as_str())
    .bind(player_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_result(
    pool: &PgPool,
    week: &Week,
    player_id: i64,
    category: Category,
    stat_value: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO weekly_results (week_id, player_id, category, achieved, stat_value, game_date)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(week.id)
    .bind(player_id)
    .bind(category.as_str())
    .bind(category.achieved(stat_value))
    .bind(stat_value)
    .bind(week.saturday_date)
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_pool(
    pool: &PgPool,
    team_id: i64,
    week_id: i64,
    weekly_pool_cents: i64,
    rollover_cents: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO weekly_prize_pools
            (team_id, week_id, weekly_pool_cents, rollover_from_previous_cents)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(team_id)
    .bind(week_id)
    .bind(weekly_pool_cents)
    .bind(rollover_cents)
    .execute(pool)
    .await?;
    Ok(())
}

async fn ledger_count(pool: &PgPool, user_id: i64) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM account_transactions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("n")?)
}

#[tokio::test]
#[ignore]
async fn test_scoring_is_idempotent() -> Result<()> {
    let pool = connect().await?;
    let stamp = run_stamp();
    let team_id = seed_team(&pool, stamp).await?;
    let week = seed_week(&pool, stamp, 1).await?;
    let batter = seed_player(&pool, stamp * 10 + 1).await?;
    let slugger = seed_player(&pool, stamp * 10 + 2).await?;

    seed_pick(&pool, stamp, team_id, week.id, Category::TwoHits, batter).await?;
    seed_pick(&pool, stamp, team_id, week.id, Category::HomeRun, slugger).await?;
    // only the 2H pick has a result row; the HR pick must grade as a miss
    seed_result(&pool, &week, batter, Category::TwoHits, 3).await?;

    let first = scoring::score_week(&pool, &week, None, false).await?;
    let second = scoring::score_week(&pool, &week, None, false).await?;

    for report in [&first, &second] {
        assert_eq!(report.picks_scored, 2);
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 1);
        assert!(report.errors.is_empty());
    }

    // persisted statuses are stable across the re-run
    let rows = sqlx::query(
        "SELECT result_status, points_earned FROM picks WHERE week_id = $1 ORDER BY category",
    )
    .bind(week.id)
    .fetch_all(&pool)
    .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].try_get::<String, _>("result_status")?, "hit");
    assert_eq!(rows[0].try_get::<i32, _>("points_earned")?, 1);
    assert_eq!(rows[1].try_get::<String, _>("result_status")?, "miss");
    assert_eq!(rows[1].try_get::<i32, _>("points_earned")?, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_payout_pot_is_conserved_through_the_ledger() -> Result<()> {
    let pool = connect().await?;
    let stamp = run_stamp();
    let team_id = seed_team(&pool, stamp).await?;
    let week = seed_week(&pool, stamp, 1).await?;
    seed_pool(&pool, team_id, week.id, 10_000, 1_000).await?;

    // $110.00 pot across three perfect pickers: $36.66 each, 2c dust
    let entries: Vec<EntrySummary> = (0..3)
        .map(|i| EntrySummary {
            user_id: stamp + i,
            team_id,
            points: 4,
            picks: 4,
        })
        .collect();

    let report = winners::determine_winners(&pool, &week, &entries, false).await?;
    assert!(!report.already_scored);
    assert_eq!(report.winner_count, 3);
    assert_eq!(report.pot, Money::from_cents(11_000));
    assert_eq!(report.payout_per_winner, Money::from_cents(3_666));
    assert_eq!(report.undistributed, Money::from_cents(2));
    assert!(report.errors.is_empty());

    // every cent of the pot is booked as a payout or reported as dust
    let paid_row = sqlx::query(
        "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT AS cents FROM weekly_payouts WHERE week_id = $1",
    )
    .bind(week.id)
    .fetch_one(&pool)
    .await?;
    let paid: i64 = paid_row.try_get("cents")?;
    assert_eq!(paid + report.undistributed.cents(), 11_000);

    // each winner's credit reached the balance with exactly one ledger row
    for entry in &entries {
        assert_eq!(
            balance::get_balance(&pool, entry.user_id).await?,
            Money::from_cents(3_666)
        );
        assert_eq!(ledger_count(&pool, entry.user_id).await?, 1);
    }

    let pool_row = sqlx::query(
        "SELECT num_perfect_picks, payout_per_winner_cents, is_scored FROM weekly_prize_pools WHERE week_id = $1 AND team_id = $2",
    )
    .bind(week.id)
    .bind(team_id)
    .fetch_one(&pool)
    .await?;
    assert!(pool_row.try_get::<bool, _>("is_scored")?);
    assert_eq!(pool_row.try_get::<i32, _>("num_perfect_picks")?, 3);
    assert_eq!(pool_row.try_get::<i64, _>("payout_per_winner_cents")?, 3_666);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_no_winners_rolls_pot_into_next_week() -> Result<()> {
    let pool = connect().await?;
    let stamp = run_stamp();
    let team_id = seed_team(&pool, stamp).await?;
    let week1 = seed_week(&pool, stamp, 1).await?;
    let week2 = seed_week(&pool, stamp, 2).await?;
    seed_pool(&pool, team_id, week1.id, 8_000, 500).await?;

    let report = winners::determine_winners(&pool, &week1, &[], false).await?;
    assert_eq!(report.winner_count, 0);
    assert_eq!(report.rollovers.len(), 1);
    assert_eq!(report.rollovers[0].amount, Money::from_cents(8_500));
    assert_eq!(
        report.rollovers[0].destination,
        RolloverDestination::NextWeek { week_id: week2.id }
    );

    // next week's pool carries the full payable amount forward
    let next_row = sqlx::query(
        "SELECT rollover_from_previous_cents FROM weekly_prize_pools WHERE week_id = $1 AND team_id = $2",
    )
    .bind(week2.id)
    .bind(team_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(
        next_row.try_get::<i64, _>("rollover_from_previous_cents")?,
        8_500
    );

    // the source pool closes with the rollover recorded and zeroed out
    let closed_row = sqlx::query(
        r#"
        SELECT rollover_to_next_cents, rollover_from_previous_cents, is_scored
        FROM weekly_prize_pools WHERE week_id = $1 AND team_id = $2
        "#,
    )
    .bind(week1.id)
    .bind(team_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(closed_row.try_get::<i64, _>("rollover_to_next_cents")?, 8_500);
    assert_eq!(
        closed_row.try_get::<i64, _>("rollover_from_previous_cents")?,
        0
    );
    assert!(closed_row.try_get::<bool, _>("is_scored")?);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_insufficient_funds_debit_leaves_balance_untouched() -> Result<()> {
    let pool = connect().await?;
    let user_id = run_stamp();
    balance::credit(&pool, user_id, Money::from_cents(1_000), "Deposit", None).await?;

    let outcome = balance::debit(
        &pool,
        user_id,
        Money::from_cents(5_000),
        "Week 1 entry fee",
        None,
    )
    .await?;
    assert_eq!(outcome, None);

    // neither the balance nor the ledger moved
    assert_eq!(
        balance::get_balance(&pool, user_id).await?,
        Money::from_cents(1_000)
    );
    assert_eq!(ledger_count(&pool, user_id).await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_dry_run_scores_against_unpersisted_results() -> Result<()> {
    let pool = connect().await?;
    let stamp = run_stamp();
    let team_id = seed_team(&pool, stamp).await?;
    let week = seed_week(&pool, stamp, 1).await?;
    let batter = seed_player(&pool, stamp * 10 + 1).await?;
    seed_pick(&pool, stamp, team_id, week.id, Category::TwoHits, batter).await?;

    // nothing in weekly_results; the fetched rows exist only in memory
    let fetched = vec![WeeklyResult {
        id: 0,
        week_id: week.id,
        player_id: batter,
        category: Category::TwoHits,
        achieved: true,
        stat_value: 2,
        game_date: week.saturday_date,
        game_ids: "745001".to_string(),
    }];

    let report = scoring::score_week(&pool, &week, Some(&fetched), true).await?;
    assert_eq!(report.picks_scored, 1);
    assert_eq!(report.hits, 1);
    assert_eq!(report.misses, 0);
    assert_eq!(report.entries.len(), 1);

    // the dry run persisted nothing
    let row = sqlx::query("SELECT result_status FROM picks WHERE week_id = $1")
        .bind(week.id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.try_get::<String, _>("result_status")?, "pending");
    Ok(())
}
