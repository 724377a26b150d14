//! Result ingestion: turn the Saturday slate's boxscores into
//! per-player category achievement rows.
//!
//! The stage is re-runnable. Facts are aggregated in memory across all
//! qualifying games of the slate date, then written as absolute-value
//! upserts, so a second run converges to the same rows.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::clients::statsapi::{PlayerLine, ScheduledGame, StatsProvider};
use crate::models::{Category, Week, WeeklyResult};

/// Game statuses that mean no usable stats exist for the slate.
const UNPLAYED_STATES: [&str; 3] = ["Postponed", "Cancelled", "Suspended"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Postponed / cancelled / suspended
    NotPlayed(String),
    /// Doubleheader nightcap, outside the original Saturday schedule
    DoubleheaderGameTwo,
    /// Makeup of an earlier date, not part of this slate
    Makeup,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotPlayed(status) => write!(f, "not played ({})", status),
            SkipReason::DoubleheaderGameTwo => f.write_str("doubleheader game 2"),
            SkipReason::Makeup => f.write_str("makeup game"),
        }
    }
}

/// Partition the day's schedule into qualifying games and skipped games.
///
/// Only games originally scheduled for the slate date count: makeups of
/// earlier dates and doubleheader nightcaps are excluded, as are games
/// without final stats.
pub fn filter_slate(
    games: Vec<ScheduledGame>,
    slate_date: NaiveDate,
) -> (Vec<ScheduledGame>, Vec<(ScheduledGame, SkipReason)>) {
    let mut kept = Vec::new();
    let mut skipped = Vec::new();

    for game in games {
        if UNPLAYED_STATES.iter().any(|s| game.status.starts_with(s)) {
            let status = game.status.clone();
            skipped.push((game, SkipReason::NotPlayed(status)));
        } else if game.game_number == 2 {
            skipped.push((game, SkipReason::DoubleheaderGameTwo));
        } else if game.is_rescheduled
            || game.official_date.map(|d| d != slate_date).unwrap_or(false)
        {
            skipped.push((game, SkipReason::Makeup));
        } else {
            kept.push(game);
        }
    }

    (kept, skipped)
}

/// A player's aggregated evidence for one category on the slate date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFact {
    pub stat_value: i32,
    pub game_pks: Vec<i64>,
}

impl CategoryFact {
    fn add(&mut self, value: i32, game_pk: i64) {
        self.stat_value += value;
        if !self.game_pks.contains(&game_pk) {
            self.game_pks.push(game_pk);
        }
    }

    pub fn game_ids(&self) -> String {
        self.game_pks
            .iter()
            .map(|pk| pk.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Aggregate category facts across all qualifying games.
///
/// Stat values sum when the same player appears in more than one game
/// on the date. Only nonzero evidence produces a fact; achievement is
/// judged against the summed value at write time.
pub fn aggregate_facts(
    games: &[(i64, Vec<PlayerLine>)],
) -> BTreeMap<(i64, Category), CategoryFact> {
    let mut facts: BTreeMap<(i64, Category), CategoryFact> = BTreeMap::new();

    for (game_pk, lines) in games {
        for line in lines {
            if line.hits > 0 {
                facts
                    .entry((line.mlb_player_id, Category::TwoHits))
                    .or_default()
                    .add(line.hits, *game_pk);
            }
            if line.home_runs > 0 {
                facts
                    .entry((line.mlb_player_id, Category::HomeRun))
                    .or_default()
                    .add(line.home_runs, *game_pk);
            }
            if line.pitched {
                // SWP counts only when the pitcher both started and won
                if line.games_started >= 1 && line.wins >= 1 {
                    facts
                        .entry((line.mlb_player_id, Category::StartingWinningPitcher))
                        .or_default()
                        .add(1, *game_pk);
                }
                if line.saves > 0 {
                    facts
                        .entry((line.mlb_player_id, Category::Save))
                        .or_default()
                        .add(line.saves, *game_pk);
                }
            }
        }
    }

    facts
}

/// Turn aggregated facts into result rows for mapped players.
///
/// Returns the rows plus the count of statsapi ids with no
/// `mlb_players` entry. Pure, so dry runs can be graded from the
/// output without touching `weekly_results`.
pub fn results_from_facts(
    week_id: i64,
    slate_date: NaiveDate,
    facts: &BTreeMap<(i64, Category), CategoryFact>,
    player_map: &HashMap<i64, i64>,
) -> (Vec<WeeklyResult>, usize) {
    let mut rows = Vec::with_capacity(facts.len());
    let mut unmapped: HashSet<i64> = HashSet::new();

    for ((mlb_player_id, category), fact) in facts {
        let Some(player_id) = player_map.get(mlb_player_id) else {
            unmapped.insert(*mlb_player_id);
            continue;
        };
        rows.push(WeeklyResult {
            id: 0,
            week_id,
            player_id: *player_id,
            category: *category,
            achieved: category.achieved(fact.stat_value),
            stat_value: fact.stat_value,
            game_date: slate_date,
            game_ids: fact.game_ids(),
        });
    }

    (rows, unmapped.len())
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub week_id: i64,
    pub slate_date: NaiveDate,
    pub games_on_schedule: usize,
    pub games_processed: usize,
    /// (gamePk, reason) for every excluded game
    pub games_skipped: Vec<(i64, String)>,
    /// Per-game fetch failures; the stage continues past them
    pub game_errors: Vec<String>,
    /// The aggregated result rows. On a dry run these are what scoring
    /// grades against, since nothing reached `weekly_results`.
    pub results: Vec<WeeklyResult>,
    pub results_written: usize,
    pub unmapped_players: usize,
    pub dry_run: bool,
}

/// Fetch the slate, extract facts, and upsert `weekly_results` for a week.
pub async fn ingest_week<P: StatsProvider + ?Sized>(
    pool: &PgPool,
    provider: &P,
    week: &Week,
    dry_run: bool,
) -> Result<IngestReport> {
    let slate_date = week.saturday_date;
    info!(
        week_id = week.id,
        %slate_date,
        dry_run,
        "ingesting results"
    );

    let schedule = provider
        .schedule(slate_date)
        .await
        .with_context(|| format!("failed to fetch schedule for {}", slate_date))?;

    let games_on_schedule = schedule.len();
    let (kept, skipped) = filter_slate(schedule, slate_date);

    let mut report = IngestReport {
        week_id: week.id,
        slate_date,
        games_on_schedule,
        games_processed: 0,
        games_skipped: skipped
            .iter()
            .map(|(g, r)| (g.game_pk, r.to_string()))
            .collect(),
        game_errors: Vec::new(),
        results: Vec::new(),
        results_written: 0,
        unmapped_players: 0,
        dry_run,
    };

    let mut boxscores: Vec<(i64, Vec<PlayerLine>)> = Vec::new();
    for game in &kept {
        match provider.boxscore(game.game_pk).await {
            Ok(lines) => {
                report.games_processed += 1;
                boxscores.push((game.game_pk, lines));
            }
            Err(e) => {
                warn!(game_pk = game.game_pk, "boxscore fetch failed: {e:#}");
                report
                    .game_errors
                    .push(format!("game {} ({}): {e:#}", game.game_pk, game.description));
            }
        }
    }

    let facts = aggregate_facts(&boxscores);

    // Map statsapi player ids to our rows; unmapped players are skipped.
    let player_rows = sqlx::query("SELECT id, mlb_player_id FROM mlb_players")
        .fetch_all(pool)
        .await
        .context("failed to load player map")?;
    let mut player_map: HashMap<i64, i64> = HashMap::with_capacity(player_rows.len());
    for row in &player_rows {
        player_map.insert(row.try_get("mlb_player_id")?, row.try_get("id")?);
    }

    let (rows, unmapped) = results_from_facts(week.id, slate_date, &facts, &player_map);
    if !dry_run {
        for result in &rows {
            sqlx::query(
                r#"
                INSERT INTO weekly_results
                    (week_id, player_id, category, achieved, stat_value, game_date, game_ids)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (week_id, player_id, category) DO UPDATE SET
                    achieved = EXCLUDED.achieved,
                    stat_value = EXCLUDED.stat_value,
                    game_ids = EXCLUDED.game_ids,
                    updated_at = NOW()
                "#,
            )
            .bind(result.week_id)
            .bind(result.player_id)
            .bind(result.category.as_str())
            .bind(result.achieved)
            .bind(result.stat_value)
            .bind(result.game_date)
            .bind(&result.game_ids)
            .execute(pool)
            .await
            .context("failed to upsert weekly result")?;
        }
    }
    report.results_written = rows.len();
    report.unmapped_players = unmapped;
    report.results = rows;

    info!(
        week_id = week.id,
        processed = report.games_processed,
        skipped = report.games_skipped.len(),
        written = report.results_written,
        unmapped = report.unmapped_players,
        "ingestion complete"
    );

    Ok(report)
}
