//! Scoring engine: grade every pick of a week against the ingested
//! results. Re-running overwrites statuses, so the stage is idempotent.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::{Category, PickResult, Week, WeeklyResult};

/// A pick without a matching result row scores as a miss with this note.
pub const NO_RESULT_NOTE: &str = "No result data";

/// Grade one pick against its (possibly absent) result row.
///
/// Returns (status, points, note). A missing result means the player
/// produced no qualifying evidence on the slate: that is a miss, not
/// an error. SWP trusts the stored achievement flag; the stat-backed
/// categories re-check the threshold against the summed stat value.
pub fn classify(
    category: Category,
    result: Option<&WeeklyResult>,
) -> (PickResult, i32, String) {
    let Some(result) = result else {
        return (PickResult::Miss, 0, NO_RESULT_NOTE.to_string());
    };

    let hit = match category {
        Category::StartingWinningPitcher => result.achieved,
        _ => result.achieved && category.achieved(result.stat_value),
    };

    if hit {
        (PickResult::Hit, 1, String::new())
    } else {
        (
            PickResult::Miss,
            0,
            format!("stat_value {}", result.stat_value),
        )
    }
}

/// Grade a raw pick row's category code against the results map.
///
/// An unknown code grades as a miss with `None` for the category so
/// the caller can report it; the entry still counts the pick.
fn grade(
    code: &str,
    player_id: i64,
    results: &HashMap<(i64, Category), WeeklyResult>,
) -> (Option<Category>, PickResult, i32, String) {
    match Category::parse(code) {
        Some(category) => {
            let (status, points, note) = classify(category, results.get(&(player_id, category)));
            (Some(category), status, points, note)
        }
        None => (
            None,
            PickResult::Miss,
            0,
            format!("Unknown category {}", code),
        ),
    }
}

/// One (user, team) entry's graded totals for the week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySummary {
    pub user_id: i64,
    pub team_id: i64,
    pub points: i32,
    pub picks: i32,
}

impl EntrySummary {
    /// Perfect week: all four categories picked and all four hit.
    pub fn is_perfect(&self) -> bool {
        self.points == Category::PICKS_PER_ENTRY && self.picks == Category::PICKS_PER_ENTRY
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTally {
    pub hits: u32,
    pub misses: u32,
}

#[derive(Debug, Clone)]
pub struct ScoringReport {
    pub week_id: i64,
    pub picks_scored: usize,
    pub hits: usize,
    pub misses: usize,
    pub by_category: BTreeMap<Category, CategoryTally>,
    /// Graded entry totals, ordered by (team, user)
    pub entries: Vec<EntrySummary>,
    /// Entries with fewer than four picks submitted
    pub incomplete_entries: Vec<EntrySummary>,
    /// Per-pick data problems (unknown category codes); the pick is
    /// scored as a miss and the stage continues
    pub errors: Vec<String>,
    pub dry_run: bool,
}

impl ScoringReport {
    pub fn accuracy_pct(&self) -> f64 {
        if self.picks_scored == 0 {
            return 0.0;
        }
        self.hits as f64 / self.picks_scored as f64 * 100.0
    }
}

/// Grade all picks of the week and persist statuses and points.
///
/// `ingested` supplies the result rows directly instead of reading
/// `weekly_results`; dry runs pass the ingest report's rows through
/// here so grading matches what a live run would persist.
pub async fn score_week(
    pool: &PgPool,
    week: &Week,
    ingested: Option<&[WeeklyResult]>,
    dry_run: bool,
) -> Result<ScoringReport> {
    info!(week_id = week.id, dry_run, "scoring week");

    let mut results: HashMap<(i64, Category), WeeklyResult> = HashMap::new();
    match ingested {
        Some(rows) => {
            for result in rows {
                results.insert((result.player_id, result.category), result.clone());
            }
        }
        None => {
            let result_rows = sqlx::query("SELECT * FROM weekly_results WHERE week_id = $1")
                .bind(week.id)
                .fetch_all(pool)
                .await
                .context("failed to load weekly results")?;
            for row in &result_rows {
                let result = WeeklyResult::from_row(row)?;
                results.insert((result.player_id, result.category), result);
            }
        }
    }

    let pick_rows = sqlx::query(
        "SELECT * FROM picks WHERE week_id = $1 ORDER BY team_id, user_id, category",
    )
    .bind(week.id)
    .fetch_all(pool)
    .await
    .context("failed to load picks")?;

    let mut report = ScoringReport {
        week_id: week.id,
        picks_scored: 0,
        hits: 0,
        misses: 0,
        by_category: BTreeMap::new(),
        entries: Vec::new(),
        incomplete_entries: Vec::new(),
        errors: Vec::new(),
        dry_run,
    };
    let mut entry_totals: BTreeMap<(i64, i64), EntrySummary> = BTreeMap::new();

    for row in &pick_rows {
        let pick_id: i64 = row.try_get("id")?;
        let user_id: i64 = row.try_get("user_id")?;
        let team_id: i64 = row.try_get("team_id")?;
        let player_id: i64 = row.try_get("player_id")?;
        let code: String = row.try_get("category")?;

        let (category, status, points, note) = grade(&code, player_id, &results);
        if category.is_none() {
            report
                .errors
                .push(format!("pick {}: unknown category code {:?}", pick_id, code));
        }

        if !dry_run {
            sqlx::query(
                r#"
                UPDATE picks
                SET result_status = $1, points_earned = $2, scored_at = NOW(), notes = $3
                WHERE id = $4
                "#,
            )
            .bind(status.as_str())
            .bind(points)
            .bind(&note)
            .bind(pick_id)
            .execute(pool)
            .await
            .with_context(|| format!("failed to update pick {}", pick_id))?;
        }

        report.picks_scored += 1;
        if let Some(category) = category {
            let tally = report.by_category.entry(category).or_default();
            if status == PickResult::Hit {
                tally.hits += 1;
            } else {
                tally.misses += 1;
            }
        }
        if status == PickResult::Hit {
            report.hits += 1;
        } else {
            report.misses += 1;
        }

        let entry = entry_totals
            .entry((team_id, user_id))
            .or_insert(EntrySummary {
                user_id,
                team_id,
                points: 0,
                picks: 0,
            });
        entry.points += points;
        entry.picks += 1;
    }

    report.entries = entry_totals.into_values().collect();
    report.incomplete_entries = report
        .entries
        .iter()
        .filter(|e| e.picks < Category::PICKS_PER_ENTRY)
        .copied()
        .collect();

    info!(
        week_id = week.id,
        scored = report.picks_scored,
        hits = report.hits,
        accuracy = %format_args!("{:.1}%", report.accuracy_pct()),
        "scoring complete"
    );

    Ok(report)
}

/// Put every pick of the week back to pending.
pub async fn reset_week(pool: &PgPool, week_id: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE picks
        SET result_status = 'pending', points_earned = 0, scored_at = NULL, notes = ''
        WHERE week_id = $1
        "#,
    )
    .bind(week_id)
    .execute(pool)
    .await
    .context("failed to reset picks")?;

    info!(week_id, reset = result.rows_affected(), "week scoring reset");
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn result(category: Category, achieved: bool, stat_value: i32) -> WeeklyResult {
        WeeklyResult {
            id: 1,
            week_id: 1,
            player_id: 10,
            category,
            achieved,
            stat_value,
            game_date: NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
            game_ids: "745001".to_string(),
        }
    }

    #[test]
    fn test_classify_missing_result_is_miss() {
        let (status, points, note) = classify(Category::TwoHits, None);
        assert_eq!(status, PickResult::Miss);
        assert_eq!(points, 0);
        assert_eq!(note, NO_RESULT_NOTE);
    }

    #[test]
    fn test_classify_hit() {
        let r = result(Category::TwoHits, true, 2);
        let (status, points, _) = classify(Category::TwoHits, Some(&r));
        assert_eq!(status, PickResult::Hit);
        assert_eq!(points, 1);
    }

    #[test]
    fn test_classify_rechecks_stat_threshold() {
        // A result row claiming achievement with an inconsistent stat is a miss
        let r = result(Category::TwoHits, true, 1);
        let (status, points, _) = classify(Category::TwoHits, Some(&r));
        assert_eq!(status, PickResult::Miss);
        assert_eq!(points, 0);
    }

    #[test]
    fn test_classify_swp_trusts_achieved_flag() {
        let r = result(Category::StartingWinningPitcher, true, 1);
        let (status, _, _) = classify(Category::StartingWinningPitcher, Some(&r));
        assert_eq!(status, PickResult::Hit);

        let r = result(Category::StartingWinningPitcher, false, 0);
        let (status, _, _) = classify(Category::StartingWinningPitcher, Some(&r));
        assert_eq!(status, PickResult::Miss);
    }

    #[test]
    fn test_classify_not_achieved_is_miss() {
        let r = result(Category::HomeRun, false, 0);
        let (status, points, _) = classify(Category::HomeRun, Some(&r));
        assert_eq!(status, PickResult::Miss);
        assert_eq!(points, 0);
    }

    #[test]
    fn test_grade_unknown_category_is_reported_miss() {
        let results = HashMap::new();
        let (category, status, points, note) = grade("XX", 10, &results);
        assert_eq!(category, None);
        assert_eq!(status, PickResult::Miss);
        assert_eq!(points, 0);
        assert!(note.contains("XX"));
    }

    #[test]
    fn test_grade_known_category() {
        let mut results = HashMap::new();
        let r = result(Category::TwoHits, true, 2);
        results.insert((10, Category::TwoHits), r);

        let (category, status, points, _) = grade("2H", 10, &results);
        assert_eq!(category, Some(Category::TwoHits));
        assert_eq!(status, PickResult::Hit);
        assert_eq!(points, 1);

        // different player, no result row
        let (_, status, _, note) = grade("2H", 11, &results);
        assert_eq!(status, PickResult::Miss);
        assert_eq!(note, NO_RESULT_NOTE);
    }

    #[test]
    fn test_entry_perfect_requires_four_of_four() {
        let full = EntrySummary {
            user_id: 1,
            team_id: 1,
            points: 4,
            picks: 4,
        };
        assert!(full.is_perfect());

        // 3 of 3 is not perfect: the entry was incomplete
        let partial = EntrySummary {
            user_id: 1,
            team_id: 1,
            points: 3,
            picks: 3,
        };
        assert!(!partial.is_perfect());

        let imperfect = EntrySummary {
            user_id: 1,
            team_id: 1,
            points: 3,
            picks: 4,
        };
        assert!(!imperfect.is_perfect());
    }
}
