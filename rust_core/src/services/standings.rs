//! Standings aggregation: full recompute of user and team leaderboards
//! for a season from picks, paid payouts, and completed payments.
//!
//! Recomputing from source rows (rather than incrementing) makes the
//! stage deterministic and convergent: running it twice on unchanged
//! data writes identical rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::Category;
use crate::utils::money::Money;

/// One pick's contribution to standings: which week, did it hit.
#[derive(Debug, Clone, Copy)]
pub struct PickFact {
    pub user_id: i64,
    pub team_id: i64,
    pub week_number: i32,
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserSeasonStats {
    pub total_points: i32,
    pub total_picks_made: i32,
    pub total_picks_hit: i32,
    pub accuracy_percentage: f64,
    pub weeks_participated: i32,
    pub perfect_weeks: i32,
    pub highest_weekly_score: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
}

/// Compute one member's season stats from their pick facts.
///
/// `completed_weeks` is the ascending list of completed week numbers
/// for the season. The current streak walks completed weeks backward
/// and breaks on a week with no picks or zero hits; the longest streak
/// scans forward, where a skipped week resets the run but keeps
/// scanning.
pub fn compute_user_stats(facts: &[PickFact], completed_weeks: &[i32]) -> UserSeasonStats {
    let mut by_week: BTreeMap<i32, (i32, i32)> = BTreeMap::new(); // week -> (hits, total)
    for fact in facts {
        let entry = by_week.entry(fact.week_number).or_default();
        if fact.hit {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    let total_picks_made = facts.len() as i32;
    let total_picks_hit = facts.iter().filter(|f| f.hit).count() as i32;
    let perfect_weeks = by_week
        .values()
        .filter(|(hits, total)| {
            *hits == Category::PICKS_PER_ENTRY && *total == Category::PICKS_PER_ENTRY
        })
        .count() as i32;
    let highest_weekly_score = by_week.values().map(|(hits, _)| *hits).max().unwrap_or(0);

    let mut current_streak = 0;
    for week in completed_weeks.iter().rev() {
        match by_week.get(week) {
            Some((hits, _)) if *hits > 0 => current_streak += 1,
            _ => break,
        }
    }

    let mut longest_streak = 0;
    let mut run = 0;
    for week in completed_weeks {
        match by_week.get(week) {
            Some((hits, _)) if *hits > 0 => {
                run += 1;
                longest_streak = longest_streak.max(run);
            }
            _ => run = 0,
        }
    }

    let accuracy_percentage = if total_picks_made > 0 {
        total_picks_hit as f64 / total_picks_made as f64 * 100.0
    } else {
        0.0
    };

    UserSeasonStats {
        total_points: total_picks_hit, // one point per hit pick
        total_picks_made,
        total_picks_hit,
        accuracy_percentage,
        weeks_participated: by_week.len() as i32,
        perfect_weeks,
        highest_weekly_score,
        current_streak,
        longest_streak,
    }
}

#[derive(Debug, Clone)]
pub struct MemberStanding {
    pub user_id: i64,
    pub team_id: i64,
    pub stats: UserSeasonStats,
    pub total_winnings: Money,
    pub total_paid: Money,
    pub team_rank: i32,
}

impl MemberStanding {
    pub fn net_profit(&self) -> Money {
        self.total_winnings - self.total_paid
    }
}

/// Assign 1-based ranks within a team: points, then accuracy, then
/// perfect weeks, all descending.
pub fn rank_members(members: &mut [MemberStanding]) {
    members.sort_by(|a, b| {
        b.stats
            .total_points
            .cmp(&a.stats.total_points)
            .then(
                b.stats
                    .accuracy_percentage
                    .partial_cmp(&a.stats.accuracy_percentage)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(b.stats.perfect_weeks.cmp(&a.stats.perfect_weeks))
    });
    for (i, member) in members.iter_mut().enumerate() {
        member.team_rank = i as i32 + 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TeamAggregate {
    pub team_id: i64,
    pub total_members: i32,
    pub active_members: i32,
    pub total_team_points: i32,
    pub average_points_per_member: f64,
    pub total_perfect_weeks: i32,
    pub participation_rate: f64,
    pub rank: i32,
}

/// Roll member stats up to the team level.
///
/// Participation rate is total member-weeks played over the maximum
/// possible (completed weeks times active members), as a percentage.
pub fn compute_team_aggregate(
    team_id: i64,
    members: &[MemberStanding],
    total_members: i32,
    active_members: i32,
    completed_weeks: i32,
) -> TeamAggregate {
    let total_team_points: i32 = members.iter().map(|m| m.stats.total_points).sum();
    let total_perfect_weeks: i32 = members.iter().map(|m| m.stats.perfect_weeks).sum();
    let average_points_per_member = if members.is_empty() {
        0.0
    } else {
        total_team_points as f64 / members.len() as f64
    };

    let max_participations = completed_weeks as i64 * active_members as i64;
    let participation_rate = if max_participations > 0 {
        let total_participations: i32 = members.iter().map(|m| m.stats.weeks_participated).sum();
        total_participations as f64 / max_participations as f64 * 100.0
    } else {
        0.0
    };

    TeamAggregate {
        team_id,
        total_members,
        active_members,
        total_team_points,
        average_points_per_member,
        total_perfect_weeks,
        participation_rate,
        rank: 0,
    }
}

/// Assign global team ranks: total points then average, descending.
pub fn rank_teams(teams: &mut [TeamAggregate]) {
    teams.sort_by(|a, b| {
        b.total_team_points
            .cmp(&a.total_team_points)
            .then(
                b.average_points_per_member
                    .partial_cmp(&a.average_points_per_member)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    for (i, team) in teams.iter_mut().enumerate() {
        team.rank = i as i32 + 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StandingsReport {
    pub season_year: i32,
    pub users_updated: usize,
    pub teams_updated: usize,
}

/// Recompute and persist all standings for a season.
pub async fn rebuild_standings(pool: &PgPool, season_year: i32) -> Result<StandingsReport> {
    info!(season_year, "rebuilding standings");

    let week_rows = sqlx::query(
        "SELECT week_number FROM weeks WHERE season_year = $1 AND is_completed ORDER BY week_number",
    )
    .bind(season_year)
    .fetch_all(pool)
    .await
    .context("failed to load completed weeks")?;
    let completed_weeks: Vec<i32> = week_rows
        .iter()
        .map(|r| r.try_get("week_number"))
        .collect::<std::result::Result<_, _>>()?;

    let fact_rows = sqlx::query(
        r#"
        SELECT p.user_id, p.team_id, w.week_number, p.result_status
        FROM picks p
        JOIN weeks w ON w.id = p.week_id
        WHERE w.season_year = $1
        "#,
    )
    .bind(season_year)
    .fetch_all(pool)
    .await
    .context("failed to load pick facts")?;

    let mut facts_by_member: BTreeMap<(i64, i64), Vec<PickFact>> = BTreeMap::new();
    for row in &fact_rows {
        let status: String = row.try_get("result_status")?;
        let fact = PickFact {
            user_id: row.try_get("user_id")?,
            team_id: row.try_get("team_id")?,
            week_number: row.try_get("week_number")?,
            hit: status == "hit",
        };
        facts_by_member
            .entry((fact.team_id, fact.user_id))
            .or_default()
            .push(fact);
    }

    let winnings = load_money_by_member(
        pool,
        r#"
        SELECT po.user_id, po.team_id, SUM(po.amount_cents)::BIGINT AS cents
        FROM weekly_payouts po
        JOIN weeks w ON w.id = po.week_id
        WHERE w.season_year = $1 AND po.payout_status = 'paid'
        GROUP BY po.user_id, po.team_id
        "#,
        season_year,
    )
    .await
    .context("failed to load winnings")?;

    let paid = load_money_by_member(
        pool,
        r#"
        SELECT wp.user_id, wp.team_id, SUM(wp.amount_cents)::BIGINT AS cents
        FROM weekly_payments wp
        JOIN weeks w ON w.id = wp.week_id
        WHERE w.season_year = $1 AND wp.payment_status = 'paid'
        GROUP BY wp.user_id, wp.team_id
        "#,
        season_year,
    )
    .await
    .context("failed to load payments")?;

    let member_rows = sqlx::query("SELECT team_id, user_id, status FROM team_members")
        .fetch_all(pool)
        .await
        .context("failed to load team members")?;
    let mut member_counts: HashMap<i64, (i32, i32)> = HashMap::new(); // team -> (total, active)
    let mut roster: BTreeSet<(i64, i64)> = BTreeSet::new();
    for row in &member_rows {
        let team_id: i64 = row.try_get("team_id")?;
        let user_id: i64 = row.try_get("user_id")?;
        let status: String = row.try_get("status")?;
        let counts = member_counts.entry(team_id).or_default();
        counts.0 += 1;
        if status == "active" {
            counts.1 += 1;
            roster.insert((team_id, user_id));
        }
    }

    // Standings cover active members plus anyone with picks this season
    let mut member_keys: BTreeSet<(i64, i64)> = roster;
    member_keys.extend(facts_by_member.keys().copied());

    let mut standings_by_team: BTreeMap<i64, Vec<MemberStanding>> = BTreeMap::new();
    for (team_id, user_id) in member_keys {
        let facts = facts_by_member
            .get(&(team_id, user_id))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let stats = compute_user_stats(facts, &completed_weeks);
        standings_by_team
            .entry(team_id)
            .or_default()
            .push(MemberStanding {
                user_id,
                team_id,
                stats,
                total_winnings: winnings.get(&(team_id, user_id)).copied().unwrap_or_default(),
                total_paid: paid.get(&(team_id, user_id)).copied().unwrap_or_default(),
                team_rank: 0,
            });
    }

    let mut users_updated = 0;
    let mut team_aggregates = Vec::new();
    for (team_id, members) in standings_by_team.iter_mut() {
        rank_members(members);
        for member in members.iter() {
            upsert_user_standing(pool, season_year, member).await?;
            users_updated += 1;
        }

        let (total_members, active_members) =
            member_counts.get(team_id).copied().unwrap_or((0, 0));
        team_aggregates.push(compute_team_aggregate(
            *team_id,
            members,
            total_members,
            active_members,
            completed_weeks.len() as i32,
        ));
    }

    rank_teams(&mut team_aggregates);
    for team in &team_aggregates {
        upsert_team_standing(pool, season_year, team).await?;
    }

    info!(
        season_year,
        users_updated,
        teams_updated = team_aggregates.len(),
        "standings rebuilt"
    );

    Ok(StandingsReport {
        season_year,
        users_updated,
        teams_updated: team_aggregates.len(),
    })
}

async fn load_money_by_member(
    pool: &PgPool,
    sql: &str,
    season_year: i32,
) -> Result<HashMap<(i64, i64), Money>> {
    let rows = sqlx::query(sql).bind(season_year).fetch_all(pool).await?;
    let mut map = HashMap::with_capacity(rows.len());
    for row in &rows {
        let team_id: i64 = row.try_get("team_id")?;
        let user_id: i64 = row.try_get("user_id")?;
        let cents: i64 = row.try_get("cents")?;
        map.insert((team_id, user_id), Money::from_cents(cents));
    }
    Ok(map)
}

async fn upsert_user_standing(
    pool: &PgPool,
    season_year: i32,
    member: &MemberStanding,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_standings
            (user_id, team_id, season_year, total_points, total_picks_made,
             total_picks_hit, accuracy_percentage, weeks_participated, perfect_weeks,
             highest_weekly_score, current_streak, longest_streak,
             total_winnings_cents, total_paid_cents, net_profit_cents, team_rank, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
        ON CONFLICT (user_id, team_id, season_year) DO UPDATE SET
            total_points = EXCLUDED.total_points,
            total_picks_made = EXCLUDED.total_picks_made,
            total_picks_hit = EXCLUDED.total_picks_hit,
            accuracy_percentage = EXCLUDED.accuracy_percentage,
            weeks_participated = EXCLUDED.weeks_participated,
            perfect_weeks = EXCLUDED.perfect_weeks,
            highest_weekly_score = EXCLUDED.highest_weekly_score,
            current_streak = EXCLUDED.current_streak,
            longest_streak = EXCLUDED.longest_streak,
            total_winnings_cents = EXCLUDED.total_winnings_cents,
            total_paid_cents = EXCLUDED.total_paid_cents,
            net_profit_cents = EXCLUDED.net_profit_cents,
            team_rank = EXCLUDED.team_rank,
            updated_at = NOW()
        "#,
    )
    .bind(member.user_id)
    .bind(member.team_id)
    .bind(season_year)
    .bind(member.stats.total_points)
    .bind(member.stats.total_picks_made)
    .bind(member.stats.total_picks_hit)
    .bind(member.stats.accuracy_percentage)
    .bind(member.stats.weeks_participated)
    .bind(member.stats.perfect_weeks)
    .bind(member.stats.highest_weekly_score)
    .bind(member.stats.current_streak)
    .bind(member.stats.longest_streak)
    .bind(member.total_winnings.cents())
    .bind(member.total_paid.cents())
    .bind(member.net_profit().cents())
    .bind(member.team_rank)
    .execute(pool)
    .await
    .context("failed to upsert user standing")?;
    Ok(())
}

async fn upsert_team_standing(
    pool: &PgPool,
    season_year: i32,
    team: &TeamAggregate,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO team_standings
            (team_id, season_year, total_members, active_members, total_team_points,
             average_points_per_member, total_perfect_weeks, participation_rate, rank, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        ON CONFLICT (team_id, season_year) DO UPDATE SET
            total_members = EXCLUDED.total_members,
            active_members = EXCLUDED.active_members,
            total_team_points = EXCLUDED.total_team_points,
            average_points_per_member = EXCLUDED.average_points_per_member,
            total_perfect_weeks = EXCLUDED.total_perfect_weeks,
            participation_rate = EXCLUDED.participation_rate,
            rank = EXCLUDED.rank,
            updated_at = NOW()
        "#,
    )
    .bind(team.team_id)
    .bind(season_year)
    .bind(team.total_members)
    .bind(team.active_members)
    .bind(team.total_team_points)
    .bind(team.average_points_per_member)
    .bind(team.total_perfect_weeks)
    .bind(team.participation_rate)
    .bind(team.rank)
    .execute(pool)
    .await
    .context("failed to upsert team standing")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts_for_weeks(week_hits: &[(i32, i32, i32)]) -> Vec<PickFact> {
        // (week_number, hits, total)
        let mut facts = Vec::new();
        for (week, hits, total) in week_hits {
            for i in 0..*total {
                facts.push(PickFact {
                    user_id: 1,
                    team_id: 1,
                    week_number: *week,
                    hit: i < *hits,
                });
            }
        }
        facts
    }

    #[test]
    fn test_compute_user_stats_totals() {
        let facts = facts_for_weeks(&[(1, 2, 4), (2, 4, 4), (3, 0, 4)]);
        let stats = compute_user_stats(&facts, &[1, 2, 3]);

        assert_eq!(stats.total_picks_made, 12);
        assert_eq!(stats.total_picks_hit, 6);
        assert_eq!(stats.total_points, 6);
        assert_eq!(stats.weeks_participated, 3);
        assert_eq!(stats.perfect_weeks, 1);
        assert_eq!(stats.highest_weekly_score, 4);
        assert!((stats.accuracy_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_streak_breaks_on_zero_hit_week() {
        // hits in weeks 1,2, none in 3: current streak is 0
        let facts = facts_for_weeks(&[(1, 2, 4), (2, 1, 4), (3, 0, 4)]);
        let stats = compute_user_stats(&facts, &[1, 2, 3]);
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 2);
    }

    #[test]
    fn test_current_streak_breaks_on_skipped_week() {
        // played weeks 1 and 3, skipped 2
        let facts = facts_for_weeks(&[(1, 2, 4), (3, 1, 4)]);
        let stats = compute_user_stats(&facts, &[1, 2, 3]);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 1);
    }

    #[test]
    fn test_current_streak_running() {
        let facts = facts_for_weeks(&[(1, 0, 4), (2, 1, 4), (3, 2, 4)]);
        let stats = compute_user_stats(&facts, &[1, 2, 3]);
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 2);
    }

    #[test]
    fn test_stats_ignore_uncompleted_weeks_for_streaks() {
        // week 4 not completed yet: streak math only sees weeks 1-3
        let facts = facts_for_weeks(&[(1, 1, 4), (2, 1, 4), (3, 1, 4), (4, 0, 4)]);
        let stats = compute_user_stats(&facts, &[1, 2, 3]);
        assert_eq!(stats.current_streak, 3);
        assert_eq!(stats.longest_streak, 3);
    }

    #[test]
    fn test_empty_stats() {
        let stats = compute_user_stats(&[], &[1, 2, 3]);
        assert_eq!(stats, UserSeasonStats::default());
    }

    fn member(user_id: i64, points: i32, accuracy: f64, perfect: i32) -> MemberStanding {
        MemberStanding {
            user_id,
            team_id: 1,
            stats: UserSeasonStats {
                total_points: points,
                accuracy_percentage: accuracy,
                perfect_weeks: perfect,
                ..Default::default()
            },
            total_winnings: Money::zero(),
            total_paid: Money::zero(),
            team_rank: 0,
        }
    }

    #[test]
    fn test_rank_members_tiebreakers() {
        let mut members = vec![
            member(1, 10, 50.0, 0),
            member(2, 12, 40.0, 0),
            member(3, 10, 60.0, 1),
            member(4, 10, 60.0, 0),
        ];
        rank_members(&mut members);

        let order: Vec<i64> = members.iter().map(|m| m.user_id).collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
        assert_eq!(members[0].team_rank, 1);
        assert_eq!(members[3].team_rank, 4);
    }

    #[test]
    fn test_rank_is_deterministic() {
        let build = || {
            vec![
                member(1, 8, 40.0, 0),
                member(2, 8, 40.0, 0),
                member(3, 9, 10.0, 0),
            ]
        };
        let mut a = build();
        let mut b = build();
        rank_members(&mut a);
        rank_members(&mut b);
        let order_a: Vec<i64> = a.iter().map(|m| m.user_id).collect();
        let order_b: Vec<i64> = b.iter().map(|m| m.user_id).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_team_aggregate_participation_rate() {
        let members = vec![
            MemberStanding {
                user_id: 1,
                team_id: 7,
                stats: UserSeasonStats {
                    total_points: 6,
                    weeks_participated: 3,
                    perfect_weeks: 1,
                    ..Default::default()
                },
                total_winnings: Money::zero(),
                total_paid: Money::zero(),
                team_rank: 1,
            },
            MemberStanding {
                user_id: 2,
                team_id: 7,
                stats: UserSeasonStats {
                    total_points: 2,
                    weeks_participated: 1,
                    ..Default::default()
                },
                total_winnings: Money::zero(),
                total_paid: Money::zero(),
                team_rank: 2,
            },
        ];

        // 3 completed weeks, 2 active members: 4 of 6 member-weeks played
        let agg = compute_team_aggregate(7, &members, 3, 2, 3);
        assert_eq!(agg.total_team_points, 8);
        assert_eq!(agg.total_perfect_weeks, 1);
        assert!((agg.average_points_per_member - 4.0).abs() < 1e-9);
        assert!((agg.participation_rate - 66.66666666666667).abs() < 1e-9);
    }

    #[test]
    fn test_rank_teams() {
        let mut teams = vec![
            TeamAggregate {
                team_id: 1,
                total_team_points: 10,
                average_points_per_member: 5.0,
                ..Default::default()
            },
            TeamAggregate {
                team_id: 2,
                total_team_points: 10,
                average_points_per_member: 10.0,
                ..Default::default()
            },
            TeamAggregate {
                team_id: 3,
                total_team_points: 12,
                average_points_per_member: 4.0,
                ..Default::default()
            },
        ];
        rank_teams(&mut teams);
        let order: Vec<i64> = teams.iter().map(|t| t.team_id).collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(teams[0].rank, 1);
    }
}
