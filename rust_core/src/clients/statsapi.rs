//! MLB Stats API client (statsapi.mlb.com).
//!
//! Fetches the daily schedule and per-game boxscores for result
//! ingestion, plus team rosters for player sync. All JSON parsing is
//! split into pure functions over `serde_json::Value` so it can be
//! exercised against fixture payloads without a network.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const STATSAPI_BASE_URL: &str = "https://statsapi.mlb.com/api/v1";

/// MLB sportId for the schedule and teams endpoints.
const MLB_SPORT_ID: u32 = 1;

/// One game on the daily schedule, with the fields slate filtering needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub game_pk: i64,
    /// detailedState, e.g. "Final", "Postponed", "Suspended"
    pub status: String,
    /// 1 for single games and doubleheader openers, 2 for the nightcap
    pub game_number: i64,
    pub official_date: Option<NaiveDate>,
    /// True when the game carries a rescheduledFrom / resume marker
    pub is_rescheduled: bool,
    pub description: String,
}

/// A single player's stat line extracted from a boxscore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerLine {
    pub mlb_player_id: i64,
    pub hits: i32,
    pub home_runs: i32,
    /// Player has a pitching line in this game
    pub pitched: bool,
    pub games_started: i32,
    pub wins: i32,
    pub saves: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlbTeamInfo {
    pub team_id: i64,
    pub name: String,
    pub abbreviation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterPlayer {
    pub mlb_player_id: i64,
    pub full_name: String,
    pub position: String,
    /// Position type from the API, "Pitcher" or "Two-Way Player" marks pitchers
    pub position_type: String,
}

impl RosterPlayer {
    pub fn is_pitcher(&self) -> bool {
        self.position_type == "Pitcher" || self.position_type == "Two-Way Player"
    }
}

/// Source of schedule and boxscore data for result ingestion.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn schedule(&self, date: NaiveDate) -> Result<Vec<ScheduledGame>>;
    async fn boxscore(&self, game_pk: i64) -> Result<Vec<PlayerLine>>;
}

#[derive(Debug, Clone)]
pub struct StatsApiClient {
    client: Client,
    base_url: String,
}

impl Default for StatsApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: STATSAPI_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different base URL (test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed: {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("statsapi returned {} for {}", resp.status(), url));
        }
        resp.json()
            .await
            .with_context(|| format!("invalid JSON from {}", url))
    }

    /// All MLB teams for a season.
    pub async fn teams(&self, season: i32) -> Result<Vec<MlbTeamInfo>> {
        let url = format!(
            "{}/teams?sportId={}&season={}",
            self.base_url, MLB_SPORT_ID, season
        );
        let data = self.get_json(&url).await?;
        Ok(parse_teams(&data))
    }

    /// Active roster for one team.
    pub async fn roster(&self, team_id: i64) -> Result<Vec<RosterPlayer>> {
        let url = format!("{}/teams/{}/roster?rosterType=active", self.base_url, team_id);
        let data = self.get_json(&url).await?;
        Ok(parse_roster(&data))
    }
}

#[async_trait]
impl StatsProvider for StatsApiClient {
    async fn schedule(&self, date: NaiveDate) -> Result<Vec<ScheduledGame>> {
        let url = format!(
            "{}/schedule?sportId={}&date={}",
            self.base_url,
            MLB_SPORT_ID,
            date.format("%Y-%m-%d")
        );
        let data = self.get_json(&url).await?;
        Ok(parse_schedule(&data))
    }

    async fn boxscore(&self, game_pk: i64) -> Result<Vec<PlayerLine>> {
        let url = format!("{}/game/{}/boxscore", self.base_url, game_pk);
        let data = self.get_json(&url).await?;
        Ok(parse_boxscore(&data))
    }
}

/// Extract games from a /schedule payload.
pub fn parse_schedule(data: &Value) -> Vec<ScheduledGame> {
    let mut games = Vec::new();

    let dates = match data["dates"].as_array() {
        Some(d) => d,
        None => return games,
    };

    for date_entry in dates {
        let Some(day_games) = date_entry["games"].as_array() else {
            continue;
        };
        for game in day_games {
            let game_pk = game["gamePk"].as_i64().unwrap_or(0);
            if game_pk == 0 {
                continue;
            }

            let status = game["status"]["detailedState"]
                .as_str()
                .unwrap_or("Unknown")
                .to_string();
            let game_number = game["gameNumber"].as_i64().unwrap_or(1);
            let official_date = game["officialDate"]
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            let is_rescheduled = game["rescheduledFrom"].as_str().is_some()
                || game["rescheduleDate"].as_str().is_some()
                || game["resumeDate"].as_str().is_some();

            let away = game["teams"]["away"]["team"]["name"].as_str().unwrap_or("?");
            let home = game["teams"]["home"]["team"]["name"].as_str().unwrap_or("?");

            games.push(ScheduledGame {
                game_pk,
                status,
                game_number,
                official_date,
                is_rescheduled,
                description: format!("{} @ {}", away, home),
            });
        }
    }

    games
}

/// Extract per-player stat lines from a /game/{pk}/boxscore payload.
pub fn parse_boxscore(data: &Value) -> Vec<PlayerLine> {
    let mut lines = Vec::new();

    for side in ["away", "home"] {
        let Some(players) = data["teams"][side]["players"].as_object() else {
            continue;
        };
        for player in players.values() {
            let mlb_player_id = player["person"]["id"].as_i64().unwrap_or(0);
            if mlb_player_id == 0 {
                continue;
            }

            let batting = &player["stats"]["batting"];
            let pitching = &player["stats"]["pitching"];
            let pitched = pitching
                .as_object()
                .map(|o| !o.is_empty())
                .unwrap_or(false);

            lines.push(PlayerLine {
                mlb_player_id,
                hits: batting["hits"].as_i64().unwrap_or(0) as i32,
                home_runs: batting["homeRuns"].as_i64().unwrap_or(0) as i32,
                pitched,
                games_started: pitching["gamesStarted"].as_i64().unwrap_or(0) as i32,
                wins: pitching["wins"].as_i64().unwrap_or(0) as i32,
                saves: pitching["saves"].as_i64().unwrap_or(0) as i32,
            });
        }
    }

    lines
}

pub fn parse_teams(data: &Value) -> Vec<MlbTeamInfo> {
    let mut teams = Vec::new();
    if let Some(entries) = data["teams"].as_array() {
        for team in entries {
            let Some(team_id) = team["id"].as_i64() else {
                continue;
            };
            teams.push(MlbTeamInfo {
                team_id,
                name: team["name"].as_str().unwrap_or_default().to_string(),
                abbreviation: team["abbreviation"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    teams
}

pub fn parse_roster(data: &Value) -> Vec<RosterPlayer> {
    let mut players = Vec::new();
    if let Some(entries) = data["roster"].as_array() {
        for entry in entries {
            let person = &entry["person"];
            let Some(mlb_player_id) = person["id"].as_i64() else {
                continue;
            };
            players.push(RosterPlayer {
                mlb_player_id,
                full_name: person["fullName"].as_str().unwrap_or_default().to_string(),
                position: entry["position"]["abbreviation"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                position_type: entry["position"]["type"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    players
}
