use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::day_window::{day_index_for, CacheBound, DayWindowCache, PlannerConfig};
use crate::error::PlannerError;
use crate::models::{HistoryKind, HistoryRecord, LiveQuest, QuestStatus};
use crate::planner::DayPlanner;
use crate::rollover::RolloverSweeper;
use crate::routes_definitions::DEFAULT_OWNER;
use crate::store::{self, JsonStore};

fn error_response(e: PlannerError) -> axum::response::Response {
    let status = match &e {
        PlannerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string()).into_response()
}

// Epoch millis -> RFC3339 in the planner's timezone.
fn rfc3339(epoch_millis: i64, timezone: chrono_tz::Tz) -> String {
    match DateTime::from_timestamp_millis(epoch_millis) {
        Some(utc) => utc.with_timezone(&timezone).to_rfc3339(),
        None => String::new(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PlanQuery {
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub user: String,
    pub day: DayResponse,
    pub quests: Vec<LiveQuestResponse>,
}

#[derive(Debug, Serialize)]
pub struct DayResponse {
    pub day_index: i64,
    pub day_name: String,
    pub start: String,
    pub end: String,
    pub start_millis: i64,
    pub end_millis: i64,
    pub duration_millis: i64,
}

#[derive(Debug, Serialize)]
pub struct LiveQuestResponse {
    pub live_key: String,
    pub definition_key: String,
    pub rule_key: Option<String>,
    pub status: QuestStatus,
    pub skip: bool,
    pub deadline: Option<String>,
    pub deadline_millis: i64,
    pub alarm_at_millis: Option<i64>,
}

// -----------------------------
// GET /api/plan/today
// Materializes today's quests for a user and returns them
// -----------------------------
pub async fn get_today_plan(Query(q): Query<PlanQuery>) -> impl IntoResponse {
    let user = q.user.unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let store = JsonStore::at_default_path();
    let db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let config = match PlannerConfig::from_settings(&db.settings) {
        Ok(config) => config,
        Err(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "invalid planner settings")
                .into_response()
        }
    };

    let cache = DayWindowCache::new(CacheBound::from_settings(&db.settings));
    let planner = DayPlanner::new(config, &cache, &store, &store, &store);

    let now = store::now_millis();
    let day = day_index_for(now, config.timezone, config.rollover_hour);
    let window = planner.window_for(day);

    let quests = match planner.ensure_day(&user, &window) {
        Ok(quests) => quests,
        Err(e) => return error_response(e),
    };

    let quest_resp: Vec<LiveQuestResponse> = quests
        .into_iter()
        .map(|quest| to_quest_response(quest, &db, config))
        .collect();

    Json(PlanResponse {
        user,
        day: DayResponse {
            day_index: window.day_index.value(),
            day_name: window.day_name.clone(),
            start: rfc3339(window.start_millis, config.timezone),
            end: rfc3339(window.end_millis, config.timezone),
            start_millis: window.start_millis,
            end_millis: window.end_millis,
            duration_millis: window.duration_millis,
        },
        quests: quest_resp,
    })
    .into_response()
}

fn to_quest_response(
    quest: LiveQuest,
    db: &crate::models::Db,
    config: PlannerConfig,
) -> LiveQuestResponse {
    // Alarm lead time comes off the definition; no per-instance
    // override exists for it.
    let alarm_at_millis = db
        .definitions
        .iter()
        .find(|d| d.key == quest.definition_key)
        .and_then(|d| d.alarm_minutes)
        .filter(|_| quest.deadline_millis > 0)
        .map(|minutes| quest.deadline_millis - minutes * 60_000);

    let deadline = if quest.deadline_millis > 0 {
        Some(rfc3339(quest.deadline_millis, config.timezone))
    } else {
        None
    };

    LiveQuestResponse {
        live_key: quest.live_key,
        definition_key: quest.definition_key,
        rule_key: quest.rule_key,
        status: quest.status,
        skip: quest.skip,
        deadline,
        deadline_millis: quest.deadline_millis,
        alarm_at_millis,
    }
}

#[derive(Debug, Deserialize)]
pub struct RolloverInput {
    pub user: Option<String>,
    pub now_millis: Option<i64>, // explicit "now" for deterministic runs
}

#[derive(Debug, Serialize)]
pub struct RolloverResponse {
    pub user: String,
    pub failed: Vec<HistoryRecord>,
}

// -----------------------------
// POST /api/rollover
// Closes yesterday (failing overdue quests) and opens today
// -----------------------------
pub async fn post_rollover(Json(input): Json<RolloverInput>) -> impl IntoResponse {
    let user = input.user.unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let store = JsonStore::at_default_path();
    let db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let config = match PlannerConfig::from_settings(&db.settings) {
        Ok(config) => config,
        Err(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "invalid planner settings")
                .into_response()
        }
    };

    let cache = DayWindowCache::new(CacheBound::from_settings(&db.settings));
    let planner = DayPlanner::new(config, &cache, &store, &store, &store);
    let sweeper = RolloverSweeper::new(&planner, &cache, &store);

    let failed = match sweeper.rollover_yesterday(&user, input.now_millis) {
        Ok(failed) => failed,
        Err(e) => return error_response(e),
    };

    Json(RolloverResponse { user, failed }).into_response()
}

// -----------------------------
// POST /api/quests/:day/complete/*live_key
// Marks a live quest completed: history record written, instance removed
// -----------------------------
pub async fn complete_quest(Path((day, live_key)): Path<(i64, String)>) -> impl IntoResponse {
    finish(day, &live_key, HistoryKind::Completed)
}

// -----------------------------
// POST /api/quests/:day/cancel/*live_key
// Marks a live quest cancelled: history record written, instance removed
// -----------------------------
pub async fn cancel_quest(Path((day, live_key)): Path<(i64, String)>) -> impl IntoResponse {
    finish(day, &live_key, HistoryKind::Cancelled)
}

fn finish(day: i64, live_key: &str, kind: HistoryKind) -> axum::response::Response {
    let store = JsonStore::at_default_path();
    match store.finish_live_quest(day, live_key, kind, store::now_millis()) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "live quest not found").into_response(),
        Err(e) => error_response(e),
    }
}
