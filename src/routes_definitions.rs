// --------------------------------------------------
// Handles API endpoints related to quest definition CRUD,
// schedule preview and planner settings management.
//
// Responsibilities:
// - Create / read / update / delete quest definitions (rules embedded)
// - Preview upcoming occurrences of a definition's rules
// - Get / update planner settings (timezone, rollover hour)
// -------------------------------------------------

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::day_window::{day_index_for, DayWindow, PlannerConfig};
use crate::error::PlannerError;
use crate::models::{Anchor, Cadence, PlannerSettings, QuestDefinition, RecurrenceRule};
use crate::recurrence;
use crate::store::{self, JsonStore};

pub const DEFAULT_OWNER: &str = "local";

fn error_response(e: PlannerError) -> axum::response::Response {
    let status = match &e {
        PlannerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, e.to_string()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DefinitionsQuery {
    pub user: Option<String>,
}

// -----------------------------
// GET /api/definitions
// Returns all definitions, optionally filtered by owner
// -----------------------------
pub async fn get_definitions(Query(q): Query<DefinitionsQuery>) -> impl IntoResponse {
    let store = JsonStore::at_default_path();
    let db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let definitions: Vec<QuestDefinition> = match q.user {
        Some(user) => db.definitions.into_iter().filter(|d| d.owner == user).collect(),
        None => db.definitions,
    };

    Json(definitions).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RuleInput {
    pub rule_id: Option<String>, // generated when absent
    pub cadence: Option<Cadence>,
    pub anchor: Option<Anchor>,
    pub active: Option<bool>,
    pub auto_materialize: Option<bool>,
    pub active_from_millis: Option<i64>,
    pub active_until_millis: Option<i64>,
}

// Validate rule inputs at the boundary so the planner never sees a
// malformed anchor.
fn build_rules(inputs: Vec<RuleInput>) -> Result<Vec<RecurrenceRule>, PlannerError> {
    let mut rules = Vec::with_capacity(inputs.len());
    for input in inputs {
        if let Some(anchor) = &input.anchor {
            recurrence::validate_anchor(anchor)?;
        }
        rules.push(RecurrenceRule {
            rule_id: input
                .rule_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            cadence: input.cadence.unwrap_or_default(),
            anchor: input.anchor,
            active: input.active.unwrap_or(true),
            auto_materialize: input.auto_materialize.unwrap_or(true),
            active_from_millis: input.active_from_millis,
            active_until_millis: input.active_until_millis,
        });
    }
    Ok(rules)
}

#[derive(Debug, Deserialize)]
pub struct CreateDefinitionInput {
    pub name: String,
    pub owner: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: i64, // 1..=5
    pub rules: Option<Vec<RuleInput>>,
    pub alarm_minutes: Option<i64>,
    pub grace_minutes: Option<i64>,
}

// -----------------------------
// POST /api/definitions
// Creates a new quest definition and saves it to db.json
// -----------------------------
pub async fn create_definition(Json(input): Json<CreateDefinitionInput>) -> impl IntoResponse {
    if input.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }
    if !(1..=5).contains(&input.priority) {
        return (StatusCode::BAD_REQUEST, "priority must be 1..=5").into_response();
    }

    let rules = match build_rules(input.rules.unwrap_or_default()) {
        Ok(rules) => rules,
        Err(e) => return error_response(e),
    };

    let store = JsonStore::at_default_path();
    let mut db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let definition = QuestDefinition {
        key: Uuid::new_v4().to_string(),
        owner: input.owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()),
        name: input.name,
        tags: input.tags,
        priority: input.priority,
        rules,
        alarm_minutes: input.alarm_minutes,
        grace_minutes: input.grace_minutes,
        active: true,
        created_at_millis: store::now_millis(),
    };

    db.definitions.push(definition.clone());

    if store.save(&db).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save db").into_response();
    }

    Json(definition).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateDefinitionInput {
    pub name: String,
    pub tags: Option<Vec<String>>,
    pub priority: i64,
    pub rules: Option<Vec<RuleInput>>,
    pub alarm_minutes: Option<i64>,
    pub grace_minutes: Option<i64>,
    pub active: bool,
}

// -----------------------------
// PUT /api/definitions/:id
// Updates an existing definition by key
// ----------------------------
pub async fn update_definition(
    Path(id): Path<String>,
    Json(input): Json<UpdateDefinitionInput>,
) -> impl IntoResponse {
    if input.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "name required").into_response();
    }
    if !(1..=5).contains(&input.priority) {
        return (StatusCode::BAD_REQUEST, "priority must be 1..=5").into_response();
    }

    let new_rules = match input.rules {
        Some(inputs) => match build_rules(inputs) {
            Ok(rules) => Some(rules),
            Err(e) => return error_response(e),
        },
        None => None,
    };

    let store = JsonStore::at_default_path();
    let mut db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let Some(d) = db.definitions.iter_mut().find(|d| d.key == id) else {
        return (StatusCode::NOT_FOUND, "definition not found").into_response();
    };

    d.name = input.name;
    d.tags = input.tags;
    d.priority = input.priority;
    d.alarm_minutes = input.alarm_minutes;
    d.grace_minutes = input.grace_minutes;
    d.active = input.active;
    if let Some(rules) = new_rules {
        d.rules = rules;
    }

    let updated = d.clone();

    if store.save(&db).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save db").into_response();
    }

    Json(updated).into_response()
}

// -----------------------------
// DELETE /api/definitions/:id
// Removes a definition permanently
// -----------------------------
pub async fn delete_definition(Path(id): Path<String>) -> impl IntoResponse {
    let store = JsonStore::at_default_path();
    let mut db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    let before = db.definitions.len();
    db.definitions.retain(|d| d.key != id);

    if db.definitions.len() == before {
        return (StatusCode::NOT_FOUND, "definition not found").into_response();
    }

    if store.save(&db).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save db").into_response();
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub times: Option<i64>, // occurrences per rule, default 5
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub definition_key: String,
    pub name: String,
    pub rules: Vec<RuleScheduleResponse>,
}

#[derive(Debug, Serialize)]
pub struct RuleScheduleResponse {
    pub rule_id: String,
    pub active: bool,
    pub auto_materialize: bool,
    pub occurrences: Vec<OccurrenceResponse>,
    pub error: Option<String>, // unsupported cadence/anchor, etc.
}

#[derive(Debug, Serialize)]
pub struct OccurrenceResponse {
    pub day_index: i64,
    pub day_name: String,
    pub window_start_millis: i64,
    pub deadline_millis: Option<i64>,
}

// -----------------------------
// GET /api/definitions/:id/schedule
// Previews the next N occurrences of each rule, starting today
// -----------------------------
pub async fn get_schedule(
    Path(id): Path<String>,
    Query(q): Query<ScheduleQuery>,
) -> impl IntoResponse {
    let times = q.times.unwrap_or(5).clamp(1, 60);

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

    let Some(definition) = db.definitions.iter().find(|d| d.key == id) else {
        return (StatusCode::NOT_FOUND, "definition not found").into_response();
    };

    let today = day_index_for(store::now_millis(), config.timezone, config.rollover_hour);

    let mut rules = Vec::with_capacity(definition.rules.len());
    for rule in &definition.rules {
        let mut occurrences = Vec::new();
        let mut error = None;

        for t in 0..times {
            let day = match recurrence::apply_cadence(today, &rule.cadence, t) {
                Ok(day) => day,
                Err(e) => {
                    error = Some(e.to_string());
                    break;
                }
            };
            let window = DayWindow::compute(day, config.timezone, config.rollover_hour);
            let deadline_millis = match &rule.anchor {
                Some(anchor) => match recurrence::compute_deadline(&window, anchor) {
                    Ok(deadline) => Some(deadline),
                    Err(e) => {
                        error = Some(e.to_string());
                        break;
                    }
                },
                None => None,
            };
            occurrences.push(OccurrenceResponse {
                day_index: day.value(),
                day_name: window.day_name,
                window_start_millis: window.start_millis,
                deadline_millis,
            });
        }

        rules.push(RuleScheduleResponse {
            rule_id: rule.rule_id.clone(),
            active: rule.active,
            auto_materialize: rule.auto_materialize,
            occurrences,
            error,
        });
    }

    Json(ScheduleResponse {
        definition_key: definition.key.clone(),
        name: definition.name.clone(),
        rules,
    })
    .into_response()
}

// -----------------------------
// GET /api/settings
// Returns planner settings (timezone / rollover hour / cache bound)
// -----------------------------
pub async fn get_settings() -> impl IntoResponse {
    let store = JsonStore::at_default_path();
    let db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };
    Json(db.settings).into_response()
}

// -----------------------------
// PUT /api/settings
// Updates planner settings; rejects invalid timezone / rollover hour
// -----------------------------
pub async fn put_settings(Json(s): Json<PlannerSettings>) -> impl IntoResponse {
    if let Err(e) = PlannerConfig::from_settings(&s) {
        return error_response(e);
    }

    let store = JsonStore::at_default_path();
    let mut db = match store.load() {
        Ok(db) => db,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load db").into_response(),
    };

    db.settings = s;

    if store.save(&db).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to save db").into_response();
    }

    Json(db.settings).into_response()
}
