use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Repeat interval of a recurrence rule.
// Amount/unit are optional on the wire; cadence math validates them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CadenceUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cadence {
    pub amount: Option<i64>,
    pub unit: Option<CadenceUnit>,
}

// Where inside its period an item is due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub hour: Option<u32>,         // 0..=23
    pub minute: Option<u32>,       // 0..=59
    pub day_of_week: Option<u32>,  // 1..=7, Monday = 1 (weekly only)
    pub day_of_month: Option<u32>, // monthly only
    pub day_of_year: Option<u32>,  // yearly only
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub rule_id: String,
    pub cadence: Cadence,
    pub anchor: Option<Anchor>,
    pub active: bool,
    pub auto_materialize: bool,
    pub active_from_millis: Option<i64>,  // window start must fall at/after
    pub active_until_millis: Option<i64>, // window start must fall at/before
}

// Template entity. Rules are embedded; a definition with no rules is
// only ever instantiated manually, never by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestDefinition {
    pub key: String,
    pub owner: String,
    pub name: String,
    pub tags: Option<Vec<String>>,
    pub priority: i64, // 1..=5
    pub rules: Vec<RecurrenceRule>,
    pub alarm_minutes: Option<i64>, // default reminder lead time
    pub grace_minutes: Option<i64>, // default grace, not yet consulted by rollover
    pub active: bool,
    pub created_at_millis: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Active,
    Started,
    Completed,
    Cancelled,
}

// One materialized instance for a concrete (day, live key) pair.
// At most one of these may exist per (day_index, live_key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveQuest {
    pub parent_day_key: String, // "dy/{day}"
    pub day_index: i64,
    pub live_key: String, // definition_key or definition_key/rule_id
    pub definition_key: String,
    pub rule_key: Option<String>,
    pub deadline_millis: i64, // 0 = no deadline
    pub status: QuestStatus,
    pub skip: bool,
    pub grace_period_minutes: Option<i64>,
    pub created_at_millis: i64,
    pub updated_at_millis: i64,
    pub started_at_millis: Option<i64>,
    pub finished_at_millis: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl HistoryKind {
    // Key-scheme segment for this kind of record.
    pub fn key_segment(self) -> &'static str {
        match self {
            HistoryKind::Completed => "dn",
            HistoryKind::Failed => "fld",
            HistoryKind::Cancelled => "cncl",
            HistoryKind::Skipped => "skp",
        }
    }
}

// Immutable once written. Snapshots the lineage of the live quest
// it was produced from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub kind: HistoryKind,
    pub day_index: i64,
    pub live_key: String,
    pub definition_key: String,
    pub rule_key: Option<String>,
    pub definition_name: String,
    pub occurred_at_millis: i64,
    pub reason: Option<String>,
}

// Marks (definition, weekday) combinations the planner should
// materialize pre-skipped. No definition_key = applies to all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipTemplate {
    pub definition_key: Option<String>,
    pub days_of_week: Vec<u32>, // 1..=7, Monday = 1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerSettings {
    pub timezone: String,  // IANA name, e.g. "America/New_York"
    pub rollover_hour: u8, // 0..=23, local hour the day ticks over
    pub window_cache_size: Option<usize>, // None = unbounded
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings {
            timezone: "UTC".to_string(),
            rollover_hour: 0,
            window_cache_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Db {
    #[serde(default)]
    pub settings: PlannerSettings,
    #[serde(default)]
    pub definitions: Vec<QuestDefinition>,
    // Both maps are keyed with the hierarchical scheme below, so the
    // map key itself enforces (day, live_key) uniqueness.
    #[serde(default)]
    pub live_quests: BTreeMap<String, LiveQuest>,
    #[serde(default)]
    pub history: BTreeMap<String, HistoryRecord>,
    #[serde(default)]
    pub skip_templates: Vec<SkipTemplate>,
}

// -----------------------------
// Key scheme
//
// dy/{day}/lv/{liveKey}    live instance
// dy/{day}/dn/{liveKey}    completed
// dy/{day}/fld/{liveKey}   failed
// dy/{day}/cncl/{liveKey}  cancelled
// dy/{day}/skp/{liveKey}   skipped
//
// liveKey = definitionKey or definitionKey/ruleId
// -----------------------------

pub fn live_key(definition_key: &str, rule_id: Option<&str>) -> String {
    match rule_id {
        Some(r) => format!("{definition_key}/{r}"),
        None => definition_key.to_string(),
    }
}

pub fn day_key(day_index: i64) -> String {
    format!("dy/{day_index}")
}

pub fn live_quest_key(day_index: i64, live_key: &str) -> String {
    format!("dy/{day_index}/lv/{live_key}")
}

pub fn history_key(kind: HistoryKind, day_index: i64, live_key: &str) -> String {
    format!("dy/{day_index}/{}/{live_key}", kind.key_segment())
}
