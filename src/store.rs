use chrono::Utc;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::{fs, io};

use crate::day_window::DayWindow;
use crate::error::PlannerError;
use crate::materialize::LiveQuestStore;
use crate::models::{
    self, Db, HistoryKind, HistoryRecord, LiveQuest, QuestDefinition, QuestStatus, RecurrenceRule,
};
use crate::planner::{QuestDefinitionSource, ScheduleTemplateService};
use crate::rollover::RolloverStore;

pub const DB_PATH: &str = "data/db.json";

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// JSON-file persistence. Every operation is load -> mutate -> save;
// the hierarchical map keys double as the uniqueness constraint on
// (day, live_key).
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonStore { path: path.into() }
    }

    pub fn at_default_path() -> Self {
        JsonStore::new(DB_PATH)
    }

    pub fn load(&self) -> Result<Db, PlannerError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            // First run: no file yet.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Db::default()),
            Err(e) => return Err(e.into()),
        };
        let db: Db =
            serde_json::from_str(&text).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        Ok(db)
    }

    pub fn save(&self, db: &Db) -> Result<(), PlannerError> {
        let tmp_path = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(db)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&tmp_path, text)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    // Status transition used by the complete/cancel controllers:
    // snapshot a history record, drop the live instance. Returns None
    // when no live instance exists for the key.
    pub fn finish_live_quest(
        &self,
        day_index: i64,
        live_key: &str,
        kind: HistoryKind,
        occurred_at_millis: i64,
    ) -> Result<Option<HistoryRecord>, PlannerError> {
        let mut db = self.load()?;
        let map_key = models::live_quest_key(day_index, live_key);
        let Some(quest) = db.live_quests.remove(&map_key) else {
            return Ok(None);
        };

        let record = history_record(&db, &quest, kind, occurred_at_millis, None);
        db.history
            .insert(models::history_key(kind, day_index, live_key), record.clone());
        self.save(&db)?;
        Ok(Some(record))
    }
}

fn definition_name(db: &Db, definition_key: &str) -> String {
    db.definitions
        .iter()
        .find(|d| d.key == definition_key)
        .map(|d| d.name.clone())
        .unwrap_or_default()
}

fn history_record(
    db: &Db,
    quest: &LiveQuest,
    kind: HistoryKind,
    occurred_at_millis: i64,
    reason: Option<String>,
) -> HistoryRecord {
    HistoryRecord {
        kind,
        day_index: quest.day_index,
        live_key: quest.live_key.clone(),
        definition_key: quest.definition_key.clone(),
        rule_key: quest.rule_key.clone(),
        definition_name: definition_name(db, &quest.definition_key),
        occurred_at_millis,
        reason,
    }
}

impl QuestDefinitionSource for JsonStore {
    fn definitions_for_user(&self, user_key: &str) -> Result<Vec<QuestDefinition>, PlannerError> {
        let db = self.load()?;
        Ok(db
            .definitions
            .into_iter()
            .filter(|d| d.owner == user_key)
            .collect())
    }
}

impl ScheduleTemplateService for JsonStore {
    fn should_skip(&self, day: &DayWindow, definition: &QuestDefinition, _rule: &RecurrenceRule) -> bool {
        let Ok(db) = self.load() else {
            return false;
        };
        db.skip_templates.iter().any(|t| {
            let matches_definition = match &t.definition_key {
                Some(key) => *key == definition.key,
                None => true,
            };
            matches_definition && t.days_of_week.contains(&day.day_of_week)
        })
    }
}

impl LiveQuestStore for JsonStore {
    fn find_by_day_and_live_key(
        &self,
        day_index: i64,
        live_key: &str,
    ) -> Result<Option<LiveQuest>, PlannerError> {
        let db = self.load()?;
        Ok(db
            .live_quests
            .get(&models::live_quest_key(day_index, live_key))
            .cloned())
    }

    fn create_live_quest(
        &self,
        day: &DayWindow,
        definition: &QuestDefinition,
        rule: Option<&RecurrenceRule>,
        deadline_millis: i64,
        skip: bool,
    ) -> Result<LiveQuest, PlannerError> {
        let mut db = self.load()?;
        let day_index = day.day_index.value();
        let live_key = models::live_key(&definition.key, rule.map(|r| r.rule_id.as_str()));
        let map_key = models::live_quest_key(day_index, &live_key);

        // Uniqueness contract: a duplicate create returns the record
        // that is already there.
        if let Some(existing) = db.live_quests.get(&map_key) {
            return Ok(existing.clone());
        }

        let now = now_millis();
        let quest = LiveQuest {
            parent_day_key: models::day_key(day_index),
            day_index,
            live_key,
            definition_key: definition.key.clone(),
            rule_key: rule.map(|r| r.rule_id.clone()),
            deadline_millis,
            status: QuestStatus::Active,
            skip,
            grace_period_minutes: None,
            created_at_millis: now,
            updated_at_millis: now,
            started_at_millis: None,
            finished_at_millis: None,
        };
        db.live_quests.insert(map_key, quest.clone());
        self.save(&db)?;
        Ok(quest)
    }

    fn save(&self, mut quest: LiveQuest) -> Result<LiveQuest, PlannerError> {
        let mut db = self.load()?;
        quest.updated_at_millis = now_millis();
        db.live_quests.insert(
            models::live_quest_key(quest.day_index, &quest.live_key),
            quest.clone(),
        );
        self.save(&db)?;
        Ok(quest)
    }
}

impl RolloverStore for JsonStore {
    fn active_live_quests(&self, day_index: i64) -> Result<Vec<LiveQuest>, PlannerError> {
        let db = self.load()?;
        Ok(db
            .live_quests
            .values()
            .filter(|q| {
                q.day_index == day_index
                    && matches!(q.status, QuestStatus::Active | QuestStatus::Started)
            })
            .cloned()
            .collect())
    }

    fn create_failure_record(
        &self,
        quest: &LiveQuest,
        occurred_at_millis: i64,
        reason: &str,
    ) -> Result<HistoryRecord, PlannerError> {
        let mut db = self.load()?;
        let record = history_record(
            &db,
            quest,
            HistoryKind::Failed,
            occurred_at_millis,
            Some(reason.to_string()),
        );
        db.history.insert(
            models::history_key(HistoryKind::Failed, quest.day_index, &quest.live_key),
            record.clone(),
        );
        self.save(&db)?;
        Ok(record)
    }

    fn delete_live_quest(&self, quest: &LiveQuest) -> Result<(), PlannerError> {
        let mut db = self.load()?;
        db.live_quests
            .remove(&models::live_quest_key(quest.day_index, &quest.live_key));
        self.save(&db)?;
        Ok(())
    }
}
