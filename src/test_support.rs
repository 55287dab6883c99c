// In-memory collaborator doubles shared by the core module tests.
// Single-threaded by construction (RefCell), which is all the tests need.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::day_window::DayWindow;
use crate::error::PlannerError;
use crate::materialize::LiveQuestStore;
use crate::models::{
    self, Anchor, AnchorKind, Cadence, CadenceUnit, HistoryKind, HistoryRecord, LiveQuest,
    QuestDefinition, QuestStatus, RecurrenceRule,
};
use crate::planner::{QuestDefinitionSource, ScheduleTemplateService};
use crate::rollover::RolloverStore;

pub const TEST_USER: &str = "user-1";

const FIXED_NOW: i64 = 1_700_000_000_000;

pub fn definition(key: &str, name: &str) -> QuestDefinition {
    QuestDefinition {
        key: key.to_string(),
        owner: TEST_USER.to_string(),
        name: name.to_string(),
        tags: None,
        priority: 3,
        rules: Vec::new(),
        alarm_minutes: None,
        grace_minutes: None,
        active: true,
        created_at_millis: FIXED_NOW,
    }
}

pub fn daily_rule(rule_id: &str, hour: u32, minute: u32) -> RecurrenceRule {
    RecurrenceRule {
        rule_id: rule_id.to_string(),
        cadence: Cadence {
            amount: Some(1),
            unit: Some(CadenceUnit::Day),
        },
        anchor: Some(Anchor {
            kind: AnchorKind::Daily,
            hour: Some(hour),
            minute: Some(minute),
            day_of_week: None,
            day_of_month: None,
            day_of_year: None,
        }),
        active: true,
        auto_materialize: true,
        active_from_millis: None,
        active_until_millis: None,
    }
}

#[derive(Default)]
pub struct MemStore {
    definitions: RefCell<Vec<QuestDefinition>>,
    live: RefCell<BTreeMap<String, LiveQuest>>,
    history: RefCell<BTreeMap<String, HistoryRecord>>,
    skip_weekdays: RefCell<Vec<u32>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn put_definition(&self, definition: QuestDefinition) {
        let mut defs = self.definitions.borrow_mut();
        defs.retain(|d| d.key != definition.key);
        defs.push(definition);
    }

    pub fn put_live(&self, quest: LiveQuest) {
        let key = models::live_quest_key(quest.day_index, &quest.live_key);
        self.live.borrow_mut().insert(key, quest);
    }

    pub fn skip_weekday(&self, day_of_week: u32) {
        self.skip_weekdays.borrow_mut().push(day_of_week);
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_exists(&self, day_index: i64, live_key: &str) -> bool {
        self.live
            .borrow()
            .contains_key(&models::live_quest_key(day_index, live_key))
    }

    pub fn history_exists(&self, kind: HistoryKind, day_index: i64, live_key: &str) -> bool {
        self.history
            .borrow()
            .contains_key(&models::history_key(kind, day_index, live_key))
    }
}

impl QuestDefinitionSource for MemStore {
    fn definitions_for_user(&self, user_key: &str) -> Result<Vec<QuestDefinition>, PlannerError> {
        Ok(self
            .definitions
            .borrow()
            .iter()
            .filter(|d| d.owner == user_key)
            .cloned()
            .collect())
    }
}

impl ScheduleTemplateService for MemStore {
    fn should_skip(&self, day: &DayWindow, _definition: &QuestDefinition, _rule: &RecurrenceRule) -> bool {
        self.skip_weekdays.borrow().contains(&day.day_of_week)
    }
}

impl LiveQuestStore for MemStore {
    fn find_by_day_and_live_key(
        &self,
        day_index: i64,
        live_key: &str,
    ) -> Result<Option<LiveQuest>, PlannerError> {
        Ok(self
            .live
            .borrow()
            .get(&models::live_quest_key(day_index, live_key))
            .cloned())
    }

    // Deliberately seeds only what it was handed and leaves the
    // lineage fields empty, so the materializer's backfill is what
    // the tests actually exercise.
    fn create_live_quest(
        &self,
        day: &DayWindow,
        _definition: &QuestDefinition,
        _rule: Option<&RecurrenceRule>,
        deadline_millis: i64,
        skip: bool,
    ) -> Result<LiveQuest, PlannerError> {
        Ok(LiveQuest {
            parent_day_key: String::new(),
            day_index: day.day_index.value(),
            live_key: String::new(),
            definition_key: String::new(),
            rule_key: None,
            deadline_millis,
            status: QuestStatus::Active,
            skip,
            grace_period_minutes: None,
            created_at_millis: FIXED_NOW,
            updated_at_millis: FIXED_NOW,
            started_at_millis: None,
            finished_at_millis: None,
        })
    }

    fn save(&self, quest: LiveQuest) -> Result<LiveQuest, PlannerError> {
        self.put_live(quest.clone());
        Ok(quest)
    }
}

impl RolloverStore for MemStore {
    fn active_live_quests(&self, day_index: i64) -> Result<Vec<LiveQuest>, PlannerError> {
        Ok(self
            .live
            .borrow()
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
        let record = HistoryRecord {
            kind: HistoryKind::Failed,
            day_index: quest.day_index,
            live_key: quest.live_key.clone(),
            definition_key: quest.definition_key.clone(),
            rule_key: quest.rule_key.clone(),
            definition_name: String::new(),
            occurred_at_millis,
            reason: Some(reason.to_string()),
        };
        self.history.borrow_mut().insert(
            models::history_key(HistoryKind::Failed, quest.day_index, &quest.live_key),
            record.clone(),
        );
        Ok(record)
    }

    fn delete_live_quest(&self, quest: &LiveQuest) -> Result<(), PlannerError> {
        self.live
            .borrow_mut()
            .remove(&models::live_quest_key(quest.day_index, &quest.live_key));
        Ok(())
    }
}
