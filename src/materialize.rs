/*
Idempotent quest materialization.

The load-bearing invariant of the whole planner: at most one live
instance exists per (day, live key). ensure_instance reads before it
creates; the storage collaborator must additionally enforce uniqueness
on (day_index, live_key) so a concurrent duplicate create resolves to
the existing record instead of a second row.
*/

use tracing::debug;

use crate::day_window::DayWindow;
use crate::error::PlannerError;
use crate::models::{self, LiveQuest, QuestDefinition, QuestStatus, RecurrenceRule};
use crate::recurrence;

// Storage seam for live instances. Implemented by the JSON store here
// and by in-memory doubles in tests.
pub trait LiveQuestStore {
    fn find_by_day_and_live_key(
        &self,
        day_index: i64,
        live_key: &str,
    ) -> Result<Option<LiveQuest>, PlannerError>;

    // Must treat a duplicate (day, live_key) as "already exists" and
    // return the existing record.
    fn create_live_quest(
        &self,
        day: &DayWindow,
        definition: &QuestDefinition,
        rule: Option<&RecurrenceRule>,
        deadline_millis: i64,
        skip: bool,
    ) -> Result<LiveQuest, PlannerError>;

    fn save(&self, quest: LiveQuest) -> Result<LiveQuest, PlannerError>;
}

pub struct QuestMaterializer<'a> {
    store: &'a dyn LiveQuestStore,
}

impl<'a> QuestMaterializer<'a> {
    pub fn new(store: &'a dyn LiveQuestStore) -> Self {
        QuestMaterializer { store }
    }

    // Produce (or confirm) the one live instance for this
    // (day, definition, rule). Returns None when the pair is not
    // eligible for auto-materialization.
    pub fn ensure_instance(
        &self,
        day: &DayWindow,
        definition: &QuestDefinition,
        rule: Option<&RecurrenceRule>,
        skip: bool,
    ) -> Result<Option<LiveQuest>, PlannerError> {
        if !definition.active {
            return Ok(None);
        }
        if let Some(r) = rule {
            if !r.active {
                return Ok(None);
            }
            if !r.auto_materialize {
                return Ok(None);
            }
        }

        if definition.key.trim().is_empty() {
            return Err(PlannerError::validation("definition has no key"));
        }
        if let Some(r) = rule {
            if r.rule_id.trim().is_empty() {
                return Err(PlannerError::validation(format!(
                    "rule of definition {} has no rule_id",
                    definition.key
                )));
            }
        }

        let live_key = models::live_key(&definition.key, rule.map(|r| r.rule_id.as_str()));

        if let Some(existing) = self
            .store
            .find_by_day_and_live_key(day.day_index.value(), &live_key)?
        {
            return Ok(Some(existing));
        }

        let deadline_millis = match rule.and_then(|r| r.anchor.as_ref()) {
            Some(anchor) => recurrence::compute_deadline(day, anchor)?,
            None => 0,
        };

        let mut quest = self
            .store
            .create_live_quest(day, definition, rule, deadline_millis, skip)?;

        // Backfill whatever the collaborator left unset so the record
        // is complete regardless of how much seeding the store did.
        quest.live_key = live_key;
        quest.day_index = day.day_index.value();
        quest.parent_day_key = models::day_key(day.day_index.value());
        quest.definition_key = definition.key.clone();
        quest.rule_key = rule.map(|r| r.rule_id.clone());
        quest.deadline_millis = deadline_millis;
        quest.status = QuestStatus::Active;
        quest.skip = skip;

        let saved = self.store.save(quest)?;
        debug!(
            day = day.day_index.value(),
            live_key = %saved.live_key,
            deadline = saved.deadline_millis,
            "materialized live quest"
        );
        Ok(Some(saved))
    }
}
