/*
Per-user day materialization.

Walks every (active definition × active auto-materializing rule) pair
for a user and drives the materializer once per pair. Iteration order
over definitions/rules is not part of the contract; the resulting set
of live keys is.
*/

use chrono::Utc;
use tracing::debug;

use crate::day_window::{day_index_for, DayIndex, DayWindow, DayWindowCache, PlannerConfig};
use crate::error::PlannerError;
use crate::materialize::{LiveQuestStore, QuestMaterializer};
use crate::models::{LiveQuest, QuestDefinition, RecurrenceRule};

// Where definitions come from. The planner never writes definitions.
pub trait QuestDefinitionSource {
    fn definitions_for_user(&self, user_key: &str) -> Result<Vec<QuestDefinition>, PlannerError>;
}

// Decides whether a (day, definition, rule) combination should be
// materialized pre-skipped (days off, vacation templates, ...).
pub trait ScheduleTemplateService {
    fn should_skip(&self, day: &DayWindow, definition: &QuestDefinition, rule: &RecurrenceRule)
        -> bool;
}

pub struct DayPlanner<'a> {
    config: PlannerConfig,
    cache: &'a DayWindowCache,
    definitions: &'a dyn QuestDefinitionSource,
    templates: &'a dyn ScheduleTemplateService,
    live_store: &'a dyn LiveQuestStore,
}

// A rule with an active date range only applies to days whose window
// starts inside that range.
fn rule_applies_on(rule: &RecurrenceRule, day: &DayWindow) -> bool {
    if let Some(from) = rule.active_from_millis {
        if day.start_millis < from {
            return false;
        }
    }
    if let Some(until) = rule.active_until_millis {
        if day.start_millis > until {
            return false;
        }
    }
    true
}

impl<'a> DayPlanner<'a> {
    pub fn new(
        config: PlannerConfig,
        cache: &'a DayWindowCache,
        definitions: &'a dyn QuestDefinitionSource,
        templates: &'a dyn ScheduleTemplateService,
        live_store: &'a dyn LiveQuestStore,
    ) -> Self {
        DayPlanner {
            config,
            cache,
            definitions,
            templates,
            live_store,
        }
    }

    pub fn config(&self) -> PlannerConfig {
        self.config
    }

    pub fn window_for(&self, day: DayIndex) -> DayWindow {
        self.cache
            .get_or_create(day, self.config.timezone, self.config.rollover_hour)
    }

    // Materialize every eligible quest of this user for the given day.
    pub fn ensure_day(
        &self,
        user_key: &str,
        day: &DayWindow,
    ) -> Result<Vec<LiveQuest>, PlannerError> {
        let materializer = QuestMaterializer::new(self.live_store);
        let definitions = self.definitions.definitions_for_user(user_key)?;

        let mut quests = Vec::new();
        for definition in &definitions {
            if !definition.active {
                continue;
            }
            // Rule-less definitions are instantiated manually, never
            // by the planner.
            if definition.rules.is_empty() {
                continue;
            }
            for rule in &definition.rules {
                if !rule.active || !rule.auto_materialize {
                    continue;
                }
                if !rule_applies_on(rule, day) {
                    continue;
                }
                let skip = self.templates.should_skip(day, definition, rule);
                if let Some(quest) =
                    materializer.ensure_instance(day, definition, Some(rule), skip)?
                {
                    quests.push(quest);
                }
            }
        }

        debug!(
            user = user_key,
            day = day.day_index.value(),
            count = quests.len(),
            "ensured day"
        );
        Ok(quests)
    }

    // "Today" according to the injected timezone/rollover config.
    pub fn ensure_today(&self, user_key: &str) -> Result<Vec<LiveQuest>, PlannerError> {
        self.ensure_at(user_key, Utc::now().timestamp_millis())
    }

    pub fn ensure_at(
        &self,
        user_key: &str,
        epoch_millis: i64,
    ) -> Result<Vec<LiveQuest>, PlannerError> {
        let day = day_index_for(epoch_millis, self.config.timezone, self.config.rollover_hour);
        let window = self.window_for(day);
        self.ensure_day(user_key, &window)
    }

    // Same as ensure_at but with an explicit timezone/rollover
    // override instead of the planner's own config.
    pub fn ensure_at_in(
        &self,
        user_key: &str,
        epoch_millis: i64,
        config: PlannerConfig,
    ) -> Result<Vec<LiveQuest>, PlannerError> {
        let day = day_index_for(epoch_millis, config.timezone, config.rollover_hour);
        let window = self
            .cache
            .get_or_create(day, config.timezone, config.rollover_hour);
        self.ensure_day(user_key, &window)
    }
}
