/*
Day-boundary rollover: close one day, open the next.

Closing means sweeping the day's still-active instances and failing
the ones whose deadline (plus per-instance grace) has passed. Items
with no deadline never auto-fail; items flagged skip are excused.
Opening means pre-populating the next day through the planner.

A run either completes or propagates the first collaborator error;
there is no partial/resumable state.
*/

use chrono::Utc;
use tracing::info;

use crate::day_window::{day_index_for, DayWindow, DayWindowCache, MILLIS_PER_MINUTE};
use crate::error::PlannerError;
use crate::models::{HistoryRecord, LiveQuest};
use crate::planner::DayPlanner;

pub const ROLLOVER_FAILURE_REASON: &str = "deadline+grace exceeded during rollover";

// Storage seam for the sweep: enumerate, record, delete.
pub trait RolloverStore {
    fn active_live_quests(&self, day_index: i64) -> Result<Vec<LiveQuest>, PlannerError>;

    fn create_failure_record(
        &self,
        quest: &LiveQuest,
        occurred_at_millis: i64,
        reason: &str,
    ) -> Result<HistoryRecord, PlannerError>;

    fn delete_live_quest(&self, quest: &LiveQuest) -> Result<(), PlannerError>;
}

pub struct RolloverSweeper<'a> {
    planner: &'a DayPlanner<'a>,
    cache: &'a DayWindowCache,
    store: &'a dyn RolloverStore,
}

impl<'a> RolloverSweeper<'a> {
    pub fn new(
        planner: &'a DayPlanner<'a>,
        cache: &'a DayWindowCache,
        store: &'a dyn RolloverStore,
    ) -> Self {
        RolloverSweeper {
            planner,
            cache,
            store,
        }
    }

    // Sweep `from_day`, then materialize the following day.
    // Returns the failure records written during the sweep.
    pub fn run_rollover(
        &self,
        user_key: &str,
        from_day: &DayWindow,
        now_millis: i64,
    ) -> Result<Vec<HistoryRecord>, PlannerError> {
        // The opening day uses the same timezone/rollover as the
        // closing one, whatever the planner's own config says.
        let to_day = self.cache.get_or_create(
            from_day.day_index.plus_days(1),
            from_day.timezone,
            from_day.rollover_hour,
        );

        let mut failed = Vec::new();
        for quest in self.store.active_live_quests(from_day.day_index.value())? {
            if quest.deadline_millis <= 0 {
                continue;
            }
            if quest.skip {
                continue;
            }
            let grace_millis =
                quest.grace_period_minutes.unwrap_or(0) * MILLIS_PER_MINUTE;
            if now_millis > quest.deadline_millis + grace_millis {
                let record =
                    self.store
                        .create_failure_record(&quest, now_millis, ROLLOVER_FAILURE_REASON)?;
                self.store.delete_live_quest(&quest)?;
                failed.push(record);
            }
        }

        self.planner.ensure_day(user_key, &to_day)?;

        info!(
            user = user_key,
            closed = from_day.day_index.value(),
            opened = to_day.day_index.value(),
            failed = failed.len(),
            "rollover complete"
        );
        Ok(failed)
    }

    // Close "yesterday relative to now" under the planner's config.
    pub fn rollover_yesterday(
        &self,
        user_key: &str,
        now_millis: Option<i64>,
    ) -> Result<Vec<HistoryRecord>, PlannerError> {
        let now = now_millis.unwrap_or_else(|| Utc::now().timestamp_millis());
        let config = self.planner.config();
        let today = day_index_for(now, config.timezone, config.rollover_hour);
        let from_day =
            self.cache
                .get_or_create(today.minus_days(1), config.timezone, config.rollover_hour);
        self.run_rollover(user_key, &from_day, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day_window::{DayIndex, PlannerConfig};
    use crate::materialize::QuestMaterializer;
    use crate::models::HistoryKind;
    use crate::planner::DayPlanner;
    use crate::test_support::{daily_rule, definition, MemStore, TEST_USER};

    struct Fixture {
        store: MemStore,
        cache: DayWindowCache,
        config: PlannerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                store: MemStore::new(),
                cache: DayWindowCache::unbounded(),
                config: PlannerConfig::new("UTC", 0).unwrap(),
            }
        }

        fn planner(&self) -> DayPlanner<'_> {
            DayPlanner::new(self.config, &self.cache, &self.store, &self.store, &self.store)
        }

        // Materialize one quest on `day` with the given deadline
        // anchor and grace, returning its deadline.
        fn seed_quest(&self, day: &DayWindow, grace_minutes: Option<i64>, skip: bool) -> i64 {
            let mut def = definition("def-1", "Report");
            def.rules.push(daily_rule("r-1", 17, 0));
            self.store.put_definition(def.clone());
            let m = QuestMaterializer::new(&self.store);
            let mut q = m
                .ensure_instance(day, &def, Some(&def.rules[0]), skip)
                .unwrap()
                .unwrap();
            let deadline = q.deadline_millis;
            if grace_minutes.is_some() {
                q.grace_period_minutes = grace_minutes;
                self.store.put_live(q);
            }
            deadline
        }
    }

    #[test]
    fn grace_boundary_is_exclusive() {
        let grace = 30_i64;

        // Exactly deadline + grace: survives.
        let fx = Fixture::new();
        let p = fx.planner();
        let day = p.window_for(DayIndex::of(10));
        let deadline = fx.seed_quest(&day, Some(grace), false);
        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);
        let at_boundary = sweeper
            .run_rollover(TEST_USER, &day, deadline + grace * MILLIS_PER_MINUTE)
            .unwrap();
        assert!(at_boundary.is_empty());
        assert!(fx.store.live_exists(10, "def-1/r-1"));

        // One millisecond past: fails and is removed.
        let fx = Fixture::new();
        let p = fx.planner();
        let day = p.window_for(DayIndex::of(10));
        let deadline = fx.seed_quest(&day, Some(grace), false);
        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);
        let past = sweeper
            .run_rollover(TEST_USER, &day, deadline + grace * MILLIS_PER_MINUTE + 1)
            .unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].kind, HistoryKind::Failed);
        assert_eq!(past[0].reason.as_deref(), Some(ROLLOVER_FAILURE_REASON));
        assert!(!fx.store.live_exists(10, "def-1/r-1"));
        assert!(fx.store.history_exists(HistoryKind::Failed, 10, "def-1/r-1"));
    }

    #[test]
    fn skip_flagged_quests_are_never_failed() {
        let fx = Fixture::new();
        let p = fx.planner();
        let day = p.window_for(DayIndex::of(10));
        let deadline = fx.seed_quest(&day, None, true);
        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);

        // Absurdly far past the deadline.
        let failed = sweeper
            .run_rollover(TEST_USER, &day, deadline + 1_000 * MILLIS_PER_MINUTE)
            .unwrap();
        assert!(failed.is_empty());
        assert!(fx.store.live_exists(10, "def-1/r-1"));
    }

    #[test]
    fn quests_without_deadline_are_never_failed() {
        let fx = Fixture::new();
        let p = fx.planner();
        let day = p.window_for(DayIndex::of(10));

        // Rule-less definition: materialized manually, deadline 0.
        let def = definition("def-2", "Open-ended");
        fx.store.put_definition(def.clone());
        let m = QuestMaterializer::new(&fx.store);
        m.ensure_instance(&day, &def, None, false).unwrap().unwrap();

        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);
        let failed = sweeper.run_rollover(TEST_USER, &day, i64::MAX / 2).unwrap();
        assert!(failed.is_empty());
        assert!(fx.store.live_exists(10, "def-2"));
    }

    #[test]
    fn rollover_materializes_the_opening_day() {
        let fx = Fixture::new();
        let p = fx.planner();
        let day = p.window_for(DayIndex::of(10));
        fx.seed_quest(&day, None, false);
        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);

        sweeper.run_rollover(TEST_USER, &day, day.end_millis + 1).unwrap();
        assert!(fx.store.live_exists(11, "def-1/r-1"));
    }

    #[test]
    fn rollover_yesterday_targets_the_previous_logical_day() {
        use crate::day_window::MILLIS_PER_DAY;

        let fx = Fixture::new();
        let p = fx.planner();
        let yesterday = p.window_for(DayIndex::of(9));
        let deadline = fx.seed_quest(&yesterday, None, false);
        let sweeper = RolloverSweeper::new(&p, &fx.cache, &fx.store);

        // "now" sits inside day 10, well past yesterday's deadline.
        let now = 10 * MILLIS_PER_DAY + 1;
        assert!(now > deadline);
        let failed = sweeper.rollover_yesterday(TEST_USER, Some(now)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].day_index, 9);
        // Today (day 10) got pre-populated by the opening step.
        assert!(fx.store.live_exists(10, "def-1/r-1"));
    }
}
