/*
Logical-day identification and day windows.
Module is independent from HTTP / Axum and from the store, for testing.

A "day" here is not a calendar date: it is an integer count of
rollover-to-rollover windows since the Unix epoch, in one timezone.
Times before the rollover hour belong to the previous logical day.
*/

use chrono::{DateTime, Datelike, Offset, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::PlannerError;
use crate::models::PlannerSettings;

pub const MILLIS_PER_DAY: i64 = 86_400_000;
pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const MILLIS_PER_MINUTE: i64 = 60_000;

// Signed day number relative to the Unix epoch. Plain integer math,
// no calendar semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayIndex(i64);

impl DayIndex {
    pub fn of(value: i64) -> Self {
        DayIndex(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn plus_days(self, days: i64) -> Self {
        DayIndex(self.0 + days)
    }

    pub fn minus_days(self, days: i64) -> Self {
        DayIndex(self.0 - days)
    }
}

// Timezone + rollover hour, validated once at the boundary that
// accepts user configuration. Core functions below take the already
// validated pieces and never re-check.
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    pub timezone: Tz,
    pub rollover_hour: u8,
}

impl PlannerConfig {
    pub fn new(timezone: &str, rollover_hour: u8) -> Result<Self, PlannerError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| PlannerError::config(format!("unknown timezone: {timezone}")))?;
        if rollover_hour > 23 {
            return Err(PlannerError::config(format!(
                "rollover_hour must be 0..=23, got {rollover_hour}"
            )));
        }
        Ok(PlannerConfig {
            timezone: tz,
            rollover_hour,
        })
    }

    pub fn from_settings(settings: &PlannerSettings) -> Result<Self, PlannerError> {
        PlannerConfig::new(&settings.timezone, settings.rollover_hour)
    }
}

fn utc_datetime(epoch_millis: i64) -> DateTime<Utc> {
    // Only out of range for timestamps hundreds of millennia away.
    DateTime::from_timestamp_millis(epoch_millis).unwrap_or(DateTime::UNIX_EPOCH)
}

// UTC offset of `timezone` at the given instant, in millis.
// Looked up per instant so DST is resolved for that specific moment.
fn offset_millis_at(timezone: Tz, epoch_millis: i64) -> i64 {
    let local = utc_datetime(epoch_millis).with_timezone(&timezone);
    i64::from(local.offset().fix().local_minus_utc()) * 1_000
}

// Which logical day an instant falls on: shift to local time, pull the
// boundary back by the rollover hour, floor-divide by a nominal day.
pub fn day_index_for(epoch_millis: i64, timezone: Tz, rollover_hour: u8) -> DayIndex {
    let offset = offset_millis_at(timezone, epoch_millis);
    let shifted = epoch_millis + offset - i64::from(rollover_hour) * MILLIS_PER_HOUR;
    DayIndex(shifted.div_euclid(MILLIS_PER_DAY))
}

// Inverse of day_index_for. The offset is looked up at the approximate
// start instant in a single pass; within an hour or two of a DST jump
// the true start can differ, which makes transition-day windows run
// short or long. Accepted, not corrected.
pub fn window_start(day: DayIndex, timezone: Tz, rollover_hour: u8) -> i64 {
    let approx = day.value() * MILLIS_PER_DAY + i64::from(rollover_hour) * MILLIS_PER_HOUR;
    approx - offset_millis_at(timezone, approx)
}

pub fn window_end(day: DayIndex, timezone: Tz, rollover_hour: u8) -> i64 {
    window_start(day.plus_days(1), timezone, rollover_hour) - 1
}

// Concrete span of one logical day, with the calendar fields of its
// local start date. duration is normally exactly 24h; on DST
// transition days it is 23h or 25h.
#[derive(Debug, Clone)]
pub struct DayWindow {
    pub day_index: DayIndex,
    pub timezone: Tz,
    pub rollover_hour: u8,
    pub start_millis: i64,
    pub end_millis: i64, // inclusive
    pub duration_millis: i64,
    pub day_of_week: u32, // 1..=7, Monday = 1
    pub day_of_month: u32,
    pub day_of_year: u32,
    pub day_name: String,
}

impl DayWindow {
    pub fn compute(day: DayIndex, timezone: Tz, rollover_hour: u8) -> DayWindow {
        let start_millis = window_start(day, timezone, rollover_hour);
        let end_millis = window_end(day, timezone, rollover_hour);
        let local = utc_datetime(start_millis).with_timezone(&timezone);
        DayWindow {
            day_index: day,
            timezone,
            rollover_hour,
            start_millis,
            end_millis,
            duration_millis: end_millis - start_millis + 1,
            day_of_week: local.weekday().number_from_monday(),
            day_of_month: local.day(),
            day_of_year: local.ordinal(),
            day_name: local.format("%A").to_string(),
        }
    }

    pub fn contains(&self, epoch_millis: i64) -> bool {
        self.start_millis <= epoch_millis && epoch_millis <= self.end_millis
    }
}

// -----------------------------
// Window cache
// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    day: i64,
    timezone: Tz,
    rollover_hour: u8,
}

#[derive(Debug, Clone, Copy)]
pub enum CacheBound {
    Unbounded,
    Lru(usize),
}

impl CacheBound {
    pub fn from_settings(settings: &PlannerSettings) -> CacheBound {
        match settings.window_cache_size {
            Some(n) => CacheBound::Lru(n),
            None => CacheBound::Unbounded,
        }
    }
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<WindowKey, DayWindow>,
    order: VecDeque<WindowKey>, // least recently used at the front
}

// Memoizes DayWindow::compute. The computation is a pure function of
// the key, so a lost race just recomputes the same value.
pub struct DayWindowCache {
    bound: CacheBound,
    inner: Mutex<CacheInner>,
}

impl DayWindowCache {
    pub fn new(bound: CacheBound) -> Self {
        DayWindowCache {
            bound,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn unbounded() -> Self {
        DayWindowCache::new(CacheBound::Unbounded)
    }

    pub fn get_or_create(&self, day: DayIndex, timezone: Tz, rollover_hour: u8) -> DayWindow {
        let key = WindowKey {
            day: day.value(),
            timezone,
            rollover_hour,
        };
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock can only leave a subset of
            // an otherwise valid cache behind; keep using it.
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(window) = inner.map.get(&key).cloned() {
            if matches!(self.bound, CacheBound::Lru(_)) {
                inner.order.retain(|k| *k != key);
                inner.order.push_back(key);
            }
            return window;
        }

        let window = DayWindow::compute(day, timezone, rollover_hour);
        inner.map.insert(key, window.clone());
        inner.order.push_back(key);
        if let CacheBound::Lru(limit) = self.bound {
            while inner.map.len() > limit.max(1) {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        window
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.map.len(),
            Err(poisoned) => poisoned.into_inner().map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.map.clear();
        inner.order.clear();
    }
}
