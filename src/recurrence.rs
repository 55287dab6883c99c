/*
Recurrence resolution: cadence arithmetic over day indexes and
anchor-to-deadline resolution inside a day window.

MONTH/YEAR cadences and WEEKLY/MONTHLY/YEARLY anchors need calendar
semantics a flat day count does not model. Those branches return
PlannerError::Unsupported instead of guessing.
*/

use tracing::warn;

use crate::day_window::{DayIndex, DayWindow, MILLIS_PER_MINUTE};
use crate::error::PlannerError;
use crate::models::{Anchor, AnchorKind, Cadence, CadenceUnit};

// -----------------------------
// Duration / cadence
// -----------------------------

// Advance a day index by `times` repetitions of the cadence.
pub fn apply_cadence(
    base: DayIndex,
    cadence: &Cadence,
    times: i64,
) -> Result<DayIndex, PlannerError> {
    if times == 0 {
        return Ok(base);
    }

    let amount = cadence
        .amount
        .ok_or_else(|| PlannerError::validation("cadence has no amount"))?;
    let unit = cadence
        .unit
        .ok_or_else(|| PlannerError::validation("cadence has no unit"))?;

    match unit {
        CadenceUnit::Day => Ok(base.plus_days(amount * times)),
        CadenceUnit::Week => Ok(base.plus_days(amount * times * 7)),
        CadenceUnit::Month => Err(PlannerError::unsupported(
            "MONTH cadence needs calendar arithmetic",
        )),
        CadenceUnit::Year => Err(PlannerError::unsupported(
            "YEAR cadence needs calendar arithmetic",
        )),
    }
}

// -----------------------------
// Anchors
// -----------------------------

fn require<T: Copy>(field: Option<T>, kind: AnchorKind, name: &str) -> Result<T, PlannerError> {
    field.ok_or_else(|| PlannerError::validation(format!("{kind:?} anchor is missing {name}")))
}

// Every kind needs hour + minute; weekly/monthly/yearly additionally
// need their period selector.
pub fn validate_anchor(anchor: &Anchor) -> Result<(), PlannerError> {
    let hour = require(anchor.hour, anchor.kind, "hour")?;
    let minute = require(anchor.minute, anchor.kind, "minute")?;
    if hour > 23 {
        return Err(PlannerError::validation(format!(
            "anchor hour must be 0..=23, got {hour}"
        )));
    }
    if minute > 59 {
        return Err(PlannerError::validation(format!(
            "anchor minute must be 0..=59, got {minute}"
        )));
    }

    match anchor.kind {
        AnchorKind::Daily => {}
        AnchorKind::Weekly => {
            let dow = require(anchor.day_of_week, anchor.kind, "day_of_week")?;
            if !(1..=7).contains(&dow) {
                return Err(PlannerError::validation(format!(
                    "anchor day_of_week must be 1..=7, got {dow}"
                )));
            }
        }
        AnchorKind::Monthly => {
            let dom = require(anchor.day_of_month, anchor.kind, "day_of_month")?;
            if !(1..=31).contains(&dom) {
                return Err(PlannerError::validation(format!(
                    "anchor day_of_month must be 1..=31, got {dom}"
                )));
            }
        }
        AnchorKind::Yearly => {
            let doy = require(anchor.day_of_year, anchor.kind, "day_of_year")?;
            if !(1..=366).contains(&doy) {
                return Err(PlannerError::validation(format!(
                    "anchor day_of_year must be 1..=366, got {doy}"
                )));
            }
        }
    }
    Ok(())
}

// Absolute deadline for an anchor inside the given window.
//
// DAILY is plain offset math from the window start. No clamping: on a
// DST-irregular day the result can land past the window end; that gets
// logged and returned as computed, callers must tolerate it.
pub fn compute_deadline(window: &DayWindow, anchor: &Anchor) -> Result<i64, PlannerError> {
    validate_anchor(anchor)?;

    match anchor.kind {
        AnchorKind::Daily => {
            let hour = i64::from(anchor.hour.unwrap_or(0));
            let minute = i64::from(anchor.minute.unwrap_or(0));
            let deadline = window.start_millis + (hour * 60 + minute) * MILLIS_PER_MINUTE;
            if !window.contains(deadline) {
                warn!(
                    day = window.day_index.value(),
                    deadline,
                    window_end = window.end_millis,
                    "daily anchor resolved outside its day window (DST transition day)"
                );
            }
            Ok(deadline)
        }
        AnchorKind::Weekly => Err(PlannerError::unsupported(
            "WEEKLY anchor resolution is not defined yet",
        )),
        AnchorKind::Monthly => Err(PlannerError::unsupported(
            "MONTHLY anchor resolution is not defined yet",
        )),
        AnchorKind::Yearly => Err(PlannerError::unsupported(
            "YEARLY anchor resolution is not defined yet",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day_window::MILLIS_PER_HOUR;

    fn cadence(amount: i64, unit: CadenceUnit) -> Cadence {
        Cadence {
            amount: Some(amount),
            unit: Some(unit),
        }
    }

    fn daily_anchor(hour: u32, minute: u32) -> Anchor {
        Anchor {
            kind: AnchorKind::Daily,
            hour: Some(hour),
            minute: Some(minute),
            day_of_week: None,
            day_of_month: None,
            day_of_year: None,
        }
    }

    fn utc_window(day: i64) -> DayWindow {
        DayWindow::compute(DayIndex::of(day), chrono_tz::UTC, 0)
    }

    #[test]
    fn two_week_cadence_advances_fourteen_days() {
        let got = apply_cadence(DayIndex::of(10), &cadence(2, CadenceUnit::Week), 1).unwrap();
        assert_eq!(got, DayIndex::of(24));
    }

    #[test]
    fn day_cadence_multiplies_amount_by_times() {
        let got = apply_cadence(DayIndex::of(3), &cadence(2, CadenceUnit::Day), 3).unwrap();
        assert_eq!(got, DayIndex::of(9));
    }

    #[test]
    fn zero_times_is_a_no_op_even_for_malformed_cadence() {
        let got = apply_cadence(DayIndex::of(7), &Cadence::default(), 0).unwrap();
        assert_eq!(got, DayIndex::of(7));
    }

    #[test]
    fn month_and_year_cadences_are_unsupported() {
        let month = apply_cadence(DayIndex::of(0), &cadence(1, CadenceUnit::Month), 1);
        let year = apply_cadence(DayIndex::of(0), &cadence(1, CadenceUnit::Year), 1);
        assert!(month.unwrap_err().is_unsupported());
        assert!(year.unwrap_err().is_unsupported());
    }

    #[test]
    fn missing_amount_or_unit_is_a_validation_error() {
        let err = apply_cadence(DayIndex::of(0), &Cadence::default(), 1).unwrap_err();
        assert!(matches!(err, PlannerError::Validation(_)));
    }

    #[test]
    fn daily_anchor_resolves_from_window_start() {
        let w = utc_window(100);
        let deadline = compute_deadline(&w, &daily_anchor(9, 30)).unwrap();
        assert_eq!(
            deadline,
            w.start_millis + 9 * MILLIS_PER_HOUR + 30 * MILLIS_PER_MINUTE
        );
        assert!(w.contains(deadline));
    }

    #[test]
    fn anchor_validation_catches_missing_and_out_of_range_fields() {
        let mut a = daily_anchor(9, 30);
        a.minute = None;
        assert!(matches!(
            validate_anchor(&a).unwrap_err(),
            PlannerError::Validation(_)
        ));

        let weekly_without_day = Anchor {
            kind: AnchorKind::Weekly,
            hour: Some(9),
            minute: Some(0),
            day_of_week: None,
            day_of_month: None,
            day_of_year: None,
        };
        assert!(validate_anchor(&weekly_without_day).is_err());

        let bad_hour = daily_anchor(24, 0);
        assert!(validate_anchor(&bad_hour).is_err());
    }

    #[test]
    fn weekly_anchor_resolution_is_unsupported() {
        let w = utc_window(0);
        let weekly = Anchor {
            kind: AnchorKind::Weekly,
            hour: Some(9),
            minute: Some(0),
            day_of_week: Some(1),
            day_of_month: None,
            day_of_year: None,
        };
        assert!(compute_deadline(&w, &weekly).unwrap_err().is_unsupported());
    }

    // On the 23h spring-forward day a late anchor lands past the
    // window end. The computed value is still returned.
    #[test]
    fn dst_short_day_deadline_may_exceed_window_end() {
        let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
        use chrono::TimeZone;
        let noon = tz
            .with_ymd_and_hms(2024, 3, 10, 12, 0, 0)
            .unwrap()
            .timestamp_millis();
        let d = crate::day_window::day_index_for(noon, tz, 0);
        let w = DayWindow::compute(d, tz, 0);
        assert_eq!(w.duration_millis, 23 * MILLIS_PER_HOUR);

        let deadline = compute_deadline(&w, &daily_anchor(23, 30)).unwrap();
        assert_eq!(
            deadline,
            w.start_millis + 23 * MILLIS_PER_HOUR + 30 * MILLIS_PER_MINUTE
        );
        assert!(!w.contains(deadline));
    }
}
