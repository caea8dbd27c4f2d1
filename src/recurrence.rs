use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::WeekdaySet;

/// One day in milliseconds, the slack callers pass to `occurs_on` since
/// occurrences recur daily.
pub const DAY_MS: i64 = 86_400_000;

const FULL_DAY_START: NaiveTime = NaiveTime::MIN;

fn full_day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).expect("valid time")
}

fn utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Cadence of a rule. Only daily recurrence is used today; the enum keeps
/// the persisted form extensible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
}

/// One recurring time pattern: a daily cadence filtered by weekday, with
/// either point-in-time occurrences (start rules, `duration_ms == 0`) or
/// same-day `[time, time + duration_ms)` windows (closures).
///
/// Weekday filtering is evaluated in UTC to avoid timezone date drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub weekdays: WeekdaySet,
    /// Inclusive lower bound on occurrence starts.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound on occurrence starts; `None` = unbounded.
    pub end: Option<DateTime<Utc>>,
    /// Time-of-day of each occurrence start.
    pub time: NaiveTime,
    /// 0 for point rules; `time_until - time_from` for interval rules.
    pub duration_ms: i64,
}

impl RecurrenceRule {
    /// Point-in-time rule for a start rule. An empty or absent weekday set
    /// means all seven days. The end bound is `date_to` at midnight, so an
    /// occurrence on `date_to` itself at a nonzero time-of-day falls after
    /// the bound and is excluded.
    pub fn daily_starts(
        date_from: NaiveDate,
        date_to: Option<NaiveDate>,
        time: NaiveTime,
        weekdays: Option<WeekdaySet>,
    ) -> Self {
        Self {
            frequency: Frequency::Daily,
            weekdays: effective_weekdays(weekdays),
            start: utc(date_from, NaiveTime::MIN),
            end: date_to.map(|d| utc(d, NaiveTime::MIN)),
            time,
            duration_ms: 0,
        }
    }

    /// Interval rule for a closure. Absent closed times default to the
    /// full day (`00:00:00`..`23:59:59`).
    pub fn daily_window(
        from: NaiveDate,
        until: Option<NaiveDate>,
        time_from: Option<NaiveTime>,
        time_until: Option<NaiveTime>,
        weekdays: Option<WeekdaySet>,
    ) -> Self {
        let time_from = time_from.unwrap_or(FULL_DAY_START);
        let time_until = time_until.unwrap_or_else(full_day_end);
        Self {
            frequency: Frequency::Daily,
            weekdays: effective_weekdays(weekdays),
            start: utc(from, time_from),
            end: until.map(|d| utc(d, time_until)),
            time: time_from,
            duration_ms: (time_until - time_from).num_milliseconds(),
        }
    }

    /// True if `instant` falls within any occurrence of the rule. Only
    /// occurrence starts up to `max_duration_ms` before `instant` are
    /// searched; callers pass [`DAY_MS`] since occurrences are daily.
    /// Point rules require exact equality with an occurrence instant.
    pub fn occurs_on(&self, instant: DateTime<Utc>, max_duration_ms: i64) -> bool {
        let days_back = max_duration_ms.max(0) / DAY_MS + 1;
        for offset in 0..=days_back {
            let day = (instant - Duration::days(offset)).date_naive();
            let occ = utc(day, self.time);
            if occ > instant {
                continue;
            }
            if (instant - occ).num_milliseconds() > max_duration_ms {
                continue;
            }
            if !self.contains_occurrence(occ) {
                continue;
            }
            let covered = if self.duration_ms == 0 {
                occ == instant
            } else {
                instant < occ + Duration::milliseconds(self.duration_ms)
            };
            if covered {
                return true;
            }
        }
        false
    }

    /// Inclusive rule bounds + weekday filter for a candidate occurrence start.
    fn contains_occurrence(&self, occ: DateTime<Utc>) -> bool {
        if !self.weekdays.contains(occ.weekday()) {
            return false;
        }
        if occ < self.start {
            return false;
        }
        match self.end {
            Some(end) => occ <= end,
            // No end: extends to positive infinity for membership tests.
            None => true,
        }
    }

    /// Finite, ordered sequence of occurrence starts intersecting
    /// `[range_start, range_end]` and the rule's own bounds. An unbounded
    /// rule is clipped by the caller's range; expansion never iterates
    /// past it.
    pub fn occurrences(&self, range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> Occurrences {
        let lower = range_start.max(self.start);
        let upper = match self.end {
            Some(end) => range_end.min(end),
            None => range_end,
        };
        Occurrences {
            weekdays: self.weekdays,
            time: self.time,
            cursor: Some(lower.date_naive()),
            lower,
            upper,
        }
    }

    /// Exact JSON form persisted on the owning `start_rule`/`closure` row.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("recurrence rule is JSON-serializable")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}

fn effective_weekdays(weekdays: Option<WeekdaySet>) -> WeekdaySet {
    match weekdays {
        Some(set) if !set.is_empty() => set,
        _ => WeekdaySet::ALL,
    }
}

/// Iterator over a rule's occurrence starts within a fixed window.
/// Restartable by calling [`RecurrenceRule::occurrences`] again.
pub struct Occurrences {
    weekdays: WeekdaySet,
    time: NaiveTime,
    cursor: Option<NaiveDate>,
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            let day = self.cursor?;
            self.cursor = day.succ_opt();
            let occ = utc(day, self.time);
            if occ > self.upper {
                self.cursor = None;
                return None;
            }
            if occ < self.lower {
                continue;
            }
            if self.weekdays.contains(day.weekday()) {
                return Some(occ);
            }
        }
    }
}

/// Union of recurrence rules, e.g. all closures for a trail.
pub struct CompositeSchedule {
    rules: Vec<RecurrenceRule>,
}

impl CompositeSchedule {
    pub fn new(rules: Vec<RecurrenceRule>) -> Self {
        Self { rules }
    }

    /// True iff ANY member rule covers the instant. No precedence between
    /// overlapping members; overlap is expected.
    pub fn occurs_on(&self, instant: DateTime<Utc>, max_duration_ms: i64) -> bool {
        self.rules.iter().any(|r| r.occurs_on(instant, max_duration_ms))
    }

    /// Indexes of every member covering the instant, in construction order.
    pub fn covering(&self, instant: DateTime<Utc>, max_duration_ms: i64) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.occurs_on(instant, max_duration_ms))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        utc(date(y, mo, d), time(h, mi, s))
    }

    #[test]
    fn daily_rule_expands_every_day() {
        let rule = RecurrenceRule::daily_starts(date(2024, 1, 1), None, time(10, 0, 0), None);
        let occs: Vec<_> = rule
            .occurrences(at(2024, 1, 1, 0, 0, 0), at(2024, 1, 7, 23, 59, 59))
            .collect();
        assert_eq!(occs.len(), 7);
        assert_eq!(occs[0], at(2024, 1, 1, 10, 0, 0));
        assert_eq!(occs[6], at(2024, 1, 7, 10, 0, 0));
    }

    #[test]
    fn weekday_filter_keeps_only_listed_days() {
        let weekdays = WeekdaySet::from_days(&[Weekday::Mon, Weekday::Wed]);
        let rule = RecurrenceRule::daily_starts(date(2024, 1, 1), None, time(10, 0, 0), Some(weekdays));
        // 2024-01-01 is a Monday.
        let occs: Vec<_> = rule
            .occurrences(at(2024, 1, 1, 0, 0, 0), at(2024, 1, 7, 23, 59, 59))
            .collect();
        assert_eq!(occs, vec![at(2024, 1, 1, 10, 0, 0), at(2024, 1, 3, 10, 0, 0)]);
    }

    #[test]
    fn empty_weekday_set_means_all_days() {
        let rule = RecurrenceRule::daily_starts(
            date(2024, 1, 1),
            None,
            time(9, 30, 0),
            Some(WeekdaySet::empty()),
        );
        assert_eq!(rule.weekdays, WeekdaySet::ALL);
    }

    #[test]
    fn date_to_bounds_at_midnight() {
        // End bound is date_to at 00:00, so the 10:00 occurrence on the
        // final date is excluded.
        let rule = RecurrenceRule::daily_starts(
            date(2024, 1, 1),
            Some(date(2024, 1, 3)),
            time(10, 0, 0),
            None,
        );
        let occs: Vec<_> = rule
            .occurrences(at(2024, 1, 1, 0, 0, 0), at(2024, 1, 10, 0, 0, 0))
            .collect();
        assert_eq!(occs, vec![at(2024, 1, 1, 10, 0, 0), at(2024, 1, 2, 10, 0, 0)]);
    }

    #[test]
    fn unbounded_rule_is_clipped_by_query_range() {
        let rule = RecurrenceRule::daily_starts(date(2024, 1, 1), None, time(10, 0, 0), None);
        let occs: Vec<_> = rule
            .occurrences(at(2030, 5, 1, 0, 0, 0), at(2030, 5, 3, 23, 0, 0))
            .collect();
        assert_eq!(occs.len(), 3);
        assert_eq!(occs[0], at(2030, 5, 1, 10, 0, 0));
    }

    #[test]
    fn range_before_rule_start_is_empty() {
        let rule = RecurrenceRule::daily_starts(date(2024, 6, 1), None, time(10, 0, 0), None);
        let occs: Vec<_> = rule
            .occurrences(at(2024, 1, 1, 0, 0, 0), at(2024, 5, 31, 23, 59, 59))
            .collect();
        assert!(occs.is_empty());
    }

    #[test]
    fn point_rule_membership_is_exact() {
        let rule = RecurrenceRule::daily_starts(date(2024, 1, 1), None, time(10, 0, 0), None);
        assert!(rule.occurs_on(at(2024, 3, 15, 10, 0, 0), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 3, 15, 10, 0, 1), DAY_MS));
        assert!(!rule.occurs_on(at(2023, 12, 31, 10, 0, 0), DAY_MS));
    }

    #[test]
    fn window_rule_covers_half_open_interval() {
        let rule = RecurrenceRule::daily_window(
            date(2024, 6, 1),
            Some(date(2024, 6, 30)),
            Some(time(10, 0, 0)),
            Some(time(12, 0, 0)),
            None,
        );
        assert!(rule.occurs_on(at(2024, 6, 15, 10, 0, 0), DAY_MS));
        assert!(rule.occurs_on(at(2024, 6, 15, 11, 59, 59), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 6, 15, 12, 0, 0), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 6, 15, 9, 59, 59), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 5, 31, 11, 0, 0), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 7, 1, 11, 0, 0), DAY_MS));
    }

    #[test]
    fn absent_closed_times_default_to_full_day() {
        let rule = RecurrenceRule::daily_window(
            date(2024, 6, 1),
            Some(date(2024, 6, 30)),
            None,
            None,
            None,
        );
        assert_eq!(rule.time, NaiveTime::MIN);
        assert_eq!(rule.duration_ms, 86_399_000);
        assert!(rule.occurs_on(at(2024, 6, 1, 0, 0, 0), DAY_MS));
        assert!(rule.occurs_on(at(2024, 6, 30, 23, 58, 0), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 7, 1, 0, 0, 0), DAY_MS));
    }

    #[test]
    fn unbounded_window_extends_forward_for_membership() {
        let rule = RecurrenceRule::daily_window(date(2024, 1, 1), None, None, None, None);
        assert!(rule.occurs_on(at(2031, 2, 3, 12, 0, 0), DAY_MS));
    }

    #[test]
    fn weekday_evaluated_in_utc() {
        let weekdays = WeekdaySet::from_days(&[Weekday::Sat]);
        let rule = RecurrenceRule::daily_window(
            date(2024, 6, 1),
            Some(date(2024, 6, 30)),
            None,
            None,
            Some(weekdays),
        );
        // 2024-06-01 is a Saturday in UTC.
        assert!(rule.occurs_on(at(2024, 6, 1, 12, 0, 0), DAY_MS));
        assert!(!rule.occurs_on(at(2024, 6, 2, 12, 0, 0), DAY_MS));
    }

    #[test]
    fn json_roundtrip_preserves_occurrence_behavior() {
        let weekdays = WeekdaySet::from_days(&[Weekday::Tue, Weekday::Fri]);
        let rule = RecurrenceRule::daily_window(
            date(2024, 3, 1),
            Some(date(2024, 9, 30)),
            Some(time(8, 15, 0)),
            Some(time(17, 45, 0)),
            Some(weekdays),
        );
        let back = RecurrenceRule::from_json(&rule.to_json()).unwrap();
        assert_eq!(rule, back);

        let range = (at(2024, 2, 1, 0, 0, 0), at(2024, 11, 1, 0, 0, 0));
        let a: Vec<_> = rule.occurrences(range.0, range.1).collect();
        let b: Vec<_> = back.occurrences(range.0, range.1).collect();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn composite_is_or_of_members() {
        let june = RecurrenceRule::daily_window(
            date(2024, 6, 1),
            Some(date(2024, 6, 30)),
            None,
            None,
            None,
        );
        let august = RecurrenceRule::daily_window(
            date(2024, 8, 1),
            Some(date(2024, 8, 31)),
            None,
            None,
            None,
        );
        let schedule = CompositeSchedule::new(vec![june, august]);
        assert!(schedule.occurs_on(at(2024, 6, 15, 10, 0, 0), DAY_MS));
        assert!(schedule.occurs_on(at(2024, 8, 15, 10, 0, 0), DAY_MS));
        assert!(!schedule.occurs_on(at(2024, 7, 15, 10, 0, 0), DAY_MS));
    }

    #[test]
    fn composite_covering_reports_every_overlapping_member() {
        let all_june = RecurrenceRule::daily_window(
            date(2024, 6, 1),
            Some(date(2024, 6, 30)),
            None,
            None,
            None,
        );
        let mid_june = RecurrenceRule::daily_window(
            date(2024, 6, 10),
            Some(date(2024, 6, 20)),
            None,
            None,
            None,
        );
        let schedule = CompositeSchedule::new(vec![all_june, mid_june]);
        assert_eq!(schedule.covering(at(2024, 6, 15, 10, 0, 0), DAY_MS), vec![0, 1]);
        assert_eq!(schedule.covering(at(2024, 6, 5, 10, 0, 0), DAY_MS), vec![0]);
        assert!(schedule.covering(at(2024, 7, 5, 10, 0, 0), DAY_MS).is_empty());
    }
}
