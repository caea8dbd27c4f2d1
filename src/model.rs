use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

pub type SlotId = Ulid;
pub type StartRuleId = Ulid;
pub type ClosureId = Ulid;
pub type TrailId = Ulid;
pub type TeamId = Ulid;

/// Lifecycle stage of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Available,
    Closed,
    Sold,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Available => write!(f, "available"),
            Stage::Closed => write!(f, "closed"),
            Stage::Sold => write!(f, "sold"),
        }
    }
}

// ── Weekday set ──────────────────────────────────────────

/// Wire tokens in persisted order. Bit n = n days from Monday.
const WEEKDAY_TOKENS: [&str; 7] = ["MO", "TU", "WE", "TH", "FR", "SA", "SU"];

/// Subset of the seven weekdays, serialized as the wire tokens
/// `MO TU WE TH FR SA SU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const ALL: WeekdaySet = WeekdaySet(0b0111_1111);

    pub fn empty() -> Self {
        WeekdaySet(0)
    }

    pub fn from_days(days: &[Weekday]) -> Self {
        let mut set = Self::empty();
        for day in days {
            set.insert(*day);
        }
        set
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn parse_token(token: &str) -> Option<Weekday> {
        let idx = WEEKDAY_TOKENS.iter().position(|t| *t == token)?;
        Some(match idx {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        })
    }

    pub fn tokens(&self) -> Vec<&'static str> {
        WEEKDAY_TOKENS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tokens().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        let mut set = WeekdaySet::empty();
        for token in &tokens {
            let day = WeekdaySet::parse_token(token)
                .ok_or_else(|| D::Error::custom(format!("unknown weekday token: {token}")))?;
            set.insert(day);
        }
        Ok(set)
    }
}

// ── Entities ─────────────────────────────────────────────

/// One concrete bookable (or blocked) instant on a trail.
/// `start_rule_id == None` marks a virtual slot created ad hoc by a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub trail: TrailId,
    pub date_time: DateTime<Utc>,
    pub stage: Stage,
    pub team: Option<TeamId>,
    pub start_rule_id: Option<StartRuleId>,
}

impl Slot {
    /// Slot materialized by a start rule.
    pub fn generated(trail: TrailId, date_time: DateTime<Utc>, stage: Stage, start_rule_id: StartRuleId) -> Self {
        Self {
            id: Ulid::new(),
            trail,
            date_time,
            stage,
            team: None,
            start_rule_id: Some(start_rule_id),
        }
    }

    /// Virtual slot created directly by a booking, already sold.
    pub fn virtual_sold(trail: TrailId, date_time: DateTime<Utc>, team: TeamId) -> Self {
        Self {
            id: Ulid::new(),
            trail,
            date_time,
            stage: Stage::Sold,
            team: Some(team),
            start_rule_id: None,
        }
    }
}

/// Recurring definition of when a trail's bookable sessions begin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRule {
    pub id: StartRuleId,
    pub trail: TrailId,
    pub date_from: NaiveDate,
    pub date_to: Option<NaiveDate>,
    pub time: NaiveTime,
    /// `None` means all seven days.
    pub weekdays: Option<WeekdaySet>,
    /// Cached serialized recurrence rule.
    pub rule: Option<serde_json::Value>,
    /// Marks the cached rule as stale.
    pub force: bool,
}

/// Recurring or bounded period during which affected trails are not bookable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub id: ClosureId,
    pub application_period_from: Option<NaiveDate>,
    /// `None` = unbounded.
    pub application_period_until: Option<NaiveDate>,
    /// Both `None` = full-day closure.
    pub closed_time_from: Option<NaiveTime>,
    pub closed_time_until: Option<NaiveTime>,
    /// `None` means all seven days.
    pub weekdays: Option<WeekdaySet>,
    /// Cached serialized recurrence rule.
    pub rule: Option<serde_json::Value>,
    pub force: bool,
    /// Trails the closure applies to, from the `closure_trails` relation.
    pub trails: Vec<TrailId>,
}

/// Join row recording that a closure closed a slot. A slot may carry
/// several when closures overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotClosure {
    pub slot: SlotId,
    pub closure: ClosureId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub trail: TrailId,
    pub start_time: DateTime<Utc>,
}

// ── Patches and candidates ───────────────────────────────

/// Stage/team patch applied to a slot and propagated (team-cleared)
/// across its trail group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotPatch {
    pub stage: Option<Stage>,
    /// Outer `None` leaves the team untouched; `Some(None)` clears it.
    pub team: Option<Option<TeamId>>,
}

impl SlotPatch {
    pub fn stage(stage: Stage) -> Self {
        Self { stage: Some(stage), team: None }
    }

    pub fn sell(team: TeamId) -> Self {
        Self { stage: Some(Stage::Sold), team: Some(Some(team)) }
    }

    pub fn release() -> Self {
        Self { stage: Some(Stage::Available), team: Some(None) }
    }

    /// The variant propagated to trail-group siblings: same stage, team
    /// untouched (a team occupies exactly one slot).
    pub fn without_team(&self) -> Self {
        Self { stage: self.stage, team: None }
    }
}

/// Partial closure payload from a trigger. Absent fields keep the
/// persisted value; clearing a nullable field is not expressible, as in
/// the upstream trigger format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosurePatch {
    pub application_period_from: Option<NaiveDate>,
    pub application_period_until: Option<NaiveDate>,
    pub closed_time_from: Option<NaiveTime>,
    pub closed_time_until: Option<NaiveTime>,
    pub weekdays: Option<WeekdaySet>,
    pub trails: Option<TrailsPatch>,
}

/// Trail links added/removed alongside a closure update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailsPatch {
    pub add: Vec<TrailId>,
    pub remove: Vec<TrailId>,
}

/// Full pre-validation closure value: the persisted row (if any) with a
/// patch overlaid. No hidden defaults; the documented ones (absent
/// weekdays mean all seven, absent closed times mean the full day) apply
/// at rule-build time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureCandidate {
    pub application_period_from: Option<NaiveDate>,
    pub application_period_until: Option<NaiveDate>,
    pub closed_time_from: Option<NaiveTime>,
    pub closed_time_until: Option<NaiveTime>,
    pub weekdays: Option<WeekdaySet>,
}

impl Closure {
    pub fn candidate(&self) -> ClosureCandidate {
        ClosureCandidate {
            application_period_from: self.application_period_from,
            application_period_until: self.application_period_until,
            closed_time_from: self.closed_time_from,
            closed_time_until: self.closed_time_until,
            weekdays: self.weekdays,
        }
    }

    /// Overlay a partial patch onto this persisted row.
    pub fn overlay(&self, patch: &ClosurePatch) -> ClosureCandidate {
        ClosureCandidate {
            application_period_from: patch.application_period_from.or(self.application_period_from),
            application_period_until: patch.application_period_until.or(self.application_period_until),
            closed_time_from: patch.closed_time_from.or(self.closed_time_from),
            closed_time_until: patch.closed_time_until.or(self.closed_time_until),
            weekdays: patch.weekdays.or(self.weekdays),
        }
    }

    /// Trail set after applying the patch's add/remove lists.
    pub fn trails_with(&self, patch: &ClosurePatch) -> Vec<TrailId> {
        let mut trails = self.trails.clone();
        if let Some(tp) = &patch.trails {
            for t in &tp.add {
                if !trails.contains(t) {
                    trails.push(*t);
                }
            }
            trails.retain(|t| !tp.remove.contains(t));
        }
        trails
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRulePatch {
    pub trail: Option<TrailId>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub weekdays: Option<WeekdaySet>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartRuleCandidate {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub weekdays: Option<WeekdaySet>,
}

impl StartRule {
    pub fn candidate(&self) -> StartRuleCandidate {
        StartRuleCandidate {
            date_from: Some(self.date_from),
            date_to: self.date_to,
            time: Some(self.time),
            weekdays: self.weekdays,
        }
    }

    pub fn overlay(&self, patch: &StartRulePatch) -> StartRuleCandidate {
        StartRuleCandidate {
            date_from: patch.date_from.or(Some(self.date_from)),
            date_to: patch.date_to.or(self.date_to),
            time: patch.time.or(Some(self.time)),
            weekdays: patch.weekdays.or(self.weekdays),
        }
    }
}

impl From<&StartRulePatch> for StartRuleCandidate {
    fn from(patch: &StartRulePatch) -> Self {
        StartRuleCandidate {
            date_from: patch.date_from,
            date_to: patch.date_to,
            time: patch.time,
            weekdays: patch.weekdays,
        }
    }
}

impl From<&ClosurePatch> for ClosureCandidate {
    fn from(patch: &ClosurePatch) -> Self {
        ClosureCandidate {
            application_period_from: patch.application_period_from,
            application_period_until: patch.application_period_until,
            closed_time_from: patch.closed_time_from,
            closed_time_until: patch.closed_time_until,
            weekdays: patch.weekdays,
        }
    }
}
