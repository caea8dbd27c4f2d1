//! Rule-shape validation. Checks run from explicit ordered tables so the
//! set of checks per entity is exhaustive and their order is fixed;
//! problems come back as messages, never as errors, so multiple failures
//! surface at once.

use crate::model::{ClosureCandidate, StartRuleCandidate};

type ClosureCheck = fn(&ClosureCandidate) -> Option<&'static str>;
type StartRuleCheck = fn(&StartRuleCandidate) -> Option<&'static str>;

const CLOSURE_CHECKS: &[(&str, ClosureCheck)] = &[
    ("application_period_from", |c| {
        c.application_period_from.is_none().then_some("is required")
    }),
    ("application_period_until", |c| {
        match (c.application_period_from, c.application_period_until) {
            (Some(from), Some(until)) if from > until => {
                Some("must not precede application_period_from")
            }
            _ => None,
        }
    }),
    ("closed_time_from", |c| {
        match (c.closed_time_from, c.closed_time_until) {
            (Some(_), None) | (None, Some(_)) => {
                Some("closed times must be given as a pair or not at all")
            }
            _ => None,
        }
    }),
    ("closed_time_until", |c| {
        match (c.closed_time_from, c.closed_time_until) {
            (Some(from), Some(until)) if from > until => {
                Some("must not precede closed_time_from")
            }
            _ => None,
        }
    }),
    // An absent set defaults to all seven days; only an explicitly empty
    // set is rejected.
    ("weekdays", |c| match c.weekdays {
        Some(set) if set.is_empty() => Some("must not be empty"),
        _ => None,
    }),
];

const START_RULE_CHECKS: &[(&str, StartRuleCheck)] = &[
    ("date_from", |c| c.date_from.is_none().then_some("is required")),
    ("time", |c| c.time.is_none().then_some("is required")),
    ("date_to", |c| match (c.date_from, c.date_to) {
        (Some(from), Some(to)) if from > to => Some("must not precede date_from"),
        _ => None,
    }),
    ("weekdays", |c| match c.weekdays {
        Some(set) if set.is_empty() => Some("must not be empty"),
        _ => None,
    }),
];

/// Validate a closure candidate. Empty result means the rule is sound.
pub fn validate_closure(candidate: &ClosureCandidate) -> Vec<String> {
    CLOSURE_CHECKS
        .iter()
        .filter_map(|(field, check)| check(candidate).map(|msg| format!("{field}: {msg}")))
        .collect()
}

/// Validate a start-rule candidate.
pub fn validate_start_rule(candidate: &StartRuleCandidate) -> Vec<String> {
    START_RULE_CHECKS
        .iter()
        .filter_map(|(field, check)| check(candidate).map(|msg| format!("{field}: {msg}")))
        .collect()
}
