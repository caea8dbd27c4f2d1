//! Start-rule slot generation. The expansion window is always exactly
//! one year from generation time regardless of the rule's own `date_to`;
//! regeneration on update is what rolls the window forward.

use chrono::{DateTime, Months, Utc};

use crate::model::{
    Slot, SlotClosure, Stage, StartRuleCandidate, StartRuleId, TrailId,
};
use crate::notify::{ImpactReason, SlotImpact};
use crate::observability;
use crate::recurrence::{CompositeSchedule, DAY_MS, RecurrenceRule};
use crate::store::Write;
use crate::trigger::{StartRuleTrigger, TriggerAction, Validation};

use super::{Engine, EngineError, start_rule_keys, validate_start_rule};

/// Build the point rule for a validated candidate.
pub(super) fn build_start_rule_recurrence(
    candidate: &StartRuleCandidate,
) -> Result<RecurrenceRule, Vec<String>> {
    let errors = validate_start_rule(candidate);
    let (Some(date_from), Some(time)) = (candidate.date_from, candidate.time) else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(RecurrenceRule::daily_starts(
        date_from,
        candidate.date_to,
        time,
        candidate.weekdays,
    ))
}

impl Engine {
    /// First generation for a newly created start rule: derive the rule,
    /// persist its serialized form, materialize one year of slots. One
    /// atomic commit.
    pub async fn initialize_new_start_rule(&self, id: StartRuleId) -> Result<(), EngineError> {
        let row = self
            .store
            .start_rule(id)
            .await?
            .ok_or(EngineError::NotFound("start rule", id))?;
        let rule =
            build_start_rule_recurrence(&row.candidate()).map_err(EngineError::RuleInvalid)?;

        let mut writes = self.generate_slots(&rule, row.trail, id).await?;
        let generated = writes
            .iter()
            .filter(|w| matches!(w, Write::PutSlot(_)))
            .count();
        let mut updated = row.clone();
        updated.rule = Some(rule.to_json());
        updated.force = false;
        writes.push(Write::PutStartRule(updated));
        self.store.commit(writes).await?;

        tracing::info!(start_rule = %id, slots = generated, "start rule initialized");
        Ok(())
    }

    /// Full regeneration: report future sold slots, then delete every
    /// slot the rule owns and rebuild. Deliberately more destructive than
    /// closure reconciliation; callers are expected to act on the
    /// validation warnings before confirming the update.
    pub async fn update_start_rule(&self, id: StartRuleId) -> Result<(), EngineError> {
        let row = self
            .store
            .start_rule(id)
            .await?
            .ok_or(EngineError::NotFound("start rule", id))?;
        let rule =
            build_start_rule_recurrence(&row.candidate()).map_err(EngineError::RuleInvalid)?;

        let now = self.clock.now();
        let owned = self
            .store
            .slots_for_rule_from(id, DateTime::<Utc>::MIN_UTC)
            .await?;
        let mut writes = Vec::with_capacity(owned.len());
        for slot in &owned {
            if slot.team.is_some() && slot.date_time >= now {
                self.notify.send(&SlotImpact {
                    slot: slot.id,
                    trail: slot.trail,
                    date_time: slot.date_time,
                    reason: ImpactReason::Deleted,
                });
            }
            writes.push(Write::DeleteSlot(slot.id));
        }
        let deleted = writes.len() as u64;

        writes.extend(self.generate_slots(&rule, row.trail, id).await?);
        let mut updated = row.clone();
        updated.rule = Some(rule.to_json());
        updated.force = false;
        writes.push(Write::PutStartRule(updated));
        self.store.commit(writes).await?;

        metrics::counter!(observability::SLOTS_DELETED_TOTAL).increment(deleted);
        tracing::info!(start_rule = %id, deleted, "start rule regenerated");
        Ok(())
    }

    /// Purge every slot the rule owns, then the rule itself. No warnings;
    /// deletion is the caller's validated decision.
    pub async fn delete_start_rule(&self, id: StartRuleId) -> Result<(), EngineError> {
        let owned = self
            .store
            .slots_for_rule_from(id, DateTime::<Utc>::MIN_UTC)
            .await?;
        let mut writes: Vec<Write> = owned.iter().map(|s| Write::DeleteSlot(s.id)).collect();
        let deleted = writes.len() as u64;
        writes.push(Write::DeleteStartRule(id));
        self.store.commit(writes).await?;

        metrics::counter!(observability::SLOTS_DELETED_TOTAL).increment(deleted);
        tracing::info!(start_rule = %id, deleted, "start rule deleted");
        Ok(())
    }

    /// Materialize one year of slots for a rule as store writes. Each
    /// occurrence covered by the trail's composite closure schedule is
    /// created pre-closed and linked to every covering closure.
    pub(super) async fn generate_slots(
        &self,
        rule: &RecurrenceRule,
        trail: TrailId,
        start_rule_id: StartRuleId,
    ) -> Result<Vec<Write>, EngineError> {
        let now = self.clock.now();
        let horizon = now + Months::new(12);

        let closures = self.store.closures_for_trail(trail).await?;
        let mut closure_ids = Vec::with_capacity(closures.len());
        let mut members = Vec::with_capacity(closures.len());
        for closure in &closures {
            let Some(json) = &closure.rule else {
                return Err(EngineError::MissingRule(closure.id));
            };
            let member = RecurrenceRule::from_json(json)
                .map_err(|_| EngineError::MissingRule(closure.id))?;
            closure_ids.push(closure.id);
            members.push(member);
        }
        let schedule = CompositeSchedule::new(members);

        let mut writes = Vec::new();
        let mut generated = 0u64;
        for occ in rule.occurrences(now, horizon) {
            let covering = schedule.covering(occ, DAY_MS);
            if covering.is_empty() {
                writes.push(Write::PutSlot(Slot::generated(
                    trail,
                    occ,
                    Stage::Available,
                    start_rule_id,
                )));
            } else {
                let slot = Slot::generated(trail, occ, Stage::Closed, start_rule_id);
                for idx in covering {
                    writes.push(Write::Link(SlotClosure {
                        slot: slot.id,
                        closure: closure_ids[idx],
                    }));
                }
                writes.push(Write::PutSlot(slot));
            }
            generated += 1;
        }
        metrics::counter!(observability::SLOTS_GENERATED_TOTAL).increment(generated);
        Ok(writes)
    }

    /// Dry-run a start-rule create/update. An update additionally warns
    /// about every future sold slot the changed recurrence would no
    /// longer cover.
    pub async fn validate_start_rule_trigger(
        &self,
        trigger: &StartRuleTrigger,
    ) -> Result<Validation, EngineError> {
        let patch = trigger.payload.clone().unwrap_or_default();
        match trigger.action {
            TriggerAction::Create => {
                let candidate = StartRuleCandidate::from(&patch);
                Ok(Validation {
                    errors: validate_start_rule(&candidate),
                    warnings: Vec::new(),
                })
            }
            TriggerAction::Update => {
                let mut validation = Validation::default();
                for id in start_rule_keys(trigger)? {
                    let row = self
                        .store
                        .start_rule(id)
                        .await?
                        .ok_or(EngineError::NotFound("start rule", id))?;
                    match build_start_rule_recurrence(&row.overlay(&patch)) {
                        Err(errors) => validation.errors.extend(errors),
                        Ok(rule) => {
                            let now = self.clock.now();
                            validation.warnings.extend(
                                self.store
                                    .slots_for_rule_from(id, now)
                                    .await?
                                    .iter()
                                    .filter(|s| {
                                        s.team.is_some() && !rule.occurs_on(s.date_time, DAY_MS)
                                    })
                                    .map(|s| {
                                        format!(
                                            "sold slot {} at {} would be deleted",
                                            s.id, s.date_time
                                        )
                                    }),
                            );
                        }
                    }
                }
                Ok(validation)
            }
            TriggerAction::Delete => Err(EngineError::UnsupportedAction(TriggerAction::Delete)),
        }
    }
}
