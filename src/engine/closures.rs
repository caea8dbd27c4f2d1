//! Closure reconciliation: keep slot stages consistent with the active
//! closure set without losing bookings. Upsert frees a closure's prior
//! effect before recomputing it, so repeated edits converge and loosened
//! closures reopen the slots they no longer cover.

use std::collections::BTreeSet;

use crate::model::{
    ClosureCandidate, ClosureId, Slot, SlotClosure, Stage, TrailId,
};
use crate::notify::{ImpactReason, SlotImpact};
use crate::observability;
use crate::recurrence::{DAY_MS, RecurrenceRule};
use crate::store::Write;
use crate::trigger::{ClosureTrigger, TriggerAction, Validation};

use super::{Engine, EngineError, closure_keys, validate_closure};

/// Build the interval rule for a validated candidate. Returns the
/// validation messages when the candidate is unsound.
pub(super) fn build_closure_rule(candidate: &ClosureCandidate) -> Result<RecurrenceRule, Vec<String>> {
    let errors = validate_closure(candidate);
    let Some(from) = candidate.application_period_from else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(RecurrenceRule::daily_window(
        from,
        candidate.application_period_until,
        candidate.closed_time_from,
        candidate.closed_time_until,
        candidate.weekdays,
    ))
}

impl Engine {
    /// Dry-run a closure create/update: validation errors plus one warning
    /// per currently non-closed future slot the rule would close, with
    /// sold slots flagged. No writes.
    pub async fn validate_closure_trigger(
        &self,
        trigger: &ClosureTrigger,
    ) -> Result<Validation, EngineError> {
        let patch = trigger.payload.clone().unwrap_or_default();
        match trigger.action {
            TriggerAction::Create => {
                let candidate = ClosureCandidate::from(&patch);
                match build_closure_rule(&candidate) {
                    Err(errors) => Ok(Validation { errors, warnings: Vec::new() }),
                    Ok(rule) => {
                        let trails = patch.trails.map(|tp| tp.add).unwrap_or_default();
                        let warnings = self.closure_warnings(&rule, &trails).await?;
                        Ok(Validation { errors: Vec::new(), warnings })
                    }
                }
            }
            TriggerAction::Update => {
                let mut validation = Validation::default();
                for id in closure_keys(trigger)? {
                    let closure = self
                        .store
                        .closure(id)
                        .await?
                        .ok_or(EngineError::NotFound("closure", id))?;
                    match build_closure_rule(&closure.overlay(&patch)) {
                        Err(errors) => validation.errors.extend(errors),
                        Ok(rule) => {
                            let trails = closure.trails_with(&patch);
                            validation
                                .warnings
                                .extend(self.closure_warnings(&rule, &trails).await?);
                        }
                    }
                }
                Ok(validation)
            }
            TriggerAction::Delete => Err(EngineError::UnsupportedAction(TriggerAction::Delete)),
        }
    }

    async fn closure_warnings(
        &self,
        rule: &RecurrenceRule,
        trails: &[TrailId],
    ) -> Result<Vec<String>, EngineError> {
        let now = self.clock.now();
        let mut warnings = Vec::new();
        for &trail in trails {
            for slot in self.store.slots_for_trail_from(trail, now).await? {
                if slot.stage == Stage::Closed || !rule.occurs_on(slot.date_time, DAY_MS) {
                    continue;
                }
                let flag = if slot.stage == Stage::Sold { " (sold)" } else { "" };
                warnings.push(format!(
                    "slot {} on trail {} at {} would be closed{}",
                    slot.id, trail, slot.date_time, flag
                ));
            }
        }
        Ok(warnings)
    }

    /// Apply closure creates/updates: per closure, free its prior effect,
    /// rebuild the rule from the stored row, then close and link every
    /// covered future slot. Sold slots are reported before they are
    /// closed; closing always wins.
    pub async fn upsert_closures(&self, ids: &[ClosureId]) -> Result<(), EngineError> {
        for &id in ids {
            self.upsert_closure(id).await?;
        }
        Ok(())
    }

    async fn upsert_closure(&self, id: ClosureId) -> Result<(), EngineError> {
        let closure = self
            .store
            .closure(id)
            .await?
            .ok_or(EngineError::NotFound("closure", id))?;

        // Build the rule before touching anything; an invalid row must
        // abort with the prior effect intact.
        let rule = build_closure_rule(&closure.candidate()).map_err(EngineError::RuleInvalid)?;

        let reopened = self.free_closure_effect(id).await?;

        // Close covered future slots, re-linking already-closed ones so
        // every covering closure holds a join row.
        let now = self.clock.now();
        let mut writes = Vec::new();
        let mut impacts = Vec::new();
        let mut closed = 0u64;
        for &trail in &closure.trails {
            for slot in self.store.slots_for_trail_from(trail, now).await? {
                if !rule.occurs_on(slot.date_time, DAY_MS) {
                    continue;
                }
                if slot.team.is_some() {
                    // Report the impacted booking first, then close anyway.
                    self.notify.send(&SlotImpact {
                        slot: slot.id,
                        trail,
                        date_time: slot.date_time,
                        reason: ImpactReason::Closed,
                    });
                }
                if slot.stage != Stage::Closed {
                    let updated = Slot { stage: Stage::Closed, ..slot.clone() };
                    writes.push(Write::PutSlot(updated));
                    closed += 1;
                    if slot.team.is_none() {
                        impacts.push(SlotImpact {
                            slot: slot.id,
                            trail,
                            date_time: slot.date_time,
                            reason: ImpactReason::Closed,
                        });
                    }
                }
                writes.push(Write::Link(SlotClosure { slot: slot.id, closure: id }));
            }
        }
        let mut updated = closure.clone();
        updated.rule = Some(rule.to_json());
        updated.force = false;
        writes.push(Write::PutClosure(updated));
        self.store.commit(writes).await?;

        for impact in &impacts {
            self.notify.send(impact);
        }
        metrics::counter!(observability::SLOTS_CLOSED_TOTAL).increment(closed);
        tracing::info!(closure = %id, closed, reopened, "closure reconciled");
        Ok(())
    }

    /// Unlink a closure's join rows and reopen every slot left without
    /// any. A reopened slot still holding a team returns to sold, not
    /// available. One atomic commit; returns the reopen count.
    async fn free_closure_effect(&self, id: ClosureId) -> Result<u64, EngineError> {
        let links = self.store.links_for_closure(id).await?;
        let mut writes = Vec::new();
        let mut impacts = Vec::new();
        let mut reopened = 0u64;
        for link in &links {
            writes.push(Write::Unlink { slot: link.slot, closure: id });
            let still_linked = self
                .store
                .links_for_slot(link.slot)
                .await?
                .iter()
                .any(|l| l.closure != id);
            if still_linked {
                continue;
            }
            let Some(slot) = self.store.slot(link.slot).await? else {
                continue;
            };
            let stage = if slot.team.is_some() { Stage::Sold } else { Stage::Available };
            if slot.stage != stage {
                writes.push(Write::PutSlot(Slot { stage, ..slot.clone() }));
                impacts.push(SlotImpact {
                    slot: slot.id,
                    trail: slot.trail,
                    date_time: slot.date_time,
                    reason: ImpactReason::Reopened,
                });
                reopened += 1;
            }
        }
        self.store.commit(writes).await?;
        for impact in &impacts {
            self.notify.send(impact);
        }
        metrics::counter!(observability::SLOTS_REOPENED_TOTAL).increment(reopened);
        Ok(reopened)
    }

    /// Apply closure deletes: drop all join rows of the given closures and
    /// their rows, reopening only the slots left with zero links. Slots
    /// still covered by other closures stay closed.
    pub async fn delete_closures(&self, ids: &[ClosureId]) -> Result<(), EngineError> {
        let mut writes = Vec::new();
        let mut affected = BTreeSet::new();
        for &id in ids {
            for link in self.store.links_for_closure(id).await? {
                writes.push(Write::Unlink { slot: link.slot, closure: id });
                affected.insert(link.slot);
            }
            writes.push(Write::DeleteClosure(id));
        }

        let mut impacts = Vec::new();
        let mut reopened = 0u64;
        for slot_id in affected {
            let still_linked = self
                .store
                .links_for_slot(slot_id)
                .await?
                .iter()
                .any(|l| !ids.contains(&l.closure));
            if still_linked {
                continue;
            }
            let Some(slot) = self.store.slot(slot_id).await? else {
                continue;
            };
            let stage = if slot.team.is_some() { Stage::Sold } else { Stage::Available };
            if slot.stage != stage {
                writes.push(Write::PutSlot(Slot { stage, ..slot.clone() }));
                impacts.push(SlotImpact {
                    slot: slot.id,
                    trail: slot.trail,
                    date_time: slot.date_time,
                    reason: ImpactReason::Reopened,
                });
                reopened += 1;
            }
        }
        self.store.commit(writes).await?;

        for impact in &impacts {
            self.notify.send(impact);
        }
        metrics::counter!(observability::SLOTS_REOPENED_TOTAL).increment(reopened);
        tracing::info!(closures = ids.len(), reopened, "closures deleted");
        Ok(())
    }
}
