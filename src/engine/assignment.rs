//! Booking-side slot mutation: team registration with buffer
//! enforcement, stage patches with trail-group propagation, and slot
//! release. Occupancy is checked before any overwrite; there is no lock,
//! so the order of checks is the protection.

use chrono::Duration;

use crate::model::{Slot, SlotId, SlotPatch, Stage, TeamId};
use crate::notify::{ImpactReason, SlotImpact};
use crate::observability;
use crate::store::Write;

use super::{Engine, EngineError};

/// Minimum spacing between team starts on a trail. Slots at exactly this
/// offset on either side of a registration are forced closed.
const BUFFER_MINUTES: i64 = 14;

impl Engine {
    /// Book a team onto its trail at its start instant. An existing slot
    /// at `(trail, start_time)` is sold through the occupancy-checked
    /// path; otherwise a virtual slot is created directly sold. Then the
    /// slots at exactly `start_time` plus and minus the buffer are forced
    /// closed.
    pub async fn register_team(&self, team_id: TeamId) -> Result<SlotId, EngineError> {
        let team = self
            .store
            .team(team_id)
            .await?
            .ok_or(EngineError::NotFound("team", team_id))?;

        let existing = self
            .store
            .slots_for_trails_at(&[team.trail], team.start_time)
            .await?;
        let slot_id = match existing.first() {
            Some(slot) => {
                self.update_slot_stage(slot.id, SlotPatch::sell(team_id)).await?;
                slot.id
            }
            None => {
                let slot = Slot::virtual_sold(team.trail, team.start_time, team_id);
                let id = slot.id;
                self.store.commit(vec![Write::PutSlot(slot)]).await?;
                id
            }
        };
        self.notify.send(&SlotImpact {
            slot: slot_id,
            trail: team.trail,
            date_time: team.start_time,
            reason: ImpactReason::Booked,
        });

        // The two exact instants, not a range.
        let buffer = [
            team.start_time - Duration::minutes(BUFFER_MINUTES),
            team.start_time + Duration::minutes(BUFFER_MINUTES),
        ];
        for slot in self.store.slots_at_instants(team.trail, &buffer).await? {
            self.update_slot_stage(slot.id, SlotPatch::stage(Stage::Closed)).await?;
        }

        metrics::counter!(observability::TEAMS_REGISTERED_TOTAL).increment(1);
        tracing::info!(team = %team_id, slot = %slot_id, trail = %team.trail, "team registered");
        Ok(slot_id)
    }

    /// Apply a stage/team patch to one slot and propagate the
    /// team-cleared patch to every slot at the same instant across the
    /// trail's group. Fails with `SlotOccupied` when the slot holds a
    /// team the patch does not re-assert, including stage-only patches.
    pub async fn update_slot_stage(
        &self,
        slot_id: SlotId,
        patch: SlotPatch,
    ) -> Result<(), EngineError> {
        let slot = self
            .store
            .slot(slot_id)
            .await?
            .ok_or(EngineError::NotFound("slot", slot_id))?;
        if let Some(team) = slot.team {
            let reasserts = matches!(patch.team, Some(Some(t)) if t == team);
            if !reasserts {
                return Err(EngineError::SlotOccupied { slot: slot_id, team });
            }
        }

        let mut updated = slot.clone();
        if let Some(stage) = patch.stage {
            updated.stage = stage;
        }
        if let Some(team) = patch.team {
            updated.team = team;
        }
        let mut writes = vec![Write::PutSlot(updated.clone())];
        let mut impacts = vec![SlotImpact {
            slot: slot.id,
            trail: slot.trail,
            date_time: slot.date_time,
            reason: ImpactReason::StageChanged,
        }];

        // Group siblings take the stage change only; team stays per-trail.
        let siblings = self.store.trail_group_siblings(slot.trail).await?;
        if !siblings.is_empty() {
            let sibling_patch = patch.without_team();
            for other in self
                .store
                .slots_for_trails_at(&siblings, slot.date_time)
                .await?
            {
                let mut changed = other.clone();
                if let Some(stage) = sibling_patch.stage {
                    changed.stage = stage;
                }
                if changed != other {
                    writes.push(Write::PutSlot(changed.clone()));
                    impacts.push(SlotImpact {
                        slot: changed.id,
                        trail: changed.trail,
                        date_time: changed.date_time,
                        reason: ImpactReason::StageChanged,
                    });
                }
            }
        }
        self.store.commit(writes).await?;

        for impact in &impacts {
            self.notify.send(impact);
        }
        Ok(())
    }

    /// Vacate a slot. Rule-owned slots return to available with no team
    /// in one commit; virtual slots are deleted outright.
    pub async fn free_slot(&self, slot_id: SlotId) -> Result<(), EngineError> {
        let slot = self
            .store
            .slot(slot_id)
            .await?
            .ok_or(EngineError::NotFound("slot", slot_id))?;
        if slot.start_rule_id.is_some() {
            let updated = Slot { stage: Stage::Available, team: None, ..slot.clone() };
            self.store.commit(vec![Write::PutSlot(updated)]).await?;
            self.notify.send(&SlotImpact {
                slot: slot.id,
                trail: slot.trail,
                date_time: slot.date_time,
                reason: ImpactReason::Released,
            });
        } else {
            self.store.commit(vec![Write::DeleteSlot(slot.id)]).await?;
            self.notify.send(&SlotImpact {
                slot: slot.id,
                trail: slot.trail,
                date_time: slot.date_time,
                reason: ImpactReason::Deleted,
            });
        }
        Ok(())
    }

    /// Free whatever slot the team currently holds. Logs when there is
    /// none; that is not an error.
    pub async fn release_team(&self, team_id: TeamId) -> Result<(), EngineError> {
        self.store
            .team(team_id)
            .await?
            .ok_or(EngineError::NotFound("team", team_id))?;
        match self.store.slot_for_team(team_id).await? {
            Some(slot) => self.free_slot(slot.id).await,
            None => {
                tracing::warn!(team = %team_id, "release requested but the team holds no slot");
                Ok(())
            }
        }
    }

    /// Move a team to its current trail/start time: release the held
    /// slot, then register again.
    pub async fn reassign_team(&self, team_id: TeamId) -> Result<SlotId, EngineError> {
        self.release_team(team_id).await?;
        self.register_team(team_id).await
    }
}
