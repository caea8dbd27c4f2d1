//! Storage seam for the engine. [`SlotStore`] is the async trait the engine
//! talks to; [`MemoryStore`] is the in-process implementation backing tests
//! and embedded use. Mutations go through [`Write`] batches so every
//! reconciliation step lands atomically.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{
    Closure, ClosureId, Slot, SlotClosure, SlotId, StartRule, StartRuleId, Team, TeamId, TrailId,
};

// ── errors ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum StoreError {
    /// Backend-level failure (I/O, serialization, connection loss).
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ── write batches ───────────────────────────────────────────────────────

/// One mutation in a batch. A batch either applies in full or not at all.
#[derive(Debug, Clone)]
pub enum Write {
    PutSlot(Slot),
    DeleteSlot(SlotId),
    PutStartRule(StartRule),
    DeleteStartRule(StartRuleId),
    PutClosure(Closure),
    DeleteClosure(ClosureId),
    Link(SlotClosure),
    Unlink { slot: SlotId, closure: ClosureId },
}

// ── trait ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Apply a batch atomically. Puts overwrite, deletes of missing rows
    /// are no-ops, duplicate links collapse to one.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError>;

    async fn slot(&self, id: SlotId) -> Result<Option<Slot>, StoreError>;

    /// Slots on a trail with `date_time >= from`, ordered by time then id.
    async fn slots_for_trail_from(
        &self,
        trail: TrailId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError>;

    /// Slots generated by a start rule with `date_time >= from`.
    async fn slots_for_rule_from(
        &self,
        rule: StartRuleId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError>;

    /// Slots on a trail whose `date_time` equals one of the given instants
    /// exactly.
    async fn slots_at_instants(
        &self,
        trail: TrailId,
        instants: &[DateTime<Utc>],
    ) -> Result<Vec<Slot>, StoreError>;

    /// Slots at one instant across a set of trails.
    async fn slots_for_trails_at(
        &self,
        trails: &[TrailId],
        at: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError>;

    async fn start_rule(&self, id: StartRuleId) -> Result<Option<StartRule>, StoreError>;

    async fn closure(&self, id: ClosureId) -> Result<Option<Closure>, StoreError>;

    /// Closures whose trail list contains the given trail.
    async fn closures_for_trail(&self, trail: TrailId) -> Result<Vec<Closure>, StoreError>;

    async fn links_for_slot(&self, slot: SlotId) -> Result<Vec<SlotClosure>, StoreError>;

    async fn links_for_closure(&self, closure: ClosureId) -> Result<Vec<SlotClosure>, StoreError>;

    async fn team(&self, id: TeamId) -> Result<Option<Team>, StoreError>;

    /// The slot currently held by a team, if any. A team occupies at most
    /// one slot.
    async fn slot_for_team(&self, team: TeamId) -> Result<Option<Slot>, StoreError>;

    async fn put_team(&self, team: Team) -> Result<(), StoreError>;

    async fn delete_team(&self, id: TeamId) -> Result<(), StoreError>;

    /// The other trails in the given trail's group, empty if ungrouped.
    async fn trail_group_siblings(&self, trail: TrailId) -> Result<Vec<TrailId>, StoreError>;
}

// ── in-memory implementation ────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    slots: HashMap<SlotId, Slot>,
    start_rules: HashMap<StartRuleId, StartRule>,
    closures: HashMap<ClosureId, Closure>,
    links: HashSet<(SlotId, ClosureId)>,
    teams: HashMap<TeamId, Team>,
    trail_groups: Vec<Vec<TrailId>>,
}

/// All tables behind one lock; a commit holds the write guard for the
/// whole batch, which is what makes batches atomic.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Register a trail group. Trails not in any group are ungrouped.
    pub async fn set_trail_group(&self, trails: Vec<TrailId>) {
        self.tables.write().await.trail_groups.push(trails);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut slots: Vec<Slot>) -> Vec<Slot> {
    slots.sort_by(|a, b| a.date_time.cmp(&b.date_time).then(a.id.cmp(&b.id)));
    slots
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        for write in writes {
            match write {
                Write::PutSlot(slot) => {
                    t.slots.insert(slot.id, slot);
                }
                Write::DeleteSlot(id) => {
                    t.slots.remove(&id);
                    t.links.retain(|(s, _)| *s != id);
                }
                Write::PutStartRule(rule) => {
                    t.start_rules.insert(rule.id, rule);
                }
                Write::DeleteStartRule(id) => {
                    t.start_rules.remove(&id);
                }
                Write::PutClosure(closure) => {
                    t.closures.insert(closure.id, closure);
                }
                Write::DeleteClosure(id) => {
                    t.closures.remove(&id);
                }
                Write::Link(link) => {
                    t.links.insert((link.slot, link.closure));
                }
                Write::Unlink { slot, closure } => {
                    t.links.remove(&(slot, closure));
                }
            }
        }
        Ok(())
    }

    async fn slot(&self, id: SlotId) -> Result<Option<Slot>, StoreError> {
        Ok(self.tables.read().await.slots.get(&id).cloned())
    }

    async fn slots_for_trail_from(
        &self,
        trail: TrailId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let t = self.tables.read().await;
        Ok(sorted(
            t.slots
                .values()
                .filter(|s| s.trail == trail && s.date_time >= from)
                .cloned()
                .collect(),
        ))
    }

    async fn slots_for_rule_from(
        &self,
        rule: StartRuleId,
        from: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let t = self.tables.read().await;
        Ok(sorted(
            t.slots
                .values()
                .filter(|s| s.start_rule_id == Some(rule) && s.date_time >= from)
                .cloned()
                .collect(),
        ))
    }

    async fn slots_at_instants(
        &self,
        trail: TrailId,
        instants: &[DateTime<Utc>],
    ) -> Result<Vec<Slot>, StoreError> {
        let t = self.tables.read().await;
        Ok(sorted(
            t.slots
                .values()
                .filter(|s| s.trail == trail && instants.contains(&s.date_time))
                .cloned()
                .collect(),
        ))
    }

    async fn slots_for_trails_at(
        &self,
        trails: &[TrailId],
        at: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let t = self.tables.read().await;
        Ok(sorted(
            t.slots
                .values()
                .filter(|s| s.date_time == at && trails.contains(&s.trail))
                .cloned()
                .collect(),
        ))
    }

    async fn start_rule(&self, id: StartRuleId) -> Result<Option<StartRule>, StoreError> {
        Ok(self.tables.read().await.start_rules.get(&id).cloned())
    }

    async fn closure(&self, id: ClosureId) -> Result<Option<Closure>, StoreError> {
        Ok(self.tables.read().await.closures.get(&id).cloned())
    }

    async fn closures_for_trail(&self, trail: TrailId) -> Result<Vec<Closure>, StoreError> {
        let t = self.tables.read().await;
        let mut found: Vec<Closure> = t
            .closures
            .values()
            .filter(|c| c.trails.contains(&trail))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn links_for_slot(&self, slot: SlotId) -> Result<Vec<SlotClosure>, StoreError> {
        let t = self.tables.read().await;
        let mut links: Vec<SlotClosure> = t
            .links
            .iter()
            .filter(|(s, _)| *s == slot)
            .map(|&(slot, closure)| SlotClosure { slot, closure })
            .collect();
        links.sort_by_key(|l| l.closure);
        Ok(links)
    }

    async fn links_for_closure(&self, closure: ClosureId) -> Result<Vec<SlotClosure>, StoreError> {
        let t = self.tables.read().await;
        let mut links: Vec<SlotClosure> = t
            .links
            .iter()
            .filter(|(_, c)| *c == closure)
            .map(|&(slot, closure)| SlotClosure { slot, closure })
            .collect();
        links.sort_by_key(|l| l.slot);
        Ok(links)
    }

    async fn team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
        Ok(self.tables.read().await.teams.get(&id).cloned())
    }

    async fn slot_for_team(&self, team: TeamId) -> Result<Option<Slot>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.slots.values().find(|s| s.team == Some(team)).cloned())
    }

    async fn put_team(&self, team: Team) -> Result<(), StoreError> {
        self.tables.write().await.teams.insert(team.id, team);
        Ok(())
    }

    async fn delete_team(&self, id: TeamId) -> Result<(), StoreError> {
        self.tables.write().await.teams.remove(&id);
        Ok(())
    }

    async fn trail_group_siblings(&self, trail: TrailId) -> Result<Vec<TrailId>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.trail_groups
            .iter()
            .find(|group| group.contains(&trail))
            .map(|group| group.iter().copied().filter(|&t| t != trail).collect())
            .unwrap_or_default())
    }
}
