use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{SlotId, TrailId};

const CHANNEL_CAPACITY: usize = 256;

/// Why a slot changed. Carried on every impact event so subscribers can
/// tell reconciliation effects from booking traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactReason {
    Generated,
    Closed,
    Reopened,
    Deleted,
    StageChanged,
    Booked,
    Released,
}

/// One slot-level change on a trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotImpact {
    pub slot: SlotId,
    pub trail: TrailId,
    pub date_time: DateTime<Utc>,
    pub reason: ImpactReason,
}

/// Broadcast hub for slot impacts, one channel per trail.
pub struct NotifyHub {
    channels: DashMap<TrailId, broadcast::Sender<SlotImpact>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to impacts for a trail. Creates the channel if needed.
    pub fn subscribe(&self, trail: TrailId) -> broadcast::Receiver<SlotImpact> {
        let sender = self
            .channels
            .entry(trail)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an impact. No-op if nobody is listening on the trail.
    pub fn send(&self, impact: &SlotImpact) {
        if let Some(sender) = self.channels.get(&impact.trail) {
            let _ = sender.send(impact.clone());
        }
    }

    /// Remove a channel (e.g. when a trail is decommissioned).
    #[allow(dead_code)]
    pub fn remove(&self, trail: &TrailId) {
        self.channels.remove(trail);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let trail = Ulid::new();
        let mut rx = hub.subscribe(trail);

        let impact = SlotImpact {
            slot: Ulid::new(),
            trail,
            date_time: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            reason: ImpactReason::Closed,
        };
        hub.send(&impact);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, impact);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(&SlotImpact {
            slot: Ulid::new(),
            trail: Ulid::new(),
            date_time: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            reason: ImpactReason::Deleted,
        });
    }
}
