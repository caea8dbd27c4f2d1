//! End-to-end flows through the public trigger surface: JSON trigger
//! payloads in, engine dispatch, slot state and impact broadcasts out.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ulid::Ulid;

use slotgen::clock::FixedClock;
use slotgen::model::{Closure, Stage, StartRule, Team};
use slotgen::notify::{ImpactReason, NotifyHub};
use slotgen::store::{MemoryStore, SlotStore, Write};
use slotgen::trigger::{ClosureTrigger, StartRuleTrigger};
use slotgen::Engine;

// ── Test infrastructure ──────────────────────────────────────

fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

fn engine_at_june_2024() -> (Engine, Arc<MemoryStore>, Arc<NotifyHub>) {
    let store = Arc::new(MemoryStore::new());
    let notify = Arc::new(NotifyHub::new());
    let clock = Arc::new(FixedClock::new(at(2024, 6, 1, 0)));
    let engine = Engine::with_clock(store.clone(), notify.clone(), clock);
    (engine, store, notify)
}

async fn seed_daily_rule(store: &MemoryStore, trail: Ulid) -> StartRule {
    let rule = StartRule {
        id: Ulid::new(),
        trail,
        date_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        date_to: None,
        time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        weekdays: None,
        rule: None,
        force: false,
    };
    store
        .commit(vec![Write::PutStartRule(rule.clone())])
        .await
        .unwrap();
    rule
}

async fn seed_june_closure(store: &MemoryStore, trail: Ulid) -> Closure {
    let closure = Closure {
        id: Ulid::new(),
        application_period_from: NaiveDate::from_ymd_opt(2024, 6, 1),
        application_period_until: NaiveDate::from_ymd_opt(2024, 6, 30),
        closed_time_from: None,
        closed_time_until: None,
        weekdays: None,
        rule: None,
        force: true,
        trails: vec![trail],
    };
    store
        .commit(vec![Write::PutClosure(closure.clone())])
        .await
        .unwrap();
    closure
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn create_trigger_generates_then_closure_trigger_closes() {
    let (engine, store, _) = engine_at_june_2024();
    let trail = Ulid::new();
    let rule = seed_daily_rule(&store, trail).await;

    // Triggers arrive as JSON from the outer system.
    let create: StartRuleTrigger = serde_json::from_value(serde_json::json!({
        "action": "create",
        "key": rule.id,
    }))
    .unwrap();
    engine.handle_start_rule_trigger(&create).await.unwrap();

    let slots = store
        .slots_for_trail_from(trail, DateTime::<Utc>::MIN_UTC)
        .await
        .unwrap();
    assert_eq!(slots.len(), 365);
    assert!(slots.iter().all(|s| s.stage == Stage::Available));

    let closure = seed_june_closure(&store, trail).await;
    let close: ClosureTrigger = serde_json::from_value(serde_json::json!({
        "action": "create",
        "keys": [closure.id],
    }))
    .unwrap();
    engine.handle_closure_trigger(&close).await.unwrap();

    let slots = store
        .slots_for_trail_from(trail, DateTime::<Utc>::MIN_UTC)
        .await
        .unwrap();
    let closed = slots.iter().filter(|s| s.stage == Stage::Closed).count();
    assert_eq!(closed, 30);
}

#[tokio::test]
async fn delete_trigger_reopens_slots_and_broadcasts_impacts() {
    let (engine, store, notify) = engine_at_june_2024();
    let trail = Ulid::new();
    let rule = seed_daily_rule(&store, trail).await;
    engine.initialize_new_start_rule(rule.id).await.unwrap();
    let closure = seed_june_closure(&store, trail).await;
    engine.upsert_closures(&[closure.id]).await.unwrap();

    let mut rx = notify.subscribe(trail);
    let delete: ClosureTrigger = serde_json::from_value(serde_json::json!({
        "action": "delete",
        "key": closure.id,
    }))
    .unwrap();
    engine.handle_closure_trigger(&delete).await.unwrap();

    let slots = store
        .slots_for_trail_from(trail, DateTime::<Utc>::MIN_UTC)
        .await
        .unwrap();
    assert!(slots.iter().all(|s| s.stage == Stage::Available));

    let mut reopened = 0;
    while let Ok(impact) = rx.try_recv() {
        assert_eq!(impact.reason, ImpactReason::Reopened);
        reopened += 1;
    }
    assert_eq!(reopened, 30);
}

#[tokio::test]
async fn booking_survives_a_full_reconciliation_cycle() {
    let (engine, store, _) = engine_at_june_2024();
    let trail = Ulid::new();
    let rule = seed_daily_rule(&store, trail).await;
    engine.initialize_new_start_rule(rule.id).await.unwrap();

    let team = Team {
        id: Ulid::new(),
        trail,
        start_time: at(2024, 6, 15, 10),
    };
    store.put_team(team.clone()).await.unwrap();
    engine.register_team(team.id).await.unwrap();

    let closure = seed_june_closure(&store, trail).await;
    engine.upsert_closures(&[closure.id]).await.unwrap();
    engine.delete_closures(&[closure.id]).await.unwrap();

    let slot = store.slot_for_team(team.id).await.unwrap().unwrap();
    assert_eq!(slot.stage, Stage::Sold);
    assert_eq!(slot.date_time, at(2024, 6, 15, 10));
}

#[tokio::test]
async fn update_trigger_regenerates_from_changed_row() {
    let (engine, store, _) = engine_at_june_2024();
    let trail = Ulid::new();
    let mut rule = seed_daily_rule(&store, trail).await;
    engine.initialize_new_start_rule(rule.id).await.unwrap();

    // The outer system persists the field change before firing the trigger.
    rule.time = chrono::NaiveTime::from_hms_opt(14, 30, 0).unwrap();
    store
        .commit(vec![Write::PutStartRule(rule.clone())])
        .await
        .unwrap();
    // Update events arrive as id batches.
    let update: StartRuleTrigger = serde_json::from_value(serde_json::json!({
        "action": "update",
        "keys": [rule.id],
    }))
    .unwrap();
    engine.handle_start_rule_trigger(&update).await.unwrap();

    let slots = store
        .slots_for_trail_from(trail, DateTime::<Utc>::MIN_UTC)
        .await
        .unwrap();
    assert_eq!(slots.len(), 365);
    assert!(slots
        .iter()
        .all(|s| s.date_time.time() == chrono::NaiveTime::from_hms_opt(14, 30, 0).unwrap()));
}
