mod assignment;
mod closures;
mod error;
mod start_rules;
mod validate;

pub use error::EngineError;
pub use validate::{validate_closure, validate_start_rule};

use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::model::{ClosureId, StartRuleId};
use crate::notify::NotifyHub;
use crate::observability;
use crate::store::SlotStore;
use crate::trigger::{ClosureTrigger, StartRuleTrigger, TriggerAction};

/// The reconciliation engine. One instance per deployment; every
/// operation is one sequential logical transaction over the store, with
/// no in-process locks.
pub struct Engine {
    pub(crate) store: Arc<dyn SlotStore>,
    pub(crate) notify: Arc<NotifyHub>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Arc<dyn SlotStore>, notify: Arc<NotifyHub>) -> Self {
        Self::with_clock(store, notify, Arc::new(SystemClock))
    }

    /// Construct with an explicit clock. Generation windows and
    /// future-slot filters derive from it; tests pin it.
    pub fn with_clock(
        store: Arc<dyn SlotStore>,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, notify, clock }
    }

    /// Dispatch a closure lifecycle trigger. Create and update both run
    /// the full reconciliation; the distinction only matters to the
    /// validation preview.
    pub async fn handle_closure_trigger(
        &self,
        trigger: &ClosureTrigger,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = match trigger.action {
            TriggerAction::Create | TriggerAction::Update => {
                self.upsert_closures(&closure_keys(trigger)?).await
            }
            TriggerAction::Delete => self.delete_closures(&closure_keys(trigger)?).await,
        };
        record_trigger(trigger.action, started, result.is_ok());
        result
    }

    /// Dispatch a start-rule lifecycle trigger. Updates and deletes may
    /// carry id batches.
    pub async fn handle_start_rule_trigger(
        &self,
        trigger: &StartRuleTrigger,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.dispatch_start_rule(trigger).await;
        record_trigger(trigger.action, started, result.is_ok());
        result
    }

    async fn dispatch_start_rule(&self, trigger: &StartRuleTrigger) -> Result<(), EngineError> {
        for key in start_rule_keys(trigger)? {
            match trigger.action {
                TriggerAction::Create => self.initialize_new_start_rule(key).await?,
                TriggerAction::Update => self.update_start_rule(key).await?,
                TriggerAction::Delete => self.delete_start_rule(key).await?,
            }
        }
        Ok(())
    }
}

fn record_trigger(action: TriggerAction, started: Instant, ok: bool) {
    let label = observability::action_label(action);
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(observability::TRIGGERS_TOTAL, "action" => label, "status" => status)
        .increment(1);
    metrics::histogram!(observability::TRIGGER_DURATION_SECONDS, "action" => label)
        .record(started.elapsed().as_secs_f64());
}

/// `keys` wins over `key`; a trigger carrying neither is malformed.
fn closure_keys(trigger: &ClosureTrigger) -> Result<Vec<ClosureId>, EngineError> {
    if let Some(keys) = &trigger.keys {
        Ok(keys.clone())
    } else if let Some(key) = trigger.key {
        Ok(vec![key])
    } else {
        Err(EngineError::MissingKey("key or keys"))
    }
}

fn start_rule_keys(trigger: &StartRuleTrigger) -> Result<Vec<StartRuleId>, EngineError> {
    if let Some(keys) = &trigger.keys {
        Ok(keys.clone())
    } else if let Some(key) = trigger.key {
        Ok(vec![key])
    } else {
        Err(EngineError::MissingKey("key or keys"))
    }
}
