//! Trigger payloads: the outer system delivers rule lifecycle events as
//! small JSON messages naming an action, the affected keys, and an
//! optional partial payload. The engine dispatches on these in
//! [`crate::engine`].

use serde::{Deserialize, Serialize};

use crate::model::{ClosureId, ClosurePatch, StartRuleId, StartRulePatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerAction {
    Create,
    Update,
    Delete,
}

/// Closure lifecycle trigger. `key` carries a single id, `keys` a batch;
/// which one is required depends on the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureTrigger {
    pub action: TriggerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ClosureId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<ClosureId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ClosurePatch>,
}

/// Start-rule lifecycle trigger. Update and delete events arrive as id
/// batches in `keys`; `key` carries a single id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRuleTrigger {
    pub action: TriggerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<StartRuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<StartRuleId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StartRulePatch>,
}

/// Outcome of a validate action. `errors` block the change; `warnings`
/// describe slots the change would touch if applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}
