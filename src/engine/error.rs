use ulid::Ulid;

use crate::store::StoreError;
use crate::trigger::TriggerAction;

#[derive(Debug)]
pub enum EngineError {
    NotFound(&'static str, Ulid),
    /// A slot with a team attached was targeted by a conflicting change.
    SlotOccupied {
        slot: Ulid,
        team: Ulid,
    },
    /// Validation failed; one message per failed check, in field order.
    RuleInvalid(Vec<String>),
    /// Persisted row has no cached recurrence rule and no way to rebuild one.
    MissingRule(Ulid),
    /// Trigger arrived without the key/keys its action requires.
    MissingKey(&'static str),
    UnsupportedAction(TriggerAction),
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::SlotOccupied { slot, team } => {
                write!(f, "slot {slot} is occupied by team {team}")
            }
            EngineError::RuleInvalid(errors) => {
                write!(f, "rule validation failed: {}", errors.join("; "))
            }
            EngineError::MissingRule(id) => {
                write!(f, "no recurrence rule cached for: {id}")
            }
            EngineError::MissingKey(field) => write!(f, "trigger is missing {field}"),
            EngineError::UnsupportedAction(action) => {
                write!(f, "unsupported trigger action: {action:?}")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
