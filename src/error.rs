// Error taxonomy shared by the planner core and the store.
//
// Four kinds, kept separate on purpose:
// - Config: bad service configuration, rejected at construction
// - Validation: bad input to a specific call
// - Unsupported: a feature placeholder (MONTH/YEAR math etc.),
//   NOT the same thing as bad input
// - Storage: collaborator / persistence failures

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not supported yet: {0}")]
    Unsupported(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PlannerError {
    pub fn config(msg: impl Into<String>) -> Self {
        PlannerError::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PlannerError::Validation(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        PlannerError::Unsupported(msg.into())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, PlannerError::Unsupported(_))
    }
}

impl From<io::Error> for PlannerError {
    fn from(e: io::Error) -> Self {
        PlannerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(e: serde_json::Error) -> Self {
        PlannerError::Storage(e.to_string())
    }
}
