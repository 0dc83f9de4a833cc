use serde::{Deserialize, Serialize};

/// The outcome of a user-facing command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    /// Indicates whether the action was successful.
    pub is_successful: bool,
    /// Optional message sent back by the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionStatus {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            is_successful: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            message: Some(message.into()),
        }
    }
}
