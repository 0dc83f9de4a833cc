use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// The operation a notification reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    WatchTokens,
    WatchRequests,
    Create,
    Rename,
    Delete,
    Transfer,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::WatchTokens => "fetch token list",
            Operation::WatchRequests => "fetch token requests",
            Operation::Create => "create token",
            Operation::Rename => "rename token",
            Operation::Delete => "delete token",
            Operation::Transfer => "transfer token",
        };
        f.write_str(s)
    }
}

/// A user-visible, non-fatal outcome signal (what the UI shows as a toast).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub operation: Operation,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn success(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            operation,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn error(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            operation,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NotificationLevel::Error
    }
}
