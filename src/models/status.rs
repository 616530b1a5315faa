use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Result of handling one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ack,
    Requeue,
    Reject,
}

/// What the producer did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Published,
    Failed(String),
}

impl NotifyOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, NotifyOutcome::Published)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    NotFound,
    Sent,
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Outcome::Ack => write!(f, "ack"),
            Outcome::Requeue => write!(f, "requeue"),
            Outcome::Reject => write!(f, "reject"),
        }
    }
}
