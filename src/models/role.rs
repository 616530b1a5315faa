use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Which half of the pipeline this process runs.
///
/// `Producer` owns the user records and publishes notifications, `Consumer`
/// drains the queue and sends mail, `Combined` does both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Producer,
    Consumer,
    #[default]
    Combined,
}

impl ServiceRole {
    pub fn owns_records(&self) -> bool {
        matches!(self, ServiceRole::Producer | ServiceRole::Combined)
    }

    pub fn sends_mail(&self) -> bool {
        matches!(self, ServiceRole::Consumer | ServiceRole::Combined)
    }
}

impl Display for ServiceRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ServiceRole::Producer => write!(f, "producer"),
            ServiceRole::Consumer => write!(f, "consumer"),
            ServiceRole::Combined => write!(f, "combined"),
        }
    }
}
