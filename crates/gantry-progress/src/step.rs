use std::fmt;

use serde::Serialize;

/// Pipeline step of a single file. Steps only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Downloading,
    Verifying,
    Extracting,
    Processing,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Downloading => "Downloading",
            Self::Verifying => "Verifying",
            Self::Extracting => "Extracting",
            Self::Processing => "Processing",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_move_to(self, next: Step) -> bool {
        match next {
            Step::Downloading => false,
            Step::Verifying => self == Step::Downloading,
            Step::Extracting => matches!(self, Step::Downloading | Step::Verifying),
            Step::Processing => self != Step::Processing,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{file}: cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub file: String,
    pub from: Step,
    pub to:   Step,
}
