use std::fmt;

use serde::Serialize;

/// Lifecycle of an [`InstallSession`](crate::InstallSession).
///
/// The happy path is strictly linear; `Failed` and `Canceled` are reachable
/// from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Resolving,
    Fetching,
    Assembling,
    Extracting,
    Finalizing,
    Completed,
    Failed,
    Canceled,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Assembling => "assembling",
            Self::Extracting => "extracting",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Completed | Self::Failed | Self::Canceled) }

    /// The next state on the happy path.
    pub fn successor(&self) -> Option<Self> {
        Some(match self {
            Self::Pending => Self::Resolving,
            Self::Resolving => Self::Fetching,
            Self::Fetching => Self::Assembling,
            Self::Assembling => Self::Extracting,
            Self::Extracting => Self::Finalizing,
            Self::Finalizing => Self::Completed,
            Self::Completed | Self::Failed | Self::Canceled => return None,
        })
    }

    pub fn can_move_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(next, Self::Failed | Self::Canceled) || self.successor() == Some(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}
