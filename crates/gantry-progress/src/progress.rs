use serde::Serialize;

/// Progress of one file within its current step.
///
/// `current` and `finished` are absent together exactly when the value is
/// [`Progress::Indeterminate`]. A transfer with no declared length still
/// counts bytes as [`Progress::Unbounded`]; its total renders as unknown,
/// not as stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Progress {
    #[default]
    Indeterminate,
    Unbounded { current: u64 },
    Known { current: u64, total: u64 },
}

impl Progress {
    pub fn known(current: u64, total: u64) -> Self { Self::Known { current, total } }

    /// Build from an optional total, as reported by a transfer.
    pub fn counting(current: u64, total: Option<u64>) -> Self {
        match total {
            Some(total) => Self::Known { current, total },
            None => Self::Unbounded { current },
        }
    }

    pub fn current(&self) -> Option<u64> {
        match *self {
            Self::Indeterminate => None,
            Self::Unbounded { current } | Self::Known { current, .. } => Some(current),
        }
    }

    pub fn finished(&self) -> Option<u64> {
        match *self {
            Self::Known { total, .. } => Some(total),
            _ => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool { matches!(self, Self::Indeterminate) }

    /// Completion ratio in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match *self {
            Self::Known { total: 0, .. } => Some(1.0),
            Self::Known { current, total } => Some((current as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}
