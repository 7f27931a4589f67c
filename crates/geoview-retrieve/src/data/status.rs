use std::fmt;

/// Pipeline stage of a single retrieval attempt.
///
/// Attempts progress through these stages in order:
/// NotStarted → Started → Connecting → Connected → Reading → {Success | Error | Interrupted}
///
/// The stage says where in the fetch an attempt is. Whether the attempt has been
/// asked to pause or cancel is tracked separately by the owning [`Retrieval`](crate::Retrieval).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RetrievalStatus {
    /// No job has run yet.
    #[default]
    NotStarted,

    /// A job has been picked up by a worker.
    Started,

    /// The retriever is establishing a connection.
    Connecting,

    /// A connection is established and the response is pending.
    Connected,

    /// Content is being read.
    Reading,

    /// The attempt completed with a successful result.
    Success,

    /// The attempt completed with an unsuccessful result.
    Error,

    /// The attempt stopped early because of a pause or cancel.
    Interrupted,
}

impl RetrievalStatus {
    /// Returns `true` for the three terminal stages.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Interrupted)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Started => 1,
            Self::Connecting => 2,
            Self::Connected => 3,
            Self::Reading => 4,
            Self::Success => 5,
            Self::Error => 6,
            Self::Interrupted => 7,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Started,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Reading,
            5 => Self::Success,
            6 => Self::Error,
            7 => Self::Interrupted,
            _ => Self::NotStarted,
        }
    }
}

impl fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "Not started"),
            Self::Started => write!(f, "Started"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reading => write!(f, "Reading"),
            Self::Success => write!(f, "Success"),
            Self::Error => write!(f, "Error"),
            Self::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Terminal classification of a finished retriever call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrieverStatus {
    /// The retriever ran to the end, successfully or not.
    Completed,
    /// The retriever stopped early and may be resumed by starting again.
    Paused,
    /// The retriever stopped early and was abandoned.
    Canceled,
}

/// Externally visible control state of a [`Retrieval`](crate::Retrieval).
///
/// Idle ⇄ Running → Paused → Running ... → Completed | Canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    /// No job has run yet.
    Idle,
    /// A job is scheduled or executing.
    Running,
    /// The last job ended with a paused outcome.
    Paused,
    /// The last job ran to completion.
    Completed,
    /// The last job was canceled.
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_stage_byte_decodes_as_not_started() {
        assert_eq!(RetrievalStatus::from_u8(200), RetrievalStatus::NotStarted);
    }

    #[test]
    fn test_stage_ordering_follows_pipeline() {
        assert!(RetrievalStatus::NotStarted < RetrievalStatus::Connecting);
        assert!(RetrievalStatus::Connecting < RetrievalStatus::Reading);
        assert!(RetrievalStatus::Reading < RetrievalStatus::Success);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(RetrievalStatus::Success.is_terminal());
        assert!(RetrievalStatus::Error.is_terminal());
        assert!(RetrievalStatus::Interrupted.is_terminal());
        assert!(!RetrievalStatus::Reading.is_terminal());
        assert!(!RetrievalStatus::NotStarted.is_terminal());
    }
}
