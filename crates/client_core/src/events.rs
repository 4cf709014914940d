use shared::domain::{Message, MilestoneId};

use crate::{action_capture::ActionAnnotation, session::TurnPhase};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    HistoryLoaded {
        count: usize,
    },
    MessageAppended {
        index: usize,
        message: Message,
    },
    /// The reserved assistant message at `index` now shows `content`.
    MessageRevealed {
        index: usize,
        content: String,
    },
    PhaseChanged(TurnPhase),
    PreambleStage {
        index: usize,
        name: String,
    },
    MilestoneReached(MilestoneId),
    ActionConfirmed(ActionAnnotation),
    ActionCleared(MilestoneId),
    TurnFailed(String),
}
