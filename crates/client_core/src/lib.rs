use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Message, MilestoneId, SessionId},
    protocol::ActionAck,
};

pub mod action_capture;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod preamble;
pub mod reveal;
pub mod session;
pub mod transport;
pub mod trigger;

pub use action_capture::{ActionAnnotation, ActionCapture, SubmitOutcome};
pub use conversation::ConversationStore;
pub use error::{ChatError, ChatResult};
pub use events::SessionEvent;
pub use preamble::{PreamblePlan, PreambleStage};
pub use session::{ChatSession, SessionConfig, TurnOutcome, TurnPhase};
pub use transport::HttpChatService;
pub use trigger::{TriggerCategory, TriggerDetector, TriggerEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub response: String,
    pub milestone_id: Option<MilestoneId>,
}

impl TurnReply {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            milestone_id: None,
        }
    }

    pub fn with_milestone(mut self, milestone_id: MilestoneId) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }
}

/// The remote reasoning service as seen by a session.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send_turn(&self, text: &str, session_id: &SessionId) -> Result<TurnReply>;
    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>>;
    async fn submit_action(&self, milestone_id: MilestoneId, text: &str) -> Result<ActionAck>;
}

pub struct MissingChatService;

#[async_trait]
impl ChatService for MissingChatService {
    async fn send_turn(&self, _text: &str, session_id: &SessionId) -> Result<TurnReply> {
        Err(anyhow!("chat service unavailable for session {session_id}"))
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        Err(anyhow!("chat service unavailable for session {session_id}"))
    }

    async fn submit_action(&self, milestone_id: MilestoneId, _text: &str) -> Result<ActionAck> {
        Err(anyhow!(
            "chat service unavailable for milestone {}",
            milestone_id.0
        ))
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod transport_tests;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/action_capture_tests.rs"]
mod action_capture_tests;
