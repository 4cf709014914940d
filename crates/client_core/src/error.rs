use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("remote call failed: {0}")]
    TransportFailure(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ChatError {
    pub fn transport(err: &anyhow::Error) -> Self {
        Self::TransportFailure(format!("{err:#}"))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
