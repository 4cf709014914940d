use std::sync::Arc;

use shared::domain::{Message, Role};

use crate::error::{ChatError, ChatResult};

/// Append-only message log for one session view.
#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Overwrites the content of the reserved assistant slot at the tail.
    pub fn replace_last(&mut self, content: impl Into<String>) -> ChatResult<()> {
        let Some(last) = self.messages.last_mut() else {
            return Err(ChatError::InvalidState(
                "replace_last on an empty conversation".to_string(),
            ));
        };
        if last.role != Role::Assistant {
            return Err(ChatError::InvalidState(
                "replace_last requires a trailing assistant message".to_string(),
            ));
        }
        last.content = content.into();
        Ok(())
    }

    /// History seed; discards whatever the store held.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn snapshot(&self) -> Arc<[Message]> {
        Arc::from(self.messages.as_slice())
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_last_rejects_empty_store() {
        let mut store = ConversationStore::new();
        let err = store.replace_last("x").expect_err("empty store");
        assert!(matches!(err, ChatError::InvalidState(_)));
    }

    #[test]
    fn replace_last_rejects_trailing_user_message() {
        let mut store = ConversationStore::new();
        store.append(Message::user("hello"));
        let err = store.replace_last("x").expect_err("user tail");
        assert!(matches!(err, ChatError::InvalidState(_)));
        assert_eq!(store.snapshot()[0].content, "hello");
    }

    #[test]
    fn replace_last_only_touches_tail_content() {
        let mut store = ConversationStore::new();
        store.append(Message::user("hello"));
        store.append(Message::assistant(""));
        let before = store.snapshot();

        store.replace_last("hi").expect("replace");

        let after = store.snapshot();
        assert_eq!(after.len(), 2);
        assert_eq!(after[1].content, "hi");
        assert_eq!(after[1].timestamp, before[1].timestamp);
        assert_eq!(before[1].content, "", "snapshots are detached");
    }

    #[test]
    fn append_preserves_order() {
        let mut store = ConversationStore::new();
        assert_eq!(store.append(Message::user("a")), 0);
        assert_eq!(store.append(Message::assistant("b")), 1);
        assert_eq!(store.append(Message::user("c")), 2);
        let contents: Vec<_> = store
            .snapshot()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, ["a", "b", "c"]);
    }
}
