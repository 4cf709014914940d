use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RevealCursor {
    text: Arc<str>,
    end: usize,
}

impl RevealCursor {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self {
            text: text.into(),
            end: 0,
        }
    }

    pub fn advance(&mut self) -> Option<&str> {
        let next = self.text[self.end..].chars().next()?;
        self.end += next.len_utf8();
        Some(&self.text[..self.end])
    }

    pub fn revealed(&self) -> &str {
        &self.text[..self.end]
    }

    pub fn is_finished(&self) -> bool {
        self.end >= self.text.len()
    }

    pub fn remaining_steps(&self) -> usize {
        self.text[self.end..].chars().count()
    }
}

pub struct RevealHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RevealHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the reveal either completed or was cancelled.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Empty text completes without any update.
pub fn reveal<U, C>(
    full_text: impl Into<Arc<str>>,
    step: Duration,
    mut on_update: U,
    on_complete: C,
) -> RevealHandle
where
    U: FnMut(&str) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut cursor = RevealCursor::new(full_text);

    let task = tokio::spawn(async move {
        while !cursor.is_finished() {
            if token.is_cancelled() {
                return;
            }
            if let Some(prefix) = cursor.advance() {
                on_update(prefix);
            }
            if cursor.is_finished() {
                break;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(step) => {}
            }
        }
        if !token.is_cancelled() {
            on_complete();
        }
    });

    RevealHandle { cancel, task }
}
