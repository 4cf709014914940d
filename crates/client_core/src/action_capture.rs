use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::domain::MilestoneId;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::{ChatError, ChatResult},
    events::SessionEvent,
    ChatService,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionAnnotation {
    pub target: MilestoneId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded(ActionAnnotation),
    /// A confirmation for this target is still on screen.
    AlreadyConfirmed,
}

#[derive(Default)]
struct CaptureState {
    pending: Option<MilestoneId>,
    confirmed: Option<MilestoneId>,
    in_flight: bool,
    // Bumped on every present(); stale submissions and clear timers compare against it.
    generation: u64,
    annotations: Vec<ActionAnnotation>,
    clear_task: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<CaptureState>) -> MutexGuard<'_, CaptureState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Clears the in-flight flag even when the submitting future is dropped.
struct InFlight<'a> {
    state: &'a Mutex<CaptureState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.state).in_flight = false;
    }
}

#[derive(Clone)]
pub struct ActionCapture {
    service: Arc<dyn ChatService>,
    display_delay: Duration,
    request_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
    state: Arc<Mutex<CaptureState>>,
}

impl ActionCapture {
    pub fn new(
        service: Arc<dyn ChatService>,
        display_delay: Duration,
        request_timeout: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            service,
            display_delay,
            request_timeout,
            events,
            state: Arc::new(Mutex::new(CaptureState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, CaptureState> {
        lock(&self.state)
    }

    /// Makes `target` the one pending milestone, dropping any earlier one.
    pub fn present(&self, target: MilestoneId) {
        let mut guard = self.state();
        if let Some(task) = guard.clear_task.take() {
            task.abort();
        }
        if let Some(previous) = guard.pending.replace(target) {
            if previous != target {
                debug!("action: pending milestone={} replaced by {}", previous, target);
            }
        }
        guard.confirmed = None;
        guard.generation += 1;
    }

    pub fn pending(&self) -> Option<MilestoneId> {
        self.state().pending
    }

    pub fn is_confirmation_visible(&self) -> bool {
        self.state().confirmed.is_some()
    }

    pub fn annotations(&self) -> Vec<ActionAnnotation> {
        self.state().annotations.clone()
    }

    pub async fn submit(&self, text: &str) -> ChatResult<SubmitOutcome> {
        let text = text.trim();
        let (target, generation) = {
            let mut guard = self.state();
            let Some(target) = guard.pending else {
                return Err(ChatError::Rejected("no milestone awaiting an action".into()));
            };
            if guard.confirmed == Some(target) {
                return Ok(SubmitOutcome::AlreadyConfirmed);
            }
            if text.is_empty() {
                return Err(ChatError::Rejected("action text is empty".into()));
            }
            if guard.in_flight {
                return Err(ChatError::Rejected(format!(
                    "an action for milestone {target} is already being submitted"
                )));
            }
            guard.in_flight = true;
            (target, guard.generation)
        };
        let in_flight = InFlight {
            state: self.state.as_ref(),
        };

        let ack = tokio::time::timeout(
            self.request_timeout,
            self.service.submit_action(target, text),
        )
        .await;
        drop(in_flight);

        let ack = match ack {
            Ok(Ok(ack)) => ack,
            Ok(Err(err)) => {
                warn!("action: submit failed milestone={} error={:#}", target, err);
                return Err(ChatError::transport(&err));
            }
            Err(_) => {
                warn!(
                    "action: submit timed out milestone={} after={}ms",
                    target,
                    self.request_timeout.as_millis()
                );
                return Err(ChatError::TransportFailure(format!(
                    "no reply within {}ms",
                    self.request_timeout.as_millis()
                )));
            }
        };

        let mut guard = self.state();

        let annotation = ActionAnnotation {
            target,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        guard.annotations.push(annotation.clone());
        info!("action: anchored milestone={} ack={}", target, ack.message);

        if guard.generation == generation {
            guard.confirmed = Some(target);
            if let Some(task) = guard.clear_task.take() {
                task.abort();
            }
            guard.clear_task = Some(self.spawn_clear(target, generation));
        }
        drop(guard);

        let _ = self
            .events
            .send(SessionEvent::ActionConfirmed(annotation.clone()));
        Ok(SubmitOutcome::Recorded(annotation))
    }

    fn spawn_clear(&self, target: MilestoneId, generation: u64) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let delay = self.display_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let cleared = {
                let mut guard = lock(&state);
                if guard.generation != generation {
                    false
                } else {
                    guard.pending = None;
                    guard.confirmed = None;
                    guard.clear_task = None;
                    true
                }
            };
            if cleared {
                let _ = events.send(SessionEvent::ActionCleared(target));
            }
        })
    }

    /// Drops any pending confirmation timer.
    pub fn shutdown(&self) {
        if let Some(task) = self.state().clear_task.take() {
            task.abort();
        }
    }
}
