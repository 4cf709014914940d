use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use shared::domain::{Message, MilestoneId, SessionId};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    action_capture::ActionCapture,
    config::FALLBACK_MESSAGE,
    conversation::ConversationStore,
    error::{ChatError, ChatResult},
    events::SessionEvent,
    preamble::{run_preamble, PreambleOutcome, PreamblePlan},
    reveal::{reveal, RevealHandle},
    trigger::{TriggerDetector, TriggerEvent},
    ChatService, TurnReply,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingResponse,
    /// Triggered turns only; the service has not been called yet.
    Preamble,
    Revealing,
}

impl TurnPhase {
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, Self::AwaitingResponse | Self::Preamble)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reveal_step: Duration,
    pub preamble: PreamblePlan,
    pub confirmation_display: Duration,
    pub request_timeout: Duration,
    pub fallback_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reveal_step: Duration::from_millis(30),
            preamble: PreamblePlan::dream_weaver(Duration::from_secs(5)),
            confirmation_display: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            fallback_message: FALLBACK_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Ignored,
    Revealing { milestone: Option<MilestoneId> },
    /// Fallback message appended; the session is `Idle`.
    Failed(ChatError),
    Cancelled,
}

#[derive(Default)]
struct SessionState {
    store: ConversationStore,
    input: String,
    phase: TurnPhase,
    reveal: Option<RevealHandle>,
}

pub struct ChatSession {
    session_id: SessionId,
    service: Arc<dyn ChatService>,
    detector: TriggerDetector,
    config: SessionConfig,
    inner: Mutex<SessionState>,
    phase_tx: watch::Sender<TurnPhase>,
    events: broadcast::Sender<SessionEvent>,
    action_capture: ActionCapture,
    shutdown: CancellationToken,
}

impl ChatSession {
    pub fn new(
        session_id: SessionId,
        service: Arc<dyn ChatService>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::new_with_detector(session_id, service, config, TriggerDetector::default())
    }

    pub fn new_with_detector(
        session_id: SessionId,
        service: Arc<dyn ChatService>,
        config: SessionConfig,
        detector: TriggerDetector,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let (phase_tx, _) = watch::channel(TurnPhase::Idle);
        let action_capture = ActionCapture::new(
            Arc::clone(&service),
            config.confirmation_display,
            config.request_timeout,
            events.clone(),
        );
        Arc::new(Self {
            session_id,
            service,
            detector,
            config,
            inner: Mutex::new(SessionState::default()),
            phase_tx,
            events,
            action_capture,
            shutdown: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut SessionState, phase: TurnPhase) {
        if state.phase == phase {
            return;
        }
        debug!("session: phase {:?} -> {:?} session={}", state.phase, phase, self.session_id);
        state.phase = phase;
        self.phase_tx.send_replace(phase);
        self.emit(SessionEvent::PhaseChanged(phase));
    }

    fn append(&self, state: &mut SessionState, message: Message) -> usize {
        let index = state.store.append(message.clone());
        self.emit(SessionEvent::MessageAppended { index, message });
        index
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn phase(&self) -> TurnPhase {
        self.state().phase
    }

    pub fn snapshot(&self) -> Arc<[Message]> {
        self.state().store.snapshot()
    }

    pub fn input(&self) -> String {
        self.state().input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.state().input = text.into();
    }

    pub fn action_capture(&self) -> &ActionCapture {
        &self.action_capture
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<TurnPhase> {
        self.phase_tx.subscribe()
    }

    pub async fn wait_until_idle(&self) {
        let mut phase = self.phase_tx.subscribe();
        let _ = phase.wait_for(|phase| *phase == TurnPhase::Idle).await;
    }

    pub async fn load_history(&self) -> ChatResult<usize> {
        if self.phase() != TurnPhase::Idle {
            return Err(ChatError::InvalidState(
                "history can only be loaded while idle".to_string(),
            ));
        }
        let messages = self
            .service
            .fetch_history(&self.session_id)
            .await
            .map_err(|err| ChatError::transport(&err))?;

        let mut state = self.state();
        if state.phase != TurnPhase::Idle {
            return Err(ChatError::InvalidState(
                "a turn started while history was loading".to_string(),
            ));
        }
        let count = messages.len();
        state.store.replace_all(messages);
        drop(state);

        info!("session: history loaded count={} session={}", count, self.session_id);
        self.emit(SessionEvent::HistoryLoaded { count });
        Ok(count)
    }

    pub async fn send(self: &Arc<Self>, text: impl Into<String>) -> TurnOutcome {
        self.set_input(text);
        self.submit_turn().await
    }

    pub async fn submit_turn(self: &Arc<Self>) -> TurnOutcome {
        let raw = {
            let mut state = self.state();
            if self.shutdown.is_cancelled()
                || state.phase != TurnPhase::Idle
                || state.input.trim().is_empty()
            {
                debug!(
                    "session: turn ignored phase={:?} session={}",
                    state.phase, self.session_id
                );
                return TurnOutcome::Ignored;
            }
            let raw = std::mem::take(&mut state.input);
            self.append(&mut state, Message::user(raw.clone()));
            self.set_phase(&mut state, TurnPhase::AwaitingResponse);
            raw
        };

        if let TriggerEvent::Fired { category, .. } = self.detector.classify(&raw) {
            info!("session: trigger fired category={} session={}", category, self.session_id);
            self.set_phase(&mut self.state(), TurnPhase::Preamble);
            let outcome = run_preamble(&self.config.preamble, &self.shutdown, |index, stage| {
                self.emit(SessionEvent::PreambleStage {
                    index,
                    name: stage.name.clone(),
                });
            })
            .await;
            if outcome == PreambleOutcome::Cancelled {
                return TurnOutcome::Cancelled;
            }
            self.set_phase(&mut self.state(), TurnPhase::AwaitingResponse);
        }

        let reply = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return TurnOutcome::Cancelled,
            reply = self.call_service(raw.trim()) => reply,
        };

        match reply {
            Ok(reply) => self.begin_reveal(reply),
            Err(err) => self.fail_turn(err),
        }
    }

    async fn call_service(&self, text: &str) -> ChatResult<TurnReply> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.service.send_turn(text, &self.session_id)).await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(ChatError::transport(&err)),
            Err(_) => Err(ChatError::TransportFailure(format!(
                "no reply within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn fail_turn(&self, err: ChatError) -> TurnOutcome {
        warn!("session: turn failed session={} error={}", self.session_id, err);
        let mut state = self.state();
        self.append(
            &mut state,
            Message::assistant(self.config.fallback_message.clone()),
        );
        self.set_phase(&mut state, TurnPhase::Idle);
        drop(state);
        self.emit(SessionEvent::TurnFailed(err.to_string()));
        TurnOutcome::Failed(err)
    }

    fn begin_reveal(self: &Arc<Self>, reply: TurnReply) -> TurnOutcome {
        if let Some(milestone) = reply.milestone_id {
            info!("session: milestone reached id={} session={}", milestone, self.session_id);
            self.action_capture.present(milestone);
            self.emit(SessionEvent::MilestoneReached(milestone));
        }

        let mut state = self.state();
        let index = self.append(&mut state, Message::assistant(String::new()));
        self.set_phase(&mut state, TurnPhase::Revealing);

        let on_update = {
            let session: Weak<Self> = Arc::downgrade(self);
            move |prefix: &str| {
                if let Some(session) = session.upgrade() {
                    session.apply_reveal(index, prefix);
                }
            }
        };
        let on_complete = {
            let session: Weak<Self> = Arc::downgrade(self);
            move || {
                if let Some(session) = session.upgrade() {
                    session.finish_reveal();
                }
            }
        };
        // The reveal task cannot touch the store before this guard drops.
        state.reveal = Some(reveal(
            reply.response,
            self.config.reveal_step,
            on_update,
            on_complete,
        ));

        TurnOutcome::Revealing {
            milestone: reply.milestone_id,
        }
    }

    fn apply_reveal(&self, index: usize, prefix: &str) {
        let mut state = self.state();
        // A reveal task blocked on the lock during shutdown must not write.
        if self.shutdown.is_cancelled() || state.reveal.is_none() {
            return;
        }
        if let Err(err) = state.store.replace_last(prefix) {
            error!("session: reveal write rejected session={} error={}", self.session_id, err);
            return;
        }
        drop(state);
        self.emit(SessionEvent::MessageRevealed {
            index,
            content: prefix.to_string(),
        });
    }

    fn finish_reveal(&self) {
        let mut state = self.state();
        if self.shutdown.is_cancelled() || state.reveal.take().is_none() {
            return;
        }
        self.set_phase(&mut state, TurnPhase::Idle);
    }

    /// A partially revealed message keeps the last prefix it received.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.action_capture.shutdown();
        let mut state = self.state();
        if let Some(handle) = state.reveal.take() {
            handle.cancel();
        }
        self.set_phase(&mut state, TurnPhase::Idle);
        info!("session: shut down session={}", self.session_id);
    }
}
