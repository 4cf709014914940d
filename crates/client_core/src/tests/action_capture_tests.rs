use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{Message, MilestoneId, SessionId},
    protocol::ActionAck,
};
use tokio::sync::broadcast;

use crate::{ActionCapture, ChatError, ChatService, SessionEvent, SubmitOutcome, TurnReply};

#[derive(Default)]
struct RecordingService {
    submitted: Mutex<Vec<(MilestoneId, String)>>,
    fail_with: Option<String>,
    stall: AtomicBool,
}

#[async_trait]
impl ChatService for RecordingService {
    async fn send_turn(&self, _text: &str, _session_id: &SessionId) -> Result<TurnReply> {
        Err(anyhow!("not used"))
    }

    async fn fetch_history(&self, _session_id: &SessionId) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn submit_action(&self, milestone_id: MilestoneId, text: &str) -> Result<ActionAck> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        self.submitted
            .lock()
            .expect("submitted")
            .push((milestone_id, text.to_string()));
        Ok(ActionAck {
            message: "Action anchored successfully".to_string(),
        })
    }
}

const DISPLAY: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn capture(
    service: Arc<RecordingService>,
) -> (ActionCapture, broadcast::Receiver<SessionEvent>) {
    let (events, rx) = broadcast::channel(64);
    (ActionCapture::new(service, DISPLAY, REQUEST_TIMEOUT, events), rx)
}

#[tokio::test(start_paused = true)]
async fn submit_without_pending_target_is_rejected() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));

    let err = capture.submit("walk at dawn").await.expect_err("nothing pending");
    assert!(err.is_rejected());
    assert!(service.submitted.lock().expect("submitted").is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_text_is_rejected_and_target_stays_pending() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));
    capture.present(MilestoneId(7));

    let err = capture.submit("   ").await.expect_err("blank text");
    assert!(matches!(err, ChatError::Rejected(_)));
    assert_eq!(capture.pending(), Some(MilestoneId(7)));
    assert!(capture.annotations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn newer_milestone_replaces_pending_target() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));

    capture.present(MilestoneId(1));
    capture.present(MilestoneId(2));
    assert_eq!(capture.pending(), Some(MilestoneId(2)));

    capture.submit("journal tonight").await.expect("submit");
    assert_eq!(
        service.submitted.lock().expect("submitted").clone(),
        [(MilestoneId(2), "journal tonight".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn confirmation_clears_target_after_display_delay() {
    let service = Arc::new(RecordingService::default());
    let (capture, mut rx) = capture(Arc::clone(&service));
    capture.present(MilestoneId(9));

    let outcome = capture.submit("  call my sister  ").await.expect("submit");
    let SubmitOutcome::Recorded(annotation) = outcome else {
        panic!("expected a recorded annotation");
    };
    assert_eq!(annotation.text, "call my sister");
    assert!(capture.is_confirmation_visible());
    assert_eq!(capture.pending(), Some(MilestoneId(9)));

    tokio::time::sleep(DISPLAY + Duration::from_millis(10)).await;

    assert!(!capture.is_confirmation_visible());
    assert_eq!(capture.pending(), None);
    assert!(matches!(
        rx.try_recv().expect("confirmed"),
        SessionEvent::ActionConfirmed(_)
    ));
    assert!(matches!(
        rx.try_recv().expect("cleared"),
        SessionEvent::ActionCleared(MilestoneId(9))
    ));
}

#[tokio::test(start_paused = true)]
async fn resubmitting_while_confirmed_is_a_no_op() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));
    capture.present(MilestoneId(3));

    capture.submit("rest more").await.expect("first submit");
    let second = capture.submit("rest more").await.expect("second submit");

    assert_eq!(second, SubmitOutcome::AlreadyConfirmed);
    assert_eq!(capture.annotations().len(), 1);
    assert_eq!(service.submitted.lock().expect("submitted").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn each_milestone_occurrence_gets_its_own_annotation() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));

    capture.present(MilestoneId(5));
    capture.submit("first step").await.expect("submit");
    tokio::time::sleep(DISPLAY * 2).await;

    capture.present(MilestoneId(5));
    capture.submit("second step").await.expect("submit");

    let annotations = capture.annotations();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0].text, "first step");
    assert_eq!(annotations[1].text, "second step");
    assert!(annotations.iter().all(|a| a.target == MilestoneId(5)));
}

#[tokio::test(start_paused = true)]
async fn new_milestone_during_confirmation_survives_old_timer() {
    let service = Arc::new(RecordingService::default());
    let (capture, _rx) = capture(Arc::clone(&service));

    capture.present(MilestoneId(10));
    capture.submit("breathe").await.expect("submit");
    capture.present(MilestoneId(11));
    tokio::time::sleep(DISPLAY * 2).await;

    assert_eq!(capture.pending(), Some(MilestoneId(11)));
    assert!(!capture.is_confirmation_visible());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_keeps_target_pending() {
    let service = Arc::new(RecordingService {
        fail_with: Some("connection refused".to_string()),
        ..RecordingService::default()
    });
    let (capture, _rx) = capture(Arc::clone(&service));
    capture.present(MilestoneId(4));

    let err = capture.submit("go outside").await.expect_err("transport");
    assert!(matches!(err, ChatError::TransportFailure(_)));
    assert_eq!(capture.pending(), Some(MilestoneId(4)));
    assert!(capture.annotations().is_empty());
    assert!(!capture.is_confirmation_visible());
}

#[tokio::test(start_paused = true)]
async fn dropped_submission_does_not_block_the_next_milestone() {
    let service = Arc::new(RecordingService::default());
    service.stall.store(true, Ordering::SeqCst);
    let (capture, _rx) = capture(Arc::clone(&service));

    capture.present(MilestoneId(1));
    let abandoned = tokio::time::timeout(Duration::from_secs(5), capture.submit("walk")).await;
    assert!(abandoned.is_err(), "submission should still be waiting");

    service.stall.store(false, Ordering::SeqCst);
    capture.present(MilestoneId(2));
    let outcome = tokio::time::timeout(Duration::from_secs(5), capture.submit("run"))
        .await
        .expect("submit finishes")
        .expect("submit accepted");

    assert!(matches!(outcome, SubmitOutcome::Recorded(ref a) if a.target == MilestoneId(2)));
    assert_eq!(
        service.submitted.lock().expect("submitted").clone(),
        [(MilestoneId(2), "run".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_submission_times_out_and_keeps_target() {
    let service = Arc::new(RecordingService::default());
    service.stall.store(true, Ordering::SeqCst);
    let (capture, _rx) = capture(Arc::clone(&service));
    capture.present(MilestoneId(6));

    let err = capture.submit("stretch").await.expect_err("timeout");
    assert!(matches!(err, ChatError::TransportFailure(_)));
    assert_eq!(capture.pending(), Some(MilestoneId(6)));

    service.stall.store(false, Ordering::SeqCst);
    capture.submit("stretch").await.expect("retry after timeout");
    assert_eq!(capture.annotations().len(), 1);
}
