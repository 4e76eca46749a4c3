use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use draftsmith_lib::document::{shared, DocumentEvent, DocumentModel, MemoryDocument};
use draftsmith_lib::error::{AssistError, ErrorCategory, Result};
use draftsmith_lib::models::{
    CompletionRequest, ImageResult, LiveSelection, Mode, SelectionRange, SessionStatus,
};
use draftsmith_lib::services::{
    AssistController, AssistEvent, ChunkStream, CommitOutcome, CompletionService, RequestOutcome,
};

type Chunks = mpsc::UnboundedSender<Result<String>>;

enum Script {
    Stream(mpsc::UnboundedReceiver<Result<String>>),
    Fail(AssistError),
}

#[derive(Default)]
struct ScriptState {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

/// Completion service whose responses are fed by the test.
#[derive(Clone, Default)]
struct ScriptedService {
    state: Arc<ScriptState>,
}

impl ScriptedService {
    fn push_stream(&self) -> Chunks {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.scripts.lock().unwrap().push_back(Script::Stream(rx));
        tx
    }

    fn push_failure(&self, err: AssistError) {
        self.state.scripts.lock().unwrap().push_back(Script::Fail(err));
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.state.requests.lock().unwrap().push(request.clone());
        match self.state.scripts.lock().unwrap().pop_front() {
            Some(Script::Stream(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Script::Fail(err)) => Err(err),
            None => Err(AssistError::service(None, "no scripted response")),
        }
    }

    async fn generate_image(&self, request: &CompletionRequest) -> Result<ImageResult> {
        self.state.requests.lock().unwrap().push(request.clone());
        Err(AssistError::service(Some(501), "images are not scripted"))
    }
}

type Controller = AssistController<MemoryDocument, ScriptedService>;

fn setup(text: &str, selected: Option<&str>) -> (Controller, ScriptedService) {
    let mut document = MemoryDocument::from_markdown(text);
    match selected.and_then(|s| document.find_text(s)) {
        Some(range) => document.set_selection(range.from, range.to),
        None => {
            let end = document.size();
            document.set_selection(end, end);
        }
    }
    let service = ScriptedService::default();
    (AssistController::new(shared(document), service.clone()), service)
}

fn document_text(controller: &Controller) -> String {
    controller.document().lock().unwrap().to_markdown()
}

fn drain(events: &mut broadcast::Receiver<AssistEvent>) -> Vec<AssistEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn outputs(events: &[AssistEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AssistEvent::OutputUpdated { output } => Some(output.clone()),
            _ => None,
        })
        .collect()
}

async fn next_matching(
    events: &mut broadcast::Receiver<AssistEvent>,
    wanted: impl Fn(&AssistEvent) -> bool,
) -> AssistEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn translate_replaces_selection() {
    let (controller, service) = setup("hello world", Some("hello world"));
    let mut events = controller.subscribe();

    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("translate to French").unwrap();
    chunks.send(Ok("Bonjour".into())).unwrap();
    chunks.send(Ok(" le monde".into())).unwrap();
    drop(chunks);

    assert_eq!(handle.wait().await, RequestOutcome::Completed);
    assert_eq!(controller.snapshot().output, "Bonjour le monde");
    assert_eq!(outputs(&drain(&mut events)), vec!["", "Bonjour le monde"]);

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].selected_text.as_deref(), Some("hello world"));
    assert_eq!(requests[0].mode, Mode::Transform);

    let outcome = controller.insert().unwrap();
    assert_eq!(
        outcome,
        CommitOutcome::Structured {
            range: SelectionRange::new(0, 11)
        }
    );
    assert_eq!(document_text(&controller), "Bonjour le monde");
    assert_eq!(controller.snapshot().status, SessionStatus::Idle);
}

#[tokio::test]
async fn generated_haiku_appears_line_by_line() {
    let (controller, service) = setup("", None);
    let mut events = controller.subscribe();

    let range = controller.trigger(Mode::Generate).unwrap();
    assert!(range.is_cursor());
    let chunks = service.push_stream();
    let handle = controller.submit("write a haiku").unwrap();
    assert_eq!(controller.document().lock().unwrap().size(), 0);

    for chunk in ["Line1\nLi", "ne2\n", "Line3"] {
        chunks.send(Ok(chunk.into())).unwrap();
    }
    drop(chunks);
    assert_eq!(handle.wait().await, RequestOutcome::Completed);

    assert_eq!(
        outputs(&drain(&mut events)),
        vec!["", "Line1\n", "Line1\nLine2\n", "Line1\nLine2\nLine3"]
    );
    assert_eq!(service.requests()[0].selected_text, None);
}

#[tokio::test]
async fn whitespace_prompt_is_refused_locally() {
    let (controller, service) = setup("hello world", Some("world"));
    controller.trigger(Mode::Transform).unwrap();

    assert_eq!(controller.submit("   ").unwrap_err(), AssistError::EmptyPrompt);
    assert!(service.requests().is_empty());
    assert_eq!(controller.snapshot().status, SessionStatus::Collecting);
}

#[tokio::test]
async fn cancel_discards_the_rest_of_the_stream() {
    let (controller, service) = setup("hello world", Some("hello"));
    let mut events = controller.subscribe();
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("shout").unwrap();

    chunks.send(Ok("HEL\n".into())).unwrap();
    next_matching(&mut events, |e| {
        matches!(e, AssistEvent::OutputUpdated { output } if output == "HEL\n")
    })
    .await;

    controller.cancel();
    chunks.send(Ok("LO\n".into())).unwrap();
    drop(chunks);

    assert_eq!(handle.wait().await, RequestOutcome::Cancelled);
    let after = drain(&mut events);
    assert_eq!(after.first(), Some(&AssistEvent::Cancelled));
    assert!(outputs(&after).is_empty());

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.output, "");
    assert!(matches!(controller.insert(), Err(AssistError::InvalidState(_))));
    assert_eq!(document_text(&controller), "hello world");
}

#[tokio::test]
async fn unauthorized_request_reports_authentication() {
    let (controller, service) = setup("hello world", Some("world"));
    let mut events = controller.subscribe();
    controller.trigger(Mode::Transform).unwrap();
    service.push_failure(AssistError::Authentication("invalid api key".into()));

    let outcome = controller.submit("translate").unwrap().wait().await;
    assert!(matches!(outcome, RequestOutcome::Failed(AssistError::Authentication(_))));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.output, "");
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.error.unwrap().category, "authentication");

    let failed = drain(&mut events)
        .into_iter()
        .find(|e| matches!(e, AssistEvent::Failed { .. }));
    assert!(matches!(
        failed,
        Some(AssistEvent::Failed {
            category: ErrorCategory::Authentication,
            ..
        })
    ));
}

#[tokio::test]
async fn regenerate_needs_a_prior_request() {
    let (controller, _service) = setup("hello", Some("hello"));
    assert_eq!(controller.regenerate().unwrap_err(), AssistError::NoPriorRequest);

    controller.trigger(Mode::Transform).unwrap();
    assert_eq!(controller.regenerate().unwrap_err(), AssistError::NoPriorRequest);
}

#[tokio::test]
async fn regenerate_reuses_range_and_prompt() {
    let (controller, service) = setup("keep this draft here", Some("this draft"));
    controller.trigger(Mode::Transform).unwrap();

    let first = service.push_stream();
    let handle = controller.submit("improve").unwrap();
    first.send(Ok("a better draft".into())).unwrap();
    drop(first);
    handle.wait().await;

    // The live cursor moving elsewhere does not change the target.
    controller.document().lock().unwrap().set_selection(0, 0);

    let second = service.push_stream();
    let handle = controller.regenerate().unwrap();
    assert_eq!(controller.snapshot().output, "");
    second.send(Ok("the best draft".into())).unwrap();
    drop(second);
    assert_eq!(handle.wait().await, RequestOutcome::Completed);

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(controller.snapshot().output, "the best draft");

    controller.insert().unwrap();
    assert_eq!(document_text(&controller), "keep the best draft here");
}

#[tokio::test]
async fn only_one_request_in_flight() {
    let (controller, service) = setup("hello world", Some("world"));
    let mut events = controller.subscribe();
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("first").unwrap();

    chunks.send(Ok("a\n".into())).unwrap();
    next_matching(&mut events, |e| {
        matches!(e, AssistEvent::OutputUpdated { output } if output == "a\n")
    })
    .await;

    assert!(matches!(controller.submit("second"), Err(AssistError::InvalidState(_))));
    assert!(matches!(controller.trigger(Mode::Generate), Err(AssistError::InvalidState(_))));
    assert!(matches!(controller.set_mode(Mode::Generate), Err(AssistError::InvalidState(_))));
    assert_eq!(controller.snapshot().output, "a\n");
    assert_eq!(controller.snapshot().prompt, "first");

    chunks.send(Ok("b".into())).unwrap();
    drop(chunks);
    assert_eq!(handle.wait().await, RequestOutcome::Completed);
    assert_eq!(controller.snapshot().output, "a\nb");
    assert_eq!(service.requests().len(), 1);
}

#[tokio::test]
async fn commit_is_a_single_document_change() {
    let mut document = MemoryDocument::from_markdown("say hello world now");
    let mut changes = document.subscribe();
    let range = document.find_text("hello world").unwrap();
    document.set_selection(range.from, range.to);
    let service = ScriptedService::default();
    let controller = AssistController::new(shared(document), service.clone());

    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("translate").unwrap();
    chunks.send(Ok("<p><strong>Bonjour</strong> &amp; salut</p>".into())).unwrap();
    drop(chunks);
    handle.wait().await;
    controller.insert().unwrap();

    assert_eq!(document_text(&controller), "say **Bonjour** & salut now");
    let content_changes = std::iter::from_fn(|| changes.try_recv().ok())
        .filter(|e| matches!(e, DocumentEvent::ContentChanged { .. }))
        .count();
    assert_eq!(content_changes, 1);
}

#[tokio::test]
async fn rejected_transaction_falls_back_to_plain_text() {
    let (controller, service) = setup("Intro. Old text.", Some("Old text."));
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("rewrite").unwrap();
    chunks.send(Ok("**New** text.".into())).unwrap();
    drop(chunks);
    handle.wait().await;

    {
        let mut document = controller.document().lock().unwrap();
        document.reject_transactions(true);
        document.set_selection(0, 0);
    }
    let outcome = controller.insert().unwrap();
    assert!(matches!(outcome, CommitOutcome::Degraded { at: 0, .. }));
    assert_eq!(document_text(&controller), "New text.Intro. Old text.");
    assert_eq!(controller.snapshot().status, SessionStatus::Idle);
}

#[tokio::test]
async fn failed_fallback_keeps_output_for_copying() {
    let (controller, service) = setup("Intro. Old text.", Some("Old text."));
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("rewrite").unwrap();
    chunks.send(Ok("New text.".into())).unwrap();
    drop(chunks);
    handle.wait().await;

    controller.document().lock().unwrap().set_read_only(true);
    assert!(matches!(controller.insert(), Err(AssistError::Insertion(_))));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.output, "New text.");
    assert_eq!(snapshot.status, SessionStatus::Resolved);
    assert_eq!(document_text(&controller), "Intro. Old text.");
}

#[tokio::test]
async fn document_shrinking_during_stream_degrades_safely() {
    let (controller, service) = setup("a long paragraph of text", Some("paragraph of text"));
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("shorten").unwrap();

    chunks.send(Ok("short\n".into())).unwrap();
    controller.document().lock().unwrap().clear();
    chunks.send(Ok("text".into())).unwrap();
    drop(chunks);
    assert_eq!(handle.wait().await, RequestOutcome::Completed);

    let outcome = controller.insert().unwrap();
    assert!(matches!(outcome, CommitOutcome::Degraded { at: 0, .. }));
    assert_eq!(document_text(&controller), "short\ntext");
}

#[tokio::test]
async fn typing_before_the_selection_keeps_user_edits() {
    let (controller, service) = setup("hello world", Some("world"));
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("translate").unwrap();

    controller
        .document()
        .lock()
        .unwrap()
        .insert_text(0, "big ")
        .unwrap();
    chunks.send(Ok("MONDE".into())).unwrap();
    drop(chunks);
    assert_eq!(handle.wait().await, RequestOutcome::Completed);

    let outcome = controller.insert().unwrap();
    assert!(matches!(outcome, CommitOutcome::Degraded { at: 4, .. }));
    assert!(outcome.warning().is_some());
    assert_eq!(document_text(&controller), "big MONDEhello world");
}

#[tokio::test]
async fn interrupted_stream_keeps_partial_output() {
    let (controller, service) = setup("hello world", Some("world"));
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("expand").unwrap();

    chunks.send(Ok("first line\nsec".into())).unwrap();
    chunks
        .send(Err(AssistError::StreamInterrupted {
            message: "connection reset".into(),
            partial: String::new(),
        }))
        .unwrap();

    match handle.wait().await {
        RequestOutcome::Failed(AssistError::StreamInterrupted { partial, .. }) => {
            assert_eq!(partial, "first line\nsec");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(controller.snapshot().output, "first line\nsec");
    assert_eq!(document_text(&controller), "hello world");
}

#[tokio::test]
async fn collapsing_the_live_selection_cancels() {
    let (controller, service) = setup("hello world", Some("hello"));
    let mut events = controller.subscribe();
    let watcher = controller.watch_document();
    controller.trigger(Mode::Transform).unwrap();
    let chunks = service.push_stream();
    let handle = controller.submit("translate").unwrap();

    controller.document().lock().unwrap().set_selection(3, 3);
    next_matching(&mut events, |e| matches!(e, AssistEvent::Cancelled)).await;

    chunks.send(Ok("late\n".into())).unwrap();
    drop(chunks);
    assert_eq!(handle.wait().await, RequestOutcome::Cancelled);
    assert_eq!(controller.snapshot().range, None);
    watcher.abort();
}

#[tokio::test]
async fn moving_the_cursor_keeps_a_generate_session() {
    let (controller, _service) = setup("hello", None);
    controller.trigger(Mode::Generate).unwrap();
    let cancelled = controller.on_document_event(&DocumentEvent::SelectionChanged(
        LiveSelection::new(1, 1),
    ));
    assert!(!cancelled);
    assert_eq!(controller.snapshot().status, SessionStatus::Collecting);
}
