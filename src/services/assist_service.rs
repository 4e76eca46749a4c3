//! The AI editing interaction loop.
//!
//! One [`AssistController`] serves one editor instance. It freezes the
//! target range, dispatches a request to the completion service, folds the
//! streamed response into the session buffer, and commits the normalized
//! result back into the document.
//!
//! Every dispatched request captures the controller's epoch. Stream chunks
//! and image results are applied only while the live epoch still matches;
//! `cancel`, `regenerate`, `trigger` and `insert` advance it, so anything a
//! superseded request delivers afterwards is dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::committer::{self, CommitOutcome};
use super::completion::CompletionService;
use super::reconciler::StreamReconciler;
use super::sanitizer;
use super::selection_tracker::SelectionTracker;
use crate::document::{DocumentEvent, DocumentModel, SharedDocument};
use crate::error::{AssistError, ErrorCategory, Result};
use crate::models::{
    CompletionRequest, Mode, PromptSession, ScreenPoint, SelectionRange, SessionSnapshot,
    SessionStatus, Viewport,
};

const EVENT_CAPACITY: usize = 256;

/// Notifications for the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistEvent {
    StatusChanged { status: SessionStatus },
    /// Full buffer after a completed-line flush.
    OutputUpdated { output: String },
    Failed { message: String, category: ErrorCategory },
    Committed { outcome: CommitOutcome },
    Cancelled,
}

/// How a dispatched request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Completed,
    Failed(AssistError),
    /// Superseded or cancelled; nothing it produced was applied.
    Cancelled,
}

/// Returned by `submit`/`regenerate` to await the background request.
#[derive(Debug)]
pub struct RequestHandle {
    request_id: Uuid,
    task: JoinHandle<RequestOutcome>,
}

impl RequestHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub async fn wait(self) -> RequestOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => RequestOutcome::Failed(AssistError::invalid_state(format!(
                "request task ended abnormally: {}",
                e
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct LastRequest {
    range: SelectionRange,
    covered: String,
    prompt: String,
    mode: Mode,
}

#[derive(Debug, Default)]
struct ControllerState {
    tracker: SelectionTracker,
    session: PromptSession,
    reconciler: StreamReconciler,
    epoch: u64,
    last_request: Option<LastRequest>,
    viewport: Viewport,
}

impl ControllerState {
    fn in_progress(&self) -> bool {
        matches!(
            self.session.status,
            SessionStatus::Collecting | SessionStatus::Streaming
        )
    }
}

struct Inner<S> {
    service: S,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<AssistEvent>,
}

impl<S> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: AssistEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_status(&self, status: SessionStatus) {
        self.emit(AssistEvent::StatusChanged { status });
    }

    fn fail(&self, state: &mut ControllerState, err: &AssistError) {
        tracing::warn!(
            request_id = ?state.session.request_id,
            category = err.category().as_str(),
            retryable = err.is_retryable(),
            error = %err,
            "assist request failed"
        );
        state.session.fail(err.to_session_error());
        self.emit(AssistEvent::Failed {
            message: err.user_message(),
            category: err.category(),
        });
        self.emit_status(SessionStatus::Resolved);
    }
}

/// A panic elsewhere must not lock the user out of their document.
pub(crate) fn lock_document<D>(document: &SharedDocument<D>) -> MutexGuard<'_, D> {
    document.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Markdown line referencing a generated image.
pub fn image_markup(prompt: &str, url: &str) -> String {
    let alt: String = prompt
        .chars()
        .map(|c| if matches!(c, '[' | ']' | '\n' | '\r') { ' ' } else { c })
        .collect();
    format!("![{}]({})", alt.trim(), url)
}

/// Where output lands: the frozen range when rewriting, otherwise a point
/// after it so generated content never overwrites the user's text.
fn insertion_target(mode: Mode, range: SelectionRange) -> SelectionRange {
    match mode {
        Mode::Transform => range,
        Mode::Generate | Mode::Image => SelectionRange::cursor(range.to),
    }
}

pub struct AssistController<D, S> {
    inner: Arc<Inner<S>>,
    document: SharedDocument<D>,
}

impl<D, S> Clone for AssistController<D, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            document: Arc::clone(&self.document),
        }
    }
}

impl<D, S> AssistController<D, S>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    pub fn new(document: SharedDocument<D>, service: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                service,
                state: Mutex::new(ControllerState::default()),
                events,
            }),
            document,
        }
    }

    pub fn document(&self) -> &SharedDocument<D> {
        &self.document
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssistEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot::from_session(&state.session, state.tracker.frozen())
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.inner.lock().viewport = viewport;
    }

    /// Freeze the live selection and open a prompt for `mode`.
    pub fn trigger(&self, mode: Mode) -> Result<SelectionRange> {
        let mut state = self.inner.lock();
        if state.session.is_loading {
            return Err(AssistError::invalid_state(
                "an AI request is already in progress",
            ));
        }

        let mut document = lock_document(&self.document);
        let range = state.tracker.freeze(&mut *document)?;
        if mode.needs_selection() && range.is_cursor() {
            state.tracker.release(&mut *document);
            return Err(AssistError::invalid_state(
                "select some text to transform first",
            ));
        }
        drop(document);

        state.epoch += 1;
        state.reconciler = StreamReconciler::new();
        state.session.reset();
        state.last_request = None;
        state.session.mode = mode;
        state.session.status = SessionStatus::Collecting;
        tracing::info!(from = range.from, to = range.to, mode = mode.wire_tag(), "assist triggered");
        self.inner.emit_status(SessionStatus::Collecting);
        Ok(range)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut state = self.inner.lock();
        if state.session.is_loading {
            return Err(AssistError::invalid_state(
                "mode cannot change while a request is in flight",
            ));
        }
        if mode.needs_selection() && state.tracker.frozen().map_or(true, |r| r.is_cursor()) {
            return Err(AssistError::invalid_state(
                "transform needs a non-empty selection",
            ));
        }
        state.session.mode = mode;
        Ok(())
    }

    /// Send `prompt` for the frozen range and stream the response in the background.
    pub fn submit(&self, prompt: &str) -> Result<RequestHandle> {
        let mut state = self.inner.lock();
        if state.session.is_loading {
            return Err(AssistError::invalid_state(
                "an AI request is already in progress",
            ));
        }
        if prompt.trim().is_empty() {
            return Err(AssistError::EmptyPrompt);
        }
        let range = state
            .tracker
            .frozen()
            .ok_or_else(|| AssistError::invalid_state("no selection has been captured"))?;
        let mode = state.session.mode;
        Ok(self.dispatch(&mut state, range, prompt.trim().to_string(), mode))
    }

    /// Re-run the last request against the same range, discarding prior output.
    /// A request still streaming is superseded.
    pub fn regenerate(&self) -> Result<RequestHandle> {
        let mut state = self.inner.lock();
        let last = state.last_request.clone().ok_or(AssistError::NoPriorRequest)?;

        {
            let mut document = lock_document(&self.document);
            state.tracker.restore(&mut *document, last.range, last.covered.clone());
        }
        state.reconciler.cancel();
        state.session.mode = last.mode;
        tracing::info!(mode = last.mode.wire_tag(), "regenerating");
        Ok(self.dispatch(&mut state, last.range, last.prompt, last.mode))
    }

    fn dispatch(
        &self,
        state: &mut ControllerState,
        range: SelectionRange,
        prompt: String,
        mode: Mode,
    ) -> RequestHandle {
        let covered = state.tracker.covered().to_string();
        let selected_text = match mode {
            Mode::Transform => Some(covered.clone()),
            Mode::Generate | Mode::Image => None,
        };
        let request = CompletionRequest {
            selected_text,
            prompt: prompt.clone(),
            mode,
        };

        state.epoch += 1;
        let epoch = state.epoch;
        state.reconciler = StreamReconciler::new();
        let request_id = state.session.begin_request(&prompt);
        state.last_request = Some(LastRequest {
            range,
            covered,
            prompt,
            mode,
        });

        tracing::info!(%request_id, epoch, mode = mode.wire_tag(), "dispatching assist request");
        self.inner.emit_status(SessionStatus::Streaming);
        self.inner.emit(AssistEvent::OutputUpdated {
            output: String::new(),
        });

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            match request.mode {
                Mode::Image => run_image(inner, request, epoch).await,
                Mode::Transform | Mode::Generate => run_stream(inner, request, epoch).await,
            }
        });
        RequestHandle { request_id, task }
    }

    /// Abort the interaction. Results of an in-flight request are discarded.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        state.epoch += 1;
        state.reconciler.cancel();
        let was_active = state.session.status != SessionStatus::Idle;
        state.session.reset();
        state.tracker.release(&mut *lock_document(&self.document));

        if was_active {
            tracing::info!(epoch = state.epoch, "assist cancelled");
            self.inner.emit(AssistEvent::Cancelled);
            self.inner.emit_status(SessionStatus::Idle);
        }
    }

    /// Commit the resolved output into the document.
    pub fn insert(&self) -> Result<CommitOutcome> {
        let mut state = self.inner.lock();
        if state.session.status != SessionStatus::Resolved {
            return Err(AssistError::invalid_state("there is no finished output to insert"));
        }
        let range = state
            .tracker
            .frozen()
            .ok_or_else(|| AssistError::invalid_state("no selection has been captured"))?;

        let content = sanitizer::normalize(&state.session.output_buffer);
        if content.is_empty() {
            return Err(AssistError::invalid_state("the output is empty"));
        }
        let target = insertion_target(state.session.mode, range);
        let mut document = lock_document(&self.document);
        let covered = state.tracker.covered();
        let outcome = match committer::commit(&mut *document, range, covered, target, &content) {
            Ok(outcome) => outcome,
            Err(err) => {
                drop(document);
                // Output stays in the preview for manual copy.
                self.inner.emit(AssistEvent::Failed {
                    message: err.user_message(),
                    category: err.category(),
                });
                return Err(err);
            }
        };

        state.tracker.release(&mut *document);
        drop(document);
        state.epoch += 1;
        state.session.reset();
        state.last_request = None;

        if let Some(warning) = outcome.warning() {
            tracing::warn!(warning, "output inserted without formatting");
        }
        self.inner.emit(AssistEvent::Committed {
            outcome: outcome.clone(),
        });
        self.inner.emit_status(SessionStatus::Idle);
        Ok(outcome)
    }

    /// Screen anchor for the floating prompt UI.
    pub fn recompute_position(&self) -> Option<ScreenPoint> {
        let state = self.inner.lock();
        let range = state.tracker.frozen()?;
        let document = lock_document(&self.document);
        Some(SelectionTracker::recompute_position(
            &*document,
            range,
            &state.viewport,
        ))
    }

    /// Returns `true` if the event cancelled the interaction.
    pub fn on_document_event(&self, event: &DocumentEvent) -> bool {
        match event {
            DocumentEvent::SelectionChanged(live) => {
                let invalidated = {
                    let state = self.inner.lock();
                    state.in_progress() && state.tracker.is_invalidated_by(*live)
                };
                if invalidated {
                    tracing::debug!("live selection collapsed, cancelling");
                    self.cancel();
                }
                invalidated
            }
            DocumentEvent::ContentChanged { version } => {
                tracing::trace!(version, "document changed");
                false
            }
        }
    }

    /// Forward the document's notifications into [`Self::on_document_event`].
    pub fn watch_document(&self) -> JoinHandle<()> {
        let mut events: mpsc::UnboundedReceiver<DocumentEvent> =
            lock_document(&self.document).subscribe();
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.on_document_event(&event);
            }
        })
    }
}

async fn run_stream<S: CompletionService>(
    inner: Arc<Inner<S>>,
    request: CompletionRequest,
    epoch: u64,
) -> RequestOutcome {
    let opened = inner.service.stream(&request).await;
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            let mut state = inner.lock();
            if state.epoch != epoch {
                return RequestOutcome::Cancelled;
            }
            inner.fail(&mut state, &err);
            return RequestOutcome::Failed(err);
        }
    };

    let mut received = 0usize;
    while let Some(item) = stream.next().await {
        let mut state = inner.lock();
        if state.epoch != epoch {
            tracing::debug!(epoch, "dropping chunk from superseded request");
            return RequestOutcome::Cancelled;
        }
        match item {
            Ok(chunk) => {
                received += chunk.len();
                if let Some(lines) = state.reconciler.push(&chunk) {
                    state.session.append_output(&lines);
                    inner.emit(AssistEvent::OutputUpdated {
                        output: state.session.output_buffer.clone(),
                    });
                }
            }
            Err(err) => {
                if let Some(rest) = state.reconciler.finish() {
                    state.session.append_output(&rest);
                }
                let err = match err {
                    AssistError::StreamInterrupted { message, .. } => AssistError::StreamInterrupted {
                        message,
                        partial: state.session.output_buffer.clone(),
                    },
                    other => other,
                };
                inner.emit(AssistEvent::OutputUpdated {
                    output: state.session.output_buffer.clone(),
                });
                inner.fail(&mut state, &err);
                return RequestOutcome::Failed(err);
            }
        }
    }

    let mut state = inner.lock();
    if state.epoch != epoch {
        return RequestOutcome::Cancelled;
    }
    if let Some(rest) = state.reconciler.finish() {
        state.session.append_output(&rest);
        inner.emit(AssistEvent::OutputUpdated {
            output: state.session.output_buffer.clone(),
        });
    }
    state.session.resolve();
    tracing::info!(
        request_id = ?state.session.request_id,
        bytes = received,
        "assist stream complete"
    );
    inner.emit_status(SessionStatus::Resolved);
    RequestOutcome::Completed
}

async fn run_image<S: CompletionService>(
    inner: Arc<Inner<S>>,
    request: CompletionRequest,
    epoch: u64,
) -> RequestOutcome {
    let result = inner.service.generate_image(&request).await;

    let mut state = inner.lock();
    if state.epoch != epoch {
        return RequestOutcome::Cancelled;
    }
    match result {
        Ok(image) => {
            tracing::info!(width = image.width, height = image.height, "image generated");
            let markup = image_markup(&request.prompt, &image.image_url);
            state.session.append_output(&markup);
            state.session.resolve();
            inner.emit(AssistEvent::OutputUpdated { output: markup });
            inner.emit_status(SessionStatus::Resolved);
            RequestOutcome::Completed
        }
        Err(err) => {
            inner.fail(&mut state, &err);
            RequestOutcome::Failed(err)
        }
    }
}
