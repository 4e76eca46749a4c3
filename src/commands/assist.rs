use crate::document::DocumentModel;
use crate::models::{Mode, ScreenPoint, SelectionRange, SessionSnapshot};
use crate::services::{AssistController, CommitOutcome, CompletionService, QuickAction};

pub fn trigger_assist<D, S>(
    controller: &AssistController<D, S>,
    mode: String,
) -> Result<SelectionRange, String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    let mode: Mode = mode.parse()?;
    controller.trigger(mode).map_err(|e| e.user_message())
}

pub fn set_assist_mode<D, S>(controller: &AssistController<D, S>, mode: String) -> Result<(), String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    let mode: Mode = mode.parse()?;
    controller.set_mode(mode).map_err(|e| e.user_message())
}

/// Starts the request; progress arrives as events. Returns the request id.
pub fn submit_prompt<D, S>(controller: &AssistController<D, S>, prompt: String) -> Result<String, String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    let handle = controller.submit(&prompt).map_err(|e| e.user_message())?;
    Ok(handle.request_id().to_string())
}

pub fn run_quick_action<D, S>(controller: &AssistController<D, S>, action: String) -> Result<String, String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    let action: QuickAction = action.parse()?;
    controller.trigger(action.mode()).map_err(|e| e.user_message())?;
    let handle = controller
        .submit(&action.prompt())
        .map_err(|e| e.user_message())?;
    Ok(handle.request_id().to_string())
}

pub fn cancel_assist<D, S>(controller: &AssistController<D, S>)
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    controller.cancel();
}

pub fn regenerate_output<D, S>(controller: &AssistController<D, S>) -> Result<String, String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    let handle = controller.regenerate().map_err(|e| e.user_message())?;
    Ok(handle.request_id().to_string())
}

pub fn insert_output<D, S>(controller: &AssistController<D, S>) -> Result<CommitOutcome, String>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    controller.insert().map_err(|e| e.user_message())
}

pub fn get_session<D, S>(controller: &AssistController<D, S>) -> SessionSnapshot
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    controller.snapshot()
}

pub fn get_assist_position<D, S>(controller: &AssistController<D, S>) -> Option<ScreenPoint>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    controller.recompute_position()
}
