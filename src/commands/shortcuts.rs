//! Keyboard shortcuts reach the assist controller through an injected
//! channel instead of a hook stored on the document.

use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::document::DocumentModel;
use crate::error::{AssistError, Result};
use crate::models::Mode;
use crate::services::assist_service::lock_document;
use crate::services::{AssistController, CompletionService, QuickAction};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistCommand {
    /// Open the prompt. `None` picks transform for a selection, generate for a cursor.
    Open { mode: Option<Mode> },
    Submit(String),
    Quick(QuickAction),
    Cancel,
    Regenerate,
    Insert,
}

/// Modifier keys required by a chord.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub modifiers: Modifiers,
    /// Lowercased key name, e.g. `k`, `enter`, `escape`.
    pub key: String,
}

impl FromStr for KeyChord {
    type Err = String;

    /// Parses `Ctrl+Shift+K` style chords; case-insensitive.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut modifiers = Modifiers::default();
        let mut key = None;
        for part in s.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "alt" | "option" => modifiers.alt = true,
                "meta" | "cmd" | "super" => modifiers.meta = true,
                "" => return Err(format!("Empty key in chord '{}'", s)),
                other => {
                    if key.replace(other.to_string()).is_some() {
                        return Err(format!("Chord '{}' names more than one key", s));
                    }
                }
            }
        }
        let key = key.ok_or_else(|| format!("Chord '{}' has no key", s))?;
        let key = match key.as_str() {
            "esc" => "escape".to_string(),
            "return" => "enter".to_string(),
            _ => key,
        };
        Ok(KeyChord { modifiers, key })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (on, name) in [(m.ctrl, "Ctrl"), (m.shift, "Shift"), (m.alt, "Alt"), (m.meta, "Meta")] {
            if on {
                write!(f, "{}+", name)?;
            }
        }
        write!(f, "{}", self.key)
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub chord: KeyChord,
    pub command: AssistCommand,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct ShortcutMap {
    bindings: Vec<Binding>,
}

impl ShortcutMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        // Static chords; parsing cannot fail.
        default_bindings().unwrap_or_default()
    }

    /// Later bindings for the same chord replace earlier ones.
    pub fn bind(&mut self, chord: &str, command: AssistCommand, description: impl Into<String>) -> Result<()> {
        let chord: KeyChord = chord.parse().map_err(AssistError::config)?;
        self.bindings.retain(|b| b.chord != chord);
        self.bindings.push(Binding {
            chord,
            command,
            description: description.into(),
        });
        Ok(())
    }

    pub fn lookup(&self, chord: &KeyChord) -> Option<&AssistCommand> {
        self.bindings
            .iter()
            .find(|b| &b.chord == chord)
            .map(|b| &b.command)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

fn default_bindings() -> Result<ShortcutMap> {
    let mut map = ShortcutMap::new();
    map.bind("Ctrl+K", AssistCommand::Open { mode: None }, "Ask AI about the selection")?;
    map.bind(
        "Ctrl+Shift+I",
        AssistCommand::Open {
            mode: Some(Mode::Image),
        },
        "Generate an image",
    )?;
    map.bind("Ctrl+Enter", AssistCommand::Insert, "Insert the AI output")?;
    map.bind("Ctrl+Shift+R", AssistCommand::Regenerate, "Regenerate")?;
    map.bind("Escape", AssistCommand::Cancel, "Close the AI prompt")?;
    Ok(map)
}

/// Cloneable sender given to keyboard handling code.
#[derive(Debug, Clone)]
pub struct AssistHandle {
    tx: mpsc::Sender<AssistCommand>,
}

impl AssistHandle {
    pub fn channel() -> (Self, mpsc::Receiver<AssistCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (Self { tx }, rx)
    }

    pub async fn send(&self, command: AssistCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| AssistError::invalid_state("assist controller is not running"))
    }

    /// Send the command bound to `chord`. Returns `false` when nothing is bound.
    pub async fn press(&self, shortcuts: &ShortcutMap, chord: &KeyChord) -> Result<bool> {
        match shortcuts.lookup(chord) {
            Some(command) => {
                self.send(command.clone()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn dispatch<D, S>(controller: &AssistController<D, S>, command: AssistCommand) -> Result<()>
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    match command {
        AssistCommand::Open { mode } => {
            let mode = match mode {
                Some(mode) => mode,
                None => {
                    if lock_document(controller.document()).selection().is_empty() {
                        Mode::Generate
                    } else {
                        Mode::Transform
                    }
                }
            };
            controller.trigger(mode).map(|_| ())
        }
        AssistCommand::Submit(prompt) => controller.submit(&prompt).map(|_| ()),
        AssistCommand::Quick(action) => {
            controller.trigger(action.mode())?;
            controller.submit(&action.prompt()).map(|_| ())
        }
        AssistCommand::Cancel => {
            controller.cancel();
            Ok(())
        }
        AssistCommand::Regenerate => controller.regenerate().map(|_| ()),
        AssistCommand::Insert => controller.insert().map(|_| ()),
    }
}

/// Run commands until every [`AssistHandle`] is dropped.
pub async fn serve<D, S>(controller: AssistController<D, S>, mut commands: mpsc::Receiver<AssistCommand>)
where
    D: DocumentModel + 'static,
    S: CompletionService,
{
    while let Some(command) = commands.recv().await {
        tracing::debug!(?command, "assist command");
        if let Err(e) = dispatch(&controller, command) {
            tracing::warn!(error = %e, "assist command failed");
        }
    }
    tracing::debug!("assist command channel closed");
}
