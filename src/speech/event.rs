//! Speech lifecycle events and the sink that receives them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};

/// Kind of a speech event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    End,
    Word,
    Sentence,
    Mark,
    Boundary,
    Error,
    Pause,
    Resume,
}

/// A lifecycle or progress event for one utterance
///
/// `char_index` and `char_length` count Unicode scalar values of the
/// utterance text. `elapsed_time` is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub char_index: usize,
    pub char_length: usize,
    /// Mark name for `Mark` events, error message for `Error` events
    pub name: String,
    pub elapsed_time: f32,
}

impl SpeechEvent {
    fn new(kind: EventKind, char_index: usize, char_length: usize) -> Self {
        Self {
            kind,
            char_index,
            char_length,
            name: String::new(),
            elapsed_time: 0.0,
        }
    }

    pub fn start() -> Self {
        Self::new(EventKind::Start, 0, 0)
    }

    pub fn end(text_len: usize, elapsed_time: f32) -> Self {
        Self {
            elapsed_time,
            ..Self::new(EventKind::End, text_len, 0)
        }
    }

    pub fn word(char_index: usize, char_length: usize, elapsed_time: f32) -> Self {
        Self {
            elapsed_time,
            ..Self::new(EventKind::Word, char_index, char_length)
        }
    }

    pub fn mark(char_index: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new(EventKind::Mark, char_index, 0)
        }
    }

    pub fn pause(char_index: usize) -> Self {
        Self::new(EventKind::Pause, char_index, 0)
    }

    pub fn resume(char_index: usize) -> Self {
        Self::new(EventKind::Resume, char_index, 0)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: message.into(),
            ..Self::new(EventKind::Error, 0, 0)
        }
    }

    /// `End` and `Error` close an utterance
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::End | EventKind::Error)
    }

    /// JSON object in the shape the host binding hands to its callers
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Caller-supplied capability that receives speech events
///
/// Invoked zero or more times per utterance, from whichever thread the
/// backend's monitor runs on. Events of one session are never delivered
/// concurrently. The sink runs while the engine's session lock is held, so
/// it must not call back into the same engine; forward the event to another
/// thread instead (see [`EventSink::channel`]).
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(SpeechEvent) + Send + Sync>);

impl EventSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(SpeechEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A sink that drops every event
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// A sink that forwards events to a channel, plus the receiving end
    ///
    /// Events sent after the receiver is dropped are discarded.
    pub fn channel() -> (Self, Receiver<SpeechEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink = Self::new(move |event| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event);
            }
        });
        (sink, rx)
    }

    pub fn emit(&self, event: SpeechEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}
