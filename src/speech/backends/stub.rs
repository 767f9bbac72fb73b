//! Synchronous stub backend
//!
//! Speaks nothing. `speak` fires `Start` and `End` before returning, which
//! makes it useful for headless environments and for exercising callers.

use crate::speech::engine::SpeechEngine;
use crate::speech::event::{EventSink, SpeechEvent};
use crate::speech::session::{Session, SessionState};
use crate::speech::voice::{UtteranceRequest, Voice};
use crate::{Result, SpeechError};
use log::debug;

pub struct StubEngine {
    session: Session<()>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            session: Session::new(()),
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn initialize(&self) -> Result<()> {
        let mut inner = self.session.lock();
        match inner.state {
            SessionState::Uninitialized => {
                inner.state = SessionState::Idle;
                Ok(())
            }
            state if state.is_ready() => Ok(()),
            _ => Err(SpeechError::NotInitialized),
        }
    }

    fn shutdown(&self) {
        let mut inner = self.session.lock();
        inner.abandon();
        inner.state = SessionState::ShuttingDown;
    }

    fn voices(&self) -> Vec<Voice> {
        if !self.session.state().is_ready() {
            return Vec::new();
        }
        vec![Voice {
            name: "Stub Default".to_string(),
            language: "en-US".to_string(),
            local_service: true,
            is_default: true,
        }]
    }

    fn speak(&self, request: &UtteranceRequest, sink: EventSink) -> Result<()> {
        let request = request.clamped();
        let mut inner = self.session.lock();
        if !inner.state.is_ready() {
            return Err(SpeechError::NotInitialized);
        }
        debug!(
            "Stub would speak {:?} (rate {}, pitch {}, volume {})",
            request.text, request.rate, request.pitch, request.volume
        );

        inner.abandon();
        inner.begin(sink);
        let text_len = request.char_len();
        inner.char_index = text_len;
        inner.finish(SpeechEvent::end(text_len, 0.0));
        Ok(())
    }

    fn cancel(&self) {
        self.session.lock().abandon();
    }

    fn pause(&self) {
        self.session.lock().enter_pause();
    }

    fn resume(&self) {
        self.session.lock().leave_pause();
    }

    fn is_speaking(&self) -> bool {
        self.session.state() == SessionState::Speaking
    }

    fn is_paused(&self) -> bool {
        self.session.state() == SessionState::Paused
    }
}
