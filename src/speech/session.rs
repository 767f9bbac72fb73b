//! Per-engine session state shared between the caller and the monitor thread
//!
//! The state flags and the native connection live behind one mutex. Every
//! event is delivered while that mutex is held, so once `cancel` returns no
//! event of the cancelled utterance can still be delivered.

use super::event::{EventSink, SpeechEvent};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Engine session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, `initialize` not called yet
    Uninitialized,
    /// `initialize` failed; the instance is unusable
    Failed,
    Idle,
    Speaking,
    Paused,
    /// `shutdown` was called; terminal for the instance
    ShuttingDown,
}

impl SessionState {
    /// Initialized and not shut down
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Speaking | SessionState::Paused
        )
    }

    /// An utterance is in flight
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Speaking | SessionState::Paused)
    }
}

/// Guarded session data; `C` is the backend's native connection
pub(crate) struct SessionInner<C> {
    pub state: SessionState,
    /// Bumped on every `speak`; monitors exit once it moves past theirs
    pub generation: u64,
    /// Character index of the most recent progress event
    pub char_index: usize,
    pub sink: Option<EventSink>,
    pub conn: C,
}

impl<C> SessionInner<C> {
    /// Still speaking (or paused in) utterance `generation`
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state.is_active()
    }

    pub fn emit(&self, event: SpeechEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    /// Enter `Speaking` for a new utterance and fire its `Start` event
    pub fn begin(&mut self, sink: EventSink) -> u64 {
        self.generation += 1;
        self.state = SessionState::Speaking;
        self.char_index = 0;
        self.sink = Some(sink);
        self.emit(SpeechEvent::start());
        self.generation
    }

    /// Natural completion: fire the terminal event and go back to `Idle`
    pub fn finish(&mut self, event: SpeechEvent) {
        self.emit(event);
        self.state = SessionState::Idle;
        self.sink = None;
    }

    /// Drop the in-flight utterance without a terminal event
    pub fn abandon(&mut self) {
        if self.state.is_active() {
            self.state = SessionState::Idle;
        }
        self.sink = None;
    }

    /// `Speaking -> Paused`, firing `Pause`; false when not applicable
    pub fn enter_pause(&mut self) -> bool {
        if self.state != SessionState::Speaking {
            return false;
        }
        self.state = SessionState::Paused;
        self.emit(SpeechEvent::pause(self.char_index));
        true
    }

    /// `Paused -> Speaking`, firing `Resume`; false when not applicable
    pub fn leave_pause(&mut self) -> bool {
        if self.state != SessionState::Paused {
            return false;
        }
        self.state = SessionState::Speaking;
        self.emit(SpeechEvent::resume(self.char_index));
        true
    }
}

/// Session shared between an engine and its monitor
pub(crate) struct Session<C> {
    inner: Mutex<SessionInner<C>>,
    changed: Condvar,
}

impl<C> Session<C> {
    pub fn new(conn: C) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                generation: 0,
                char_index: 0,
                sink: None,
                conn,
            }),
            changed: Condvar::new(),
        }
    }

    /// Lock the session, recovering from a sink that panicked while delivering
    pub fn lock(&self) -> MutexGuard<'_, SessionInner<C>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake monitors waiting on a state change
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Release the lock for at most `timeout` or until the next state change
    pub fn wait<'a>(
        &self,
        guard: MutexGuard<'a, SessionInner<C>>,
        timeout: Duration,
    ) -> MutexGuard<'a, SessionInner<C>> {
        match self.changed.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::event::EventKind;

    #[test]
    fn test_state_predicates() {
        assert!(!SessionState::Uninitialized.is_ready());
        assert!(!SessionState::Failed.is_ready());
        assert!(SessionState::Idle.is_ready());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Paused.is_active());
        assert!(!SessionState::ShuttingDown.is_ready());
    }

    #[test]
    fn test_begin_pause_resume_finish() {
        let session = Session::new(());
        let (sink, rx) = EventSink::channel();

        let mut inner = session.lock();
        inner.state = SessionState::Idle;
        let generation = inner.begin(sink);
        assert!(inner.is_current(generation));

        inner.char_index = 6;
        assert!(inner.enter_pause());
        assert!(!inner.enter_pause());
        assert!(inner.leave_pause());
        assert!(!inner.leave_pause());
        inner.finish(SpeechEvent::end(11, 0.0));
        assert_eq!(inner.state, SessionState::Idle);
        assert!(!inner.is_current(generation));
        drop(inner);

        let kinds: Vec<_> = rx.try_iter().map(|e| (e.kind, e.char_index)).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::Start, 0),
                (EventKind::Pause, 6),
                (EventKind::Resume, 6),
                (EventKind::End, 11),
            ]
        );
    }

    #[test]
    fn test_abandon_fires_nothing() {
        let session = Session::new(());
        let (sink, rx) = EventSink::channel();

        let mut inner = session.lock();
        inner.state = SessionState::Idle;
        inner.begin(sink);
        inner.abandon();
        assert_eq!(inner.state, SessionState::Idle);
        inner.emit(SpeechEvent::word(0, 1, 0.0));
        drop(inner);

        assert_eq!(rx.try_iter().count(), 1);
    }
}
