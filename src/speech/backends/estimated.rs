//! Adapter for native engines that report no word boundaries
//!
//! The native engine is reached through a [`NativeDriver`]. This adapter owns
//! the session state machine and runs one monitor thread per utterance that
//! synthesizes `Word` events from the text and an assumed speaking rate, then
//! waits for the driver to report completion before firing `End`.

use crate::config::EngineConfig;
use crate::speech::boundary::{word_spans, WordSpan, WordTiming};
use crate::speech::engine::SpeechEngine;
use crate::speech::event::{EventSink, SpeechEvent};
use crate::speech::params::{NativeParams, NativeRanges};
use crate::speech::session::{Session, SessionInner, SessionState};
use crate::speech::voice::{UtteranceRequest, Voice};
use crate::{Result, SpeechError};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Connection to a native engine without positional callbacks
///
/// Called only with the session lock held.
pub trait NativeDriver: Send + 'static {
    fn name(&self) -> &'static str;

    /// Open the native connection
    fn connect(&mut self) -> Result<()>;

    /// Close the native connection
    fn disconnect(&mut self);

    /// Native rate/pitch/volume ranges
    fn ranges(&self) -> NativeRanges;

    fn list_voices(&mut self) -> Result<Vec<Voice>>;

    fn set_voice(&mut self, voice: &Voice) -> Result<()>;

    /// Apply a language tag; engines that cannot ignore it
    fn set_language(&mut self, _language: &str) -> Result<()> {
        Ok(())
    }

    /// Apply already-mapped native parameter values
    fn set_params(&mut self, params: &NativeParams) -> Result<()>;

    /// Queue `text`; returns once the engine accepted it
    fn speak(&mut self, text: &str) -> Result<()>;

    /// Stop and discard the current utterance
    fn stop(&mut self) -> Result<()>;

    /// Pause output; `char_index` is the last reported position
    fn pause(&mut self, char_index: usize) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// The engine finished (or dropped) the last queued utterance
    fn is_finished(&mut self) -> bool;
}

/// Engine that estimates word boundaries for a [`NativeDriver`]
pub struct EstimatedEngine<D: NativeDriver> {
    name: &'static str,
    session: Arc<Session<D>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    words_per_minute: f32,
    poll_interval: Duration,
}

enum Wait {
    /// One word's worth of speaking time passed
    Elapsed,
    /// The native engine reported completion
    NativeDone,
    /// Cancelled, superseded or shut down
    Stop,
}

impl<D: NativeDriver> EstimatedEngine<D> {
    pub fn new(driver: D, config: &EngineConfig) -> Self {
        Self {
            name: driver.name(),
            session: Arc::new(Session::new(driver)),
            monitors: Mutex::new(Vec::new()),
            words_per_minute: config.words_per_minute,
            poll_interval: config.poll_interval,
        }
    }

    /// Apply language, voice and parameters of `request` to the driver
    ///
    /// Failures here never reject the utterance; the engine keeps its
    /// current settings for whatever could not be applied.
    fn configure(driver: &mut D, request: &UtteranceRequest) {
        // Selecting a language resets the voice, so an explicit voice goes last
        if let Some(language) = &request.language {
            if let Err(e) = driver.set_language(language) {
                warn!("Failed to set language {}: {}", language, e);
            }
        }

        if let Some(name) = &request.voice_name {
            let voices = driver.list_voices().unwrap_or_else(|e| {
                warn!("Failed to enumerate voices: {}", e);
                Vec::new()
            });
            match voices.iter().find(|v| &v.name == name) {
                Some(voice) => {
                    debug!("Selecting voice: {}", voice.name);
                    if let Err(e) = driver.set_voice(voice) {
                        warn!("Failed to set voice {}: {}", voice.name, e);
                    }
                }
                None => warn!(
                    "{}, using the current default voice",
                    SpeechError::VoiceNotFound(name.clone())
                ),
            }
        }

        let params = driver
            .ranges()
            .map(request.rate, request.pitch, request.volume);
        debug!("Native parameters: {:?}", params);
        if let Err(e) = driver.set_params(&params) {
            warn!("Failed to set speech parameters: {}", e);
        }
    }

    /// Implicit cancel of an in-flight utterance before a new one starts
    fn preempt(&self, inner: &mut SessionInner<D>) {
        if inner.state.is_active() {
            debug!("Cancelling in-flight utterance before speaking");
            if let Err(e) = inner.conn.stop() {
                warn!("Failed to stop previous utterance: {}", e);
            }
            inner.abandon();
            self.session.notify();
        }
    }

    fn monitors(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.monitors.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: NativeDriver> SpeechEngine for EstimatedEngine<D> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&self) -> Result<()> {
        let mut inner = self.session.lock();
        match inner.state {
            SessionState::Uninitialized => {}
            state if state.is_ready() => return Ok(()),
            _ => return Err(SpeechError::NotInitialized),
        }

        debug!("Connecting {} backend", self.name);
        match inner.conn.connect() {
            Ok(()) => {
                inner.state = SessionState::Idle;
                info!("{} backend connected", self.name);
                Ok(())
            }
            Err(e) => {
                inner.state = SessionState::Failed;
                error!("{} backend failed to initialize: {}", self.name, e);
                Err(match e {
                    e @ SpeechError::InitializationFailure { .. } => e,
                    other => SpeechError::init(self.name, other),
                })
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut inner = self.session.lock();
            if inner.state == SessionState::ShuttingDown {
                return;
            }
            debug!("Shutting down {} backend", self.name);

            let connected = inner.state.is_ready();
            if inner.state.is_active() {
                if let Err(e) = inner.conn.stop() {
                    debug!("Failed to stop speech during shutdown: {}", e);
                }
            }
            inner.abandon();
            inner.state = SessionState::ShuttingDown;
            if connected {
                inner.conn.disconnect();
            }
        }
        self.session.notify();

        let handles: Vec<_> = self.monitors().drain(..).collect();
        for handle in handles {
            // A sink may shut the engine down from the monitor thread itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Speech monitor thread panicked");
            }
        }
    }

    fn voices(&self) -> Vec<Voice> {
        let mut inner = self.session.lock();
        if !inner.state.is_ready() {
            warn!("Voice enumeration on an uninitialized {} backend", self.name);
            return Vec::new();
        }

        match inner.conn.list_voices() {
            Ok(voices) if voices.is_empty() => {
                debug!("{} reported no voices, substituting a default", self.name);
                vec![Voice::synthetic_default()]
            }
            Ok(voices) => voices,
            Err(e) => {
                warn!("Failed to get voices: {}", e);
                Vec::new()
            }
        }
    }

    fn speak(&self, request: &UtteranceRequest, sink: EventSink) -> Result<()> {
        let request = request.clamped();
        let mut inner = self.session.lock();
        if !inner.state.is_ready() {
            return Err(SpeechError::NotInitialized);
        }
        self.preempt(&mut inner);

        let text_len = request.char_len();
        let words = word_spans(&request.text);
        if words.is_empty() {
            // Nothing audible; the engine would never report completion
            debug!("Empty utterance, completing immediately");
            inner.begin(sink);
            inner.finish(SpeechEvent::end(text_len, 0.0));
            return Ok(());
        }

        Self::configure(&mut inner.conn, &request);

        debug!("Speaking: {}", request.text);
        if let Err(e) = inner.conn.speak(&request.text) {
            error!("Failed to speak: {}", e);
            sink.emit(SpeechEvent::error(e.to_string()));
            return Err(SpeechError::SpeakRejected(e.to_string()));
        }

        let generation = inner.begin(sink);
        let timing = WordTiming::new(self.words_per_minute, request.rate);
        let session = Arc::clone(&self.session);
        let poll = self.poll_interval;

        let spawned = thread::Builder::new()
            .name(format!("{}-monitor", self.name))
            .spawn(move || run_monitor(session, generation, words, text_len, timing, poll));

        match spawned {
            Ok(handle) => {
                drop(inner);
                // Superseded monitors notice the new generation and exit on their own
                let mut monitors = self.monitors();
                monitors.retain(|h| !h.is_finished());
                monitors.push(handle);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start speech monitor: {}", e);
                let _ = inner.conn.stop();
                inner.emit(SpeechEvent::error(e.to_string()));
                inner.abandon();
                Err(SpeechError::Io(e))
            }
        }
    }

    fn cancel(&self) {
        let mut inner = self.session.lock();
        if !inner.state.is_active() {
            return;
        }
        debug!("Canceling speech");
        if let Err(e) = inner.conn.stop() {
            warn!("Cancel failed: {}", e);
        }
        inner.abandon();
        drop(inner);
        self.session.notify();
    }

    fn pause(&self) {
        let mut inner = self.session.lock();
        if inner.state != SessionState::Speaking {
            return;
        }
        let char_index = inner.char_index;
        if let Err(e) = inner.conn.pause(char_index) {
            warn!("Pause failed: {}", e);
            return;
        }
        inner.enter_pause();
        drop(inner);
        self.session.notify();
    }

    fn resume(&self) {
        let mut inner = self.session.lock();
        if inner.state != SessionState::Paused {
            return;
        }
        if let Err(e) = inner.conn.resume() {
            warn!("Resume failed: {}", e);
            return;
        }
        inner.leave_pause();
        drop(inner);
        self.session.notify();
    }

    fn is_speaking(&self) -> bool {
        self.session.state() == SessionState::Speaking
    }

    fn is_paused(&self) -> bool {
        self.session.state() == SessionState::Paused
    }
}

impl<D: NativeDriver> Drop for EstimatedEngine<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wait until `remaining` of speaking time has passed
///
/// Paused time does not count. Returns with the lock held so the caller can
/// check and emit atomically.
fn wait_speaking<D: NativeDriver>(
    session: &Session<D>,
    generation: u64,
    mut remaining: Duration,
    poll: Duration,
) -> (Wait, MutexGuard<'_, SessionInner<D>>) {
    let mut inner = session.lock();
    loop {
        if !inner.is_current(generation) {
            return (Wait::Stop, inner);
        }

        if inner.state == SessionState::Paused {
            inner = session.wait(inner, poll);
            continue;
        }

        if inner.conn.is_finished() {
            return (Wait::NativeDone, inner);
        }
        if remaining.is_zero() {
            return (Wait::Elapsed, inner);
        }

        let started = Instant::now();
        inner = session.wait(inner, remaining.min(poll));
        remaining = remaining.saturating_sub(started.elapsed());
    }
}

/// Monitor one utterance: synthesize word events, then wait for completion
fn run_monitor<D: NativeDriver>(
    session: Arc<Session<D>>,
    generation: u64,
    words: Vec<WordSpan>,
    text_len: usize,
    timing: WordTiming,
    poll: Duration,
) {
    let started = Instant::now();

    for (spoken, word) in words.iter().enumerate() {
        let (outcome, mut inner) = wait_speaking(&session, generation, timing.per_word(), poll);
        match outcome {
            Wait::Stop => {
                debug!("Monitor for utterance {} stopped", generation);
                return;
            }
            Wait::NativeDone => {
                debug!("Engine finished before the estimate, skipping remaining words");
                break;
            }
            Wait::Elapsed => {
                inner.char_index = word.char_index;
                inner.emit(SpeechEvent::word(
                    word.char_index,
                    word.char_length,
                    timing.elapsed(spoken + 1),
                ));
            }
        }
    }

    let mut inner = session.lock();
    loop {
        if !inner.is_current(generation) {
            debug!("Monitor for utterance {} stopped", generation);
            return;
        }
        if inner.state == SessionState::Speaking && inner.conn.is_finished() {
            inner.char_index = text_len;
            inner.finish(SpeechEvent::end(text_len, started.elapsed().as_secs_f32()));
            debug!("Utterance {} finished", generation);
            return;
        }
        inner = session.wait(inner, poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::event::EventKind;
    use crate::speech::params::NativeRange;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Driver whose completion is controlled by the test
    struct ScriptedDriver {
        finished: Arc<AtomicBool>,
        fail_connect: bool,
        voices: Vec<Voice>,
        selected: Arc<Mutex<Option<String>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedDriver {
        fn new() -> (Self, Arc<AtomicBool>) {
            let finished = Arc::new(AtomicBool::new(false));
            let driver = Self {
                finished: Arc::clone(&finished),
                fail_connect: false,
                voices: vec![Voice::new("alpha", "en-US"), Voice::new("beta", "de-DE")],
                selected: Arc::new(Mutex::new(None)),
                calls: Arc::new(Mutex::new(Vec::new())),
            };
            (driver, finished)
        }
    }

    impl NativeDriver for ScriptedDriver {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn connect(&mut self) -> Result<()> {
            if self.fail_connect {
                Err(SpeechError::Backend("daemon not running".to_string()))
            } else {
                Ok(())
            }
        }

        fn disconnect(&mut self) {}

        fn ranges(&self) -> NativeRanges {
            let range = NativeRange::new(-100.0, 0.0, 100.0);
            NativeRanges {
                rate: range,
                pitch: range,
                volume: range,
            }
        }

        fn list_voices(&mut self) -> Result<Vec<Voice>> {
            Ok(self.voices.clone())
        }

        fn set_voice(&mut self, voice: &Voice) -> Result<()> {
            *self.selected.lock().unwrap() = Some(voice.name.clone());
            self.calls.lock().unwrap().push(format!("voice {}", voice.name));
            Ok(())
        }

        fn set_language(&mut self, language: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("language {}", language));
            Ok(())
        }

        fn set_params(&mut self, _params: &NativeParams) -> Result<()> {
            Ok(())
        }

        fn speak(&mut self, _text: &str) -> Result<()> {
            self.finished.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn pause(&mut self, _char_index: usize) -> Result<()> {
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_finished(&mut self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            words_per_minute: 6000.0,
            poll_interval: Duration::from_millis(2),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_failed_initialize_is_terminal() {
        let (mut driver, _) = ScriptedDriver::new();
        driver.fail_connect = true;
        let engine = EstimatedEngine::new(driver, &fast_config());

        assert!(matches!(
            engine.initialize(),
            Err(SpeechError::InitializationFailure { .. })
        ));
        assert!(matches!(engine.initialize(), Err(SpeechError::NotInitialized)));
        assert!(matches!(
            engine.speak(&UtteranceRequest::new("hi"), EventSink::discard()),
            Err(SpeechError::NotInitialized)
        ));
        assert!(engine.voices().is_empty());
        engine.pause();
        assert!(!engine.is_paused());
    }

    #[test]
    fn test_voice_selection_falls_back_silently() {
        let (driver, finished) = ScriptedDriver::new();
        let selected = Arc::clone(&driver.selected);
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        let request = UtteranceRequest::new("one").with_voice("beta");
        engine.speak(&request, EventSink::discard()).unwrap();
        assert_eq!(selected.lock().unwrap().as_deref(), Some("beta"));

        let request = UtteranceRequest::new("two").with_voice("gamma");
        assert!(engine.speak(&request, EventSink::discard()).is_ok());
        assert_eq!(selected.lock().unwrap().as_deref(), Some("beta"));

        finished.store(true, Ordering::SeqCst);
        engine.shutdown();
    }

    #[test]
    fn test_explicit_voice_applied_after_language() {
        let (driver, finished) = ScriptedDriver::new();
        let calls = Arc::clone(&driver.calls);
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        let request = UtteranceRequest::new("Hallo")
            .with_voice("beta")
            .with_language("de-DE");
        engine.speak(&request, EventSink::discard()).unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["language de-DE".to_string(), "voice beta".to_string()]
        );
        finished.store(true, Ordering::SeqCst);
        engine.shutdown();
    }

    #[test]
    fn test_shutdown_joins_every_monitor() {
        let (driver, _) = ScriptedDriver::new();
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        let text = "one two three four five six seven eight";
        engine.speak(&UtteranceRequest::new(text), EventSink::discard()).unwrap();
        engine.speak(&UtteranceRequest::new(text), EventSink::discard()).unwrap();
        assert!(!engine.monitors().is_empty());

        engine.shutdown();
        assert!(engine.monitors().is_empty());
        // Every monitor held a session handle until it exited
        assert_eq!(Arc::strong_count(&engine.session), 1);
    }

    #[test]
    fn test_finished_monitors_are_pruned() {
        let (driver, finished) = ScriptedDriver::new();
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        for _ in 0..5 {
            let (sink, rx) = EventSink::channel();
            engine.speak(&UtteranceRequest::new("one two"), sink).unwrap();
            finished.store(true, Ordering::SeqCst);
            while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
                if event.is_terminal() {
                    break;
                }
            }
            // Let the monitor return after delivering End
            thread::sleep(Duration::from_millis(20));
        }
        // Each earlier monitor delivered its End before the next speak
        assert!(engine.monitors().len() <= 2);
        engine.shutdown();
    }

    #[test]
    fn test_whitespace_only_completes_immediately() {
        let (driver, _) = ScriptedDriver::new();
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        let (sink, rx) = EventSink::channel();
        engine.speak(&UtteranceRequest::new("   "), sink).unwrap();

        let events: Vec<_> = rx.try_iter().map(|e| (e.kind, e.char_index)).collect();
        assert_eq!(events, vec![(EventKind::Start, 0), (EventKind::End, 3)]);
        assert!(!engine.is_speaking());
    }

    #[test]
    fn test_native_completion_skips_remaining_words() {
        let (driver, finished) = ScriptedDriver::new();
        let engine = EstimatedEngine::new(driver, &fast_config());
        engine.initialize().unwrap();

        let (sink, rx) = EventSink::channel();
        let text = "one two three four five six seven eight nine ten";
        engine.speak(&UtteranceRequest::new(text), sink).unwrap();
        finished.store(true, Ordering::SeqCst);

        let mut last = None;
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            let terminal = event.is_terminal();
            last = Some(event);
            if terminal {
                break;
            }
        }
        let last = last.expect("events delivered");
        assert_eq!(last.kind, EventKind::End);
        assert_eq!(last.char_index, text.chars().count());
    }
}
