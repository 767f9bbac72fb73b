//! Utterance queue on top of a speech engine
//!
//! `Synthesizer` speaks queued utterances one after another. Engine events
//! travel through a channel to a dispatcher thread, which hands them to the
//! caller's sink outside of any engine lock. Sinks given to a `Synthesizer`
//! may therefore call back into it, for instance to queue the next sentence
//! when one ends.

use super::engine::SpeechEngine;
use super::event::{EventSink, SpeechEvent};
use super::voice::{UtteranceRequest, Voice};
use crate::{Result, SpeechError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

enum Dispatch {
    Event(u64, SpeechEvent),
    Stop,
}

struct Queued {
    token: u64,
    request: UtteranceRequest,
    sink: EventSink,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Queued>,
    /// Token and sink of the utterance handed to the engine
    current: Option<(u64, EventSink)>,
    next_token: u64,
    voices: Vec<Voice>,
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    queue: Mutex<Queue>,
    dispatch: Mutex<Sender<Dispatch>>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sender(&self) -> Sender<Dispatch> {
        self.dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Hand the next queued utterance to the engine if nothing is in flight
    fn start_next(&self, queue: &mut Queue) {
        if queue.current.is_some() {
            return;
        }
        let Some(next) = queue.pending.pop_front() else {
            return;
        };

        let token = next.token;
        let tx = Mutex::new(self.sender());
        let forward = EventSink::new(move |event| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(Dispatch::Event(token, event));
            }
        });
        queue.current = Some((token, next.sink));

        match self.engine.speak(&next.request, forward) {
            Ok(()) => debug!("Utterance {} started", token),
            // The engine already reported the rejection through the sink
            Err(SpeechError::SpeakRejected(reason)) => {
                warn!("Utterance {} rejected: {}", token, reason)
            }
            Err(e) => {
                warn!("Utterance {} failed: {}", token, e);
                let _ = self
                    .sender()
                    .send(Dispatch::Event(token, SpeechEvent::error(e.to_string())));
            }
        }
    }
}

/// Queueing front end for a speech engine
pub struct Synthesizer {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Synthesizer {
    /// Wrap `engine`, initializing it if needed, and cache its voices
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Result<Self> {
        engine.initialize()?;

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                voices: engine.voices(),
                ..Queue::default()
            }),
            engine,
            dispatch: Mutex::new(tx),
        });

        let worker = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("speech-dispatch".to_string())
            .spawn(move || dispatch_loop(worker, rx))?;

        Ok(Self {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn engine(&self) -> &Arc<dyn SpeechEngine> {
        &self.shared.engine
    }

    /// Voices cached at construction or by the last `refresh_voices`
    pub fn voices(&self) -> Vec<Voice> {
        self.shared.queue().voices.clone()
    }

    /// Enumerate voices again, replacing the cache
    pub fn refresh_voices(&self) -> Vec<Voice> {
        let voices = self.shared.engine.voices();
        self.shared.queue().voices = voices.clone();
        voices
    }

    /// Queue `request`; it is spoken once every utterance before it has ended
    pub fn speak(&self, request: UtteranceRequest, sink: EventSink) {
        let mut queue = self.shared.queue();
        queue.next_token += 1;
        let token = queue.next_token;
        queue.pending.push_back(Queued {
            token,
            request,
            sink,
        });
        self.shared.start_next(&mut queue);
    }

    /// Drop every queued utterance and stop the current one
    pub fn cancel(&self) {
        let mut queue = self.shared.queue();
        if !queue.pending.is_empty() {
            debug!("Dropping {} queued utterances", queue.pending.len());
        }
        queue.pending.clear();
        queue.current = None;
        self.shared.engine.cancel();
    }

    pub fn pause(&self) {
        self.shared.engine.pause();
    }

    pub fn resume(&self) {
        self.shared.engine.resume();
    }

    /// Utterances are waiting behind the current one
    pub fn pending(&self) -> bool {
        !self.shared.queue().pending.is_empty()
    }

    /// An utterance is in flight, paused or not
    pub fn speaking(&self) -> bool {
        self.shared.queue().current.is_some()
    }

    pub fn paused(&self) -> bool {
        self.shared.engine.is_paused()
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue();
            queue.pending.clear();
            queue.current = None;
        }
        self.shared.engine.shutdown();

        let _ = self.shared.sender().send(Dispatch::Stop);
        if let Some(handle) = self.dispatcher.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Speech dispatcher panicked");
            }
        }
    }
}

/// Deliver engine events to caller sinks and advance the queue
fn dispatch_loop(shared: Arc<Shared>, rx: Receiver<Dispatch>) {
    for message in rx {
        let (token, event) = match message {
            Dispatch::Event(token, event) => (token, event),
            Dispatch::Stop => break,
        };

        let sink = {
            let mut queue = shared.queue();
            match &queue.current {
                Some((current, sink)) if *current == token => {
                    let sink = sink.clone();
                    if event.is_terminal() {
                        queue.current = None;
                    }
                    sink
                }
                _ => {
                    debug!("Dropping {:?} of cancelled utterance {}", event.kind, token);
                    continue;
                }
            }
        };

        let terminal = event.is_terminal();
        sink.emit(event);

        if terminal {
            let mut queue = shared.queue();
            shared.start_next(&mut queue);
        }
    }
    debug!("Speech dispatcher exiting");
}
