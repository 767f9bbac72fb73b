//! Speech Dispatcher backend
//!
//! Uses the `speech-dispatcher` crate (libspeechd bindings), the same library
//! the `tts` crate drives on Linux, but keeps direct access to language
//! selection and to pause/resume. End and cancel notifications arrive on
//! libspeechd's own thread and are recorded per message id.
//!
//! Speech Dispatcher does not report word positions, so this driver is run
//! by the estimating adapter.

use super::estimated::NativeDriver;
use crate::config::EngineConfig;
use crate::speech::params::{NativeParams, NativeRange, NativeRanges};
use crate::speech::voice::Voice;
use crate::{Result, SpeechError};
use log::debug;
use speech_dispatcher::{Connection, Mode, Priority};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// SSIP rate, pitch and volume all span -100..100 with 0 as normal
const SSIP_RANGE: NativeRange = NativeRange::new(-100.0, 0.0, 100.0);

/// Finished-message bookkeeping shared with the notification callbacks
#[derive(Debug, Default)]
struct Tracker {
    current: Option<u64>,
    ended: HashSet<u64>,
}

impl Tracker {
    fn start(&mut self, id: u64) {
        self.current = Some(id);
        // Notifications for this id may already have arrived
        self.ended.retain(|&ended| ended >= id);
    }

    fn record_ended(&mut self, id: u64) {
        self.ended.insert(id);
    }

    fn is_finished(&self) -> bool {
        match self.current {
            Some(id) => self.ended.contains(&id),
            None => true,
        }
    }
}

fn lock(tracker: &Mutex<Tracker>) -> std::sync::MutexGuard<'_, Tracker> {
    tracker.lock().unwrap_or_else(|e| e.into_inner())
}

fn to_voice(voice: speech_dispatcher::Voice) -> Voice {
    Voice::new(voice.name, voice.language)
}

/// Speech Dispatcher driver
pub struct SpeechdDriver {
    client_name: String,
    conn: Option<Connection>,
    tracker: Arc<Mutex<Tracker>>,
}

impl SpeechdDriver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            conn: None,
            tracker: Arc::new(Mutex::new(Tracker::default())),
        }
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SpeechError::Backend("Speech Dispatcher not connected".to_string()))
    }
}

impl NativeDriver for SpeechdDriver {
    fn name(&self) -> &'static str {
        "speechd"
    }

    fn connect(&mut self) -> Result<()> {
        debug!("Connecting to Speech Dispatcher as {}", self.client_name);
        let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());

        let conn = Connection::open(self.client_name.as_str(), "main", user.as_str(), Mode::Threaded)
            .map_err(|e| {
                SpeechError::init(
                    "speechd",
                    format!("{} (install: sudo apt install speech-dispatcher)", e),
                )
            })?;

        let on_end = Arc::clone(&self.tracker);
        conn.on_end(Some(Box::new(move |msg_id, _client_id| {
            lock(&on_end).record_ended(msg_id as u64);
        })));
        let on_cancel = Arc::clone(&self.tracker);
        conn.on_cancel(Some(Box::new(move |msg_id, _client_id| {
            lock(&on_cancel).record_ended(msg_id as u64);
        })));

        *lock(&self.tracker) = Tracker::default();
        self.conn = Some(conn);
        debug!("Speech Dispatcher connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.on_end(None);
            conn.on_cancel(None);
            // Dropping the last handle closes the connection
            drop(conn);
            debug!("Speech Dispatcher disconnected");
        }
        lock(&self.tracker).current = None;
    }

    fn ranges(&self) -> NativeRanges {
        NativeRanges {
            rate: SSIP_RANGE,
            pitch: SSIP_RANGE,
            volume: SSIP_RANGE,
        }
    }

    fn list_voices(&mut self) -> Result<Vec<Voice>> {
        let voices = self.conn()?.list_synthesis_voices()?;
        Ok(voices.into_iter().map(to_voice).collect())
    }

    fn set_voice(&mut self, voice: &Voice) -> Result<()> {
        let native = speech_dispatcher::Voice {
            name: voice.name.clone(),
            language: voice.language.clone(),
            variant: None,
        };
        Ok(self.conn()?.set_synthesis_voice(&native)?)
    }

    fn set_language(&mut self, language: &str) -> Result<()> {
        Ok(self.conn()?.set_language(language)?)
    }

    fn set_params(&mut self, params: &NativeParams) -> Result<()> {
        let conn = self.conn()?;
        conn.set_voice_rate(params.rate.round() as i32)?;
        conn.set_voice_pitch(params.pitch.round() as i32)?;
        conn.set_volume(params.volume.round() as i32)?;
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        let id = self
            .conn()?
            .say(Priority::Important, text)
            .ok_or_else(|| SpeechError::SpeakRejected("Speech Dispatcher refused the message".to_string()))?;
        debug!("Speech Dispatcher queued message {}", id);
        lock(&self.tracker).start(id);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let result = self.conn()?.cancel();
        lock(&self.tracker).current = None;
        Ok(result?)
    }

    fn pause(&mut self, _char_index: usize) -> Result<()> {
        Ok(self.conn()?.pause()?)
    }

    fn resume(&mut self) -> Result<()> {
        Ok(self.conn()?.resume()?)
    }

    fn is_finished(&mut self) -> bool {
        if self.conn.is_none() {
            return true;
        }
        lock(&self.tracker).is_finished()
    }
}

impl Drop for SpeechdDriver {
    fn drop(&mut self) {
        self.disconnect();
    }
}
