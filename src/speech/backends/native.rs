//! Native Rust TTS backend using the tts crate
//!
//! This backend uses the `tts` crate which provides a unified interface to:
//! - AVFoundation on macOS/iOS
//! - WinRT on Windows
//! - Speech Dispatcher on Linux (via native bindings)
//!
//! None of these report word positions through the crate, so the driver runs
//! under the estimating adapter. The crate has no pause either: pausing stops
//! the engine and remembers where it was, resuming speaks the rest.

use super::estimated::NativeDriver;
use crate::speech::params::{NativeParams, NativeRange, NativeRanges};
use crate::speech::voice::Voice;
use crate::{Result, SpeechError};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tts::{Features, Tts as TtsCrate, UtteranceId};

/// Utterance ids the engine reported as ended or stopped, newest last
type EndedUtterances = Arc<Mutex<Vec<UtteranceId>>>;

const ENDED_HISTORY: usize = 16;

/// Driver for the tts crate
pub struct TtsDriver {
    tts: Option<TtsCrate>,
    features: Option<Features>,
    ended: EndedUtterances,
    current: Option<UtteranceId>,
    /// Whether the current utterance was started without an id to track
    untracked: bool,
    text: String,
    /// Character index to restart from after an emulated pause
    resume_from: usize,
}

impl TtsDriver {
    pub fn new() -> Self {
        Self {
            tts: None,
            features: None,
            ended: Arc::new(Mutex::new(Vec::new())),
            current: None,
            untracked: false,
            text: String::new(),
            resume_from: 0,
        }
    }

    fn tts(&mut self) -> Result<&mut TtsCrate> {
        self.tts
            .as_mut()
            .ok_or_else(|| SpeechError::Backend("TTS not initialized".to_string()))
    }

    fn supports(&self, check: impl Fn(&Features) -> bool) -> bool {
        self.features.as_ref().map(check).unwrap_or(false)
    }

    /// Register end/stop callbacks that record finished utterance ids
    fn track_completion(&mut self) -> Result<()> {
        let on_end = Arc::clone(&self.ended);
        let on_stop = Arc::clone(&self.ended);
        let tts = self.tts()?;

        tts.on_utterance_end(Some(Box::new(move |id| record_ended(&on_end, id))))?;
        tts.on_utterance_stop(Some(Box::new(move |id| record_ended(&on_stop, id))))?;
        Ok(())
    }

    /// Speak `text` and remember its utterance id
    fn start(&mut self, text: &str) -> Result<()> {
        let id = self.tts()?.speak(text, true)?;
        self.untracked = id.is_none();
        self.current = id;
        Ok(())
    }
}

impl Default for TtsDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn record_ended(ended: &Mutex<Vec<UtteranceId>>, id: UtteranceId) {
    if let Ok(mut ended) = ended.lock() {
        ended.push(id);
        let excess = ended.len().saturating_sub(ENDED_HISTORY);
        ended.drain(..excess);
    }
}

/// Build a native range, falling back to `normal` when the engine reports nonsense
fn range(min: f32, normal: f32, max: f32) -> NativeRange {
    if min.is_finite() && max.is_finite() && min <= normal && normal <= max {
        NativeRange::new(min, normal, max)
    } else {
        NativeRange::new(normal, normal, normal)
    }
}

impl NativeDriver for TtsDriver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn connect(&mut self) -> Result<()> {
        debug!("Creating native TTS backend");

        let tts = TtsCrate::default()
            .map_err(|e| SpeechError::init("native", format!("Failed to initialize TTS: {}", e)))?;
        let features = tts.supported_features();
        debug!("Native TTS features: {:?}", features);

        self.tts = Some(tts);
        if features.utterance_callbacks {
            self.track_completion()?;
        } else if !features.is_speaking {
            warn!("Native TTS cannot report completion; utterances end only when cancelled");
        }
        self.features = Some(features);

        debug!("Native TTS backend created successfully");
        Ok(())
    }

    fn disconnect(&mut self) {
        let can_stop = self.supports(|f| f.stop);
        if let Some(mut tts) = self.tts.take() {
            if can_stop {
                if let Err(e) = tts.stop() {
                    debug!("Failed to stop TTS during disconnect: {}", e);
                }
            }
        }
    }

    fn ranges(&self) -> NativeRanges {
        match &self.tts {
            Some(tts) => NativeRanges {
                rate: range(tts.min_rate(), tts.normal_rate(), tts.max_rate()),
                pitch: range(tts.min_pitch(), tts.normal_pitch(), tts.max_pitch()),
                volume: range(tts.min_volume(), tts.normal_volume(), tts.max_volume()),
            },
            None => NativeRanges {
                rate: NativeRange::new(0.1, 1.0, 10.0),
                pitch: NativeRange::new(0.0, 1.0, 2.0),
                volume: NativeRange::new(0.0, 1.0, 1.0),
            },
        }
    }

    fn list_voices(&mut self) -> Result<Vec<Voice>> {
        if !self.supports(|f| f.voice) {
            return Ok(Vec::new());
        }
        let can_get_voice = self.supports(|f| f.get_voice);
        let tts = self.tts()?;

        let current = if can_get_voice {
            tts.voice().ok().flatten().map(|v| v.name())
        } else {
            None
        };

        Ok(tts
            .voices()?
            .into_iter()
            .map(|v| {
                let name = v.name();
                Voice {
                    is_default: current.as_deref() == Some(name.as_str()),
                    language: v.language().to_string(),
                    local_service: true,
                    name,
                }
            })
            .collect())
    }

    fn set_voice(&mut self, voice: &Voice) -> Result<()> {
        if !self.supports(|f| f.voice) {
            warn!("Voice selection not supported on this platform");
            return Ok(());
        }
        let tts = self.tts()?;
        let native = tts
            .voices()?
            .into_iter()
            .find(|v| v.name() == voice.name)
            .ok_or_else(|| SpeechError::VoiceNotFound(voice.name.clone()))?;
        tts.set_voice(&native)?;
        Ok(())
    }

    fn set_language(&mut self, language: &str) -> Result<()> {
        debug!("Language {} ignored: tts selects language through voices", language);
        Ok(())
    }

    fn set_params(&mut self, params: &NativeParams) -> Result<()> {
        let features = self.features.clone();
        let Some(features) = features else {
            return Err(SpeechError::Backend("TTS not initialized".to_string()));
        };
        let tts = self.tts()?;

        if features.rate {
            tts.set_rate(params.rate)?;
        } else {
            debug!("Rate control not supported on this platform");
        }
        if features.pitch {
            tts.set_pitch(params.pitch)?;
        }
        if features.volume {
            tts.set_volume(params.volume)?;
        } else {
            debug!("Volume control not supported on this platform");
        }
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        self.text = text.to_string();
        self.resume_from = 0;
        self.start(text)
    }

    fn stop(&mut self) -> Result<()> {
        self.current = None;
        self.untracked = false;
        if self.supports(|f| f.stop) {
            self.tts()?.stop()?;
        }
        Ok(())
    }

    fn pause(&mut self, char_index: usize) -> Result<()> {
        if !self.supports(|f| f.stop) {
            return Err(SpeechError::Backend(
                "pause needs stop support on this platform".to_string(),
            ));
        }
        self.resume_from = char_index;
        self.current = None;
        self.tts()?.stop()?;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let rest: String = self.text.chars().skip(self.resume_from).collect();
        if rest.trim().is_empty() {
            return Ok(());
        }
        self.start(&rest)
    }

    fn is_finished(&mut self) -> bool {
        if let Some(id) = &self.current {
            if let Ok(ended) = self.ended.lock() {
                if ended.contains(id) {
                    return true;
                }
            }
        } else if !self.untracked {
            return true;
        }

        if self.supports(|f| f.is_speaking) {
            return match self.tts().and_then(|tts| Ok(tts.is_speaking()?)) {
                Ok(speaking) => !speaking,
                Err(e) => {
                    warn!("Failed to query speaking state: {}", e);
                    false
                }
            };
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_driver() {
        // May fail without speech-dispatcher (Linux) or in CI without audio
        let mut driver = TtsDriver::new();
        match driver.connect() {
            Ok(()) => {
                let ranges = driver.ranges();
                assert!(ranges.rate.min <= ranges.rate.normal);
                assert!(ranges.rate.normal <= ranges.rate.max);
                driver.disconnect();
            }
            Err(e) => println!("⚠ TTS initialization failed (may be expected in CI): {}", e),
        }
    }

    #[test]
    fn test_unconnected_driver() {
        let mut driver = TtsDriver::new();
        assert!(driver.is_finished());
        assert!(driver.list_voices().unwrap().is_empty());
        assert!(driver.speak("hello").is_err());
        assert_eq!(driver.ranges().rate.normal, 1.0);
    }

    #[test]
    fn test_range_sanitizing() {
        assert_eq!(range(0.5, 1.0, 2.0), NativeRange::new(0.5, 1.0, 2.0));
        assert_eq!(range(2.0, 1.0, 0.5), NativeRange::new(1.0, 1.0, 1.0));
        assert_eq!(range(f32::NAN, 1.0, 2.0), NativeRange::new(1.0, 1.0, 1.0));
    }
}
