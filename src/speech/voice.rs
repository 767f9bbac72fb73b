//! Voices and utterance requests
//!
//! Plain data shared by every backend. Parameter values are kept in the
//! canonical, backend-independent ranges; each backend maps them onto its
//! own native range (see [`crate::speech::params`]).

use serde::{Deserialize, Serialize};

/// Slowest canonical speech rate
pub const RATE_MIN: f32 = 0.1;
/// Canonical "normal" rate
pub const RATE_NORMAL: f32 = 1.0;
/// Fastest canonical speech rate
pub const RATE_MAX: f32 = 10.0;

pub const PITCH_MIN: f32 = 0.0;
pub const PITCH_NORMAL: f32 = 1.0;
pub const PITCH_MAX: f32 = 2.0;

pub const VOLUME_MIN: f32 = 0.0;
pub const VOLUME_MAX: f32 = 1.0;

/// A synthesizer voice as reported by a native engine
///
/// Produced fresh on every enumeration. Callers select voices by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,

    /// BCP-47-like language tag, e.g. "en-US"
    #[serde(rename = "lang")]
    pub language: String,

    #[serde(rename = "localService")]
    pub local_service: bool,

    #[serde(rename = "default")]
    pub is_default: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            local_service: true,
            is_default: false,
        }
    }

    /// Voice substituted when a native engine enumerates no voices at all
    pub fn synthetic_default() -> Self {
        Self {
            name: "Default".to_string(),
            language: "en-US".to_string(),
            local_service: true,
            is_default: true,
        }
    }
}

/// One request to speak a span of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceRequest {
    pub text: String,

    #[serde(default, rename = "lang")]
    pub language: Option<String>,

    #[serde(default, rename = "voice")]
    pub voice_name: Option<String>,

    /// 0.1 to 10.0, 1.0 is normal
    #[serde(default = "neutral")]
    pub rate: f32,

    /// 0.0 to 2.0, 1.0 is normal
    #[serde(default = "neutral")]
    pub pitch: f32,

    /// 0.0 to 1.0
    #[serde(default = "neutral")]
    pub volume: f32,
}

fn neutral() -> f32 {
    1.0
}

impl UtteranceRequest {
    /// Create a request with normal rate, pitch and full volume
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            voice_name: None,
            rate: RATE_NORMAL,
            pitch: PITCH_NORMAL,
            volume: VOLUME_MAX,
        }
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_voice(mut self, name: impl Into<String>) -> Self {
        self.voice_name = Some(name.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Copy of this request with every parameter inside its canonical range
    ///
    /// Out-of-range values are clamped, NaN becomes the neutral value, and
    /// empty voice/language strings count as not supplied.
    pub fn clamped(&self) -> Self {
        Self {
            text: self.text.clone(),
            language: self.language.clone().filter(|l| !l.trim().is_empty()),
            voice_name: self.voice_name.clone().filter(|v| !v.trim().is_empty()),
            rate: clamp_or(self.rate, RATE_MIN, RATE_MAX, RATE_NORMAL),
            pitch: clamp_or(self.pitch, PITCH_MIN, PITCH_MAX, PITCH_NORMAL),
            volume: clamp_or(self.volume, VOLUME_MIN, VOLUME_MAX, VOLUME_MAX),
        }
    }

    /// Length of the text in characters, the unit of every event's `char_index`
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Clamp into `[min, max]`, mapping NaN to `fallback`
pub(crate) fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}
