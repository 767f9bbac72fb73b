//! speech-synthesis - platform-independent text-to-speech
//!
//! One engine interface over Speech Dispatcher, Windows SAPI (also from WSL)
//! and the native engines reachable through the `tts` crate. Utterance
//! progress is reported as a uniform event stream: `Start`, `Word`, `Pause`,
//! `Resume`, then `End` or `Error`. Engines that cannot report word positions
//! get estimated ones.

pub mod config;
pub mod error;
pub mod platform;
pub mod speech;

pub use error::{Result, SpeechError};
