//! Platform engine abstraction
//!
//! Provides a unified interface for text-to-speech across platforms. Each
//! backend drives a different native engine and normalizes its parameters and
//! events into the common model.

use super::backends::estimated::EstimatedEngine;
use super::backends::native::TtsDriver;
use super::backends::stub::StubEngine;
use super::backends::windows::SapiEngine;
use super::event::EventSink;
use super::voice::{UtteranceRequest, Voice};
use crate::config::{BackendKind, EngineConfig};
use crate::platform::HostPlatform;
use crate::{Result, SpeechError};
use log::info;

/// Speech engine interface
///
/// All backends implement this. Methods take `&self` so that `cancel` can be
/// issued from any thread while an utterance is being monitored.
pub trait SpeechEngine: Send + Sync {
    /// Short backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Connect to the native engine
    ///
    /// Calling it again after success is a no-op. After a failure every other
    /// operation fails with `NotInitialized` or degrades to a no-op.
    fn initialize(&self) -> Result<()>;

    /// Release the native connection and any monitor; safe to call repeatedly
    fn shutdown(&self);

    /// Enumerate installed voices
    ///
    /// Best effort: errors yield an empty list, and an engine reporting no
    /// voices at all yields a single synthetic default voice.
    fn voices(&self) -> Vec<Voice>;

    /// Start speaking `request`, delivering its events to `sink`
    ///
    /// Returns once the native engine accepted the utterance and `Start` was
    /// delivered. An utterance already in flight is cancelled first.
    fn speak(&self, request: &UtteranceRequest, sink: EventSink) -> Result<()>;

    /// Stop the current utterance; no `End` is delivered for it
    fn cancel(&self);

    /// Pause the current utterance; no-op unless speaking
    fn pause(&self);

    /// Resume a paused utterance; no-op unless paused
    fn resume(&self);

    fn is_speaking(&self) -> bool;

    fn is_paused(&self) -> bool;
}

/// Backends to try, in order, for a configured kind on a host platform
///
/// **WSL:** Windows SAPI through PowerShell, then Speech Dispatcher.
/// **Linux/BSD:** Speech Dispatcher, then the `tts` crate.
/// **Windows:** SAPI, then the `tts` crate (WinRT).
/// **macOS and others:** the `tts` crate (AVFoundation).
pub fn backend_candidates(kind: BackendKind, platform: HostPlatform) -> Vec<BackendKind> {
    if kind != BackendKind::Auto {
        return vec![kind];
    }

    match platform {
        HostPlatform::Wsl => vec![BackendKind::Sapi, BackendKind::Speechd],
        HostPlatform::Linux => vec![BackendKind::Speechd, BackendKind::Native],
        HostPlatform::Windows => vec![BackendKind::Sapi, BackendKind::Native],
        HostPlatform::MacOs | HostPlatform::Other => vec![BackendKind::Native],
    }
}

/// Create and initialize a platform-appropriate speech engine
///
/// The backend is selected once, here. Every candidate that fails to
/// initialize is logged; if none succeeds the collected reasons are returned
/// as a single `InitializationFailure`.
pub fn create_engine(config: &EngineConfig) -> Result<Box<dyn SpeechEngine>> {
    let platform = HostPlatform::detect();
    info!("Detected platform {:?}, backend setting {:?}", platform, config.backend);

    let mut failures = Vec::new();
    for kind in backend_candidates(config.backend, platform) {
        info!("Trying {:?} backend...", kind);

        let engine = match build_engine(kind, config) {
            Ok(engine) => engine,
            Err(e) => {
                info!("✗ {:?} backend unavailable: {}", kind, e);
                failures.push(e.to_string());
                continue;
            }
        };

        match engine.initialize() {
            Ok(()) => {
                info!("✓ Successfully initialized {} backend", engine.name());
                return Ok(engine);
            }
            Err(e) => {
                info!("✗ {} backend unavailable: {}", engine.name(), e);
                failures.push(e.to_string());
            }
        }
    }

    Err(SpeechError::init(
        "platform",
        format!("no speech backend available. Tried: {}", failures.join("; ")),
    ))
}

/// Construct (without initializing) one backend
pub fn build_engine(kind: BackendKind, config: &EngineConfig) -> Result<Box<dyn SpeechEngine>> {
    match kind {
        BackendKind::Auto => Err(SpeechError::Config(
            "auto is resolved by create_engine".to_string(),
        )),
        BackendKind::Speechd => build_speechd(config),
        BackendKind::Sapi => Ok(Box::new(SapiEngine::new(config))),
        BackendKind::Native => Ok(Box::new(EstimatedEngine::new(TtsDriver::new(), config))),
        BackendKind::Stub => Ok(Box::new(StubEngine::new())),
    }
}

#[cfg(target_os = "linux")]
fn build_speechd(config: &EngineConfig) -> Result<Box<dyn SpeechEngine>> {
    use super::backends::speechd::SpeechdDriver;
    Ok(Box::new(EstimatedEngine::new(SpeechdDriver::new(config), config)))
}

#[cfg(not(target_os = "linux"))]
fn build_speechd(_config: &EngineConfig) -> Result<Box<dyn SpeechEngine>> {
    Err(SpeechError::init(
        "speechd",
        "Speech Dispatcher is only supported on Linux",
    ))
}
