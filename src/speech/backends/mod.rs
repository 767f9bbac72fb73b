//! Platform-specific speech backends

// Boundary estimation for engines without word callbacks
pub mod estimated;

// Native TTS backend using the tts crate (cross-platform)
pub mod native;

// Speech Dispatcher through libspeechd
#[cfg(target_os = "linux")]
pub mod speechd;

// Windows SAPI backend (Windows and WSL)
pub mod windows;

pub mod stub;
