//! Configuration management
//!
//! Engine settings are read from an optional INI file (`~/.speech-synthesis.cfg`).
//! The file is never written; missing keys and unparsable values fall back to
//! the defaults below.

use crate::speech::boundary::{DEFAULT_WORDS_PER_MINUTE, WORDS_PER_MINUTE_RANGE};
use crate::{Result, SpeechError};
use ini::Ini;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable that overrides the configured backend
pub const BACKEND_ENV: &str = "SPEECH_SYNTHESIS_BACKEND";

const CONFIG_FILE: &str = ".speech-synthesis.cfg";

/// Which backend the engine factory should build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Pick the best backend for the host platform
    Auto,
    /// Speech Dispatcher
    Speechd,
    /// Windows SAPI through PowerShell (Windows and WSL)
    Sapi,
    /// The cross-platform `tts` crate
    Native,
    /// Synchronous stub that only fires start/end
    Stub,
}

impl FromStr for BackendKind {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendKind::Auto),
            "speechd" | "speech-dispatcher" => Ok(BackendKind::Speechd),
            "sapi" | "windows" => Ok(BackendKind::Sapi),
            "native" | "tts" => Ok(BackendKind::Native),
            "stub" => Ok(BackendKind::Stub),
            other => Err(SpeechError::Config(format!("Unknown backend '{}'", other))),
        }
    }
}

/// Settings shared by every backend
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: BackendKind,

    /// Assumed speaking rate at rate 1.0 for backends that estimate word boundaries
    pub words_per_minute: f32,

    /// How often monitors poll the native engine for completion
    pub poll_interval: Duration,

    /// How long to wait for a reply from the native engine
    pub command_timeout: Duration,

    /// Name this client registers with the native engine
    pub client_name: String,

    /// Explicit PowerShell executable for the SAPI backend
    pub powershell: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
            poll_interval: Duration::from_millis(50),
            command_timeout: Duration::from_secs(5),
            client_name: "speech-synthesis".to_string(),
            powershell: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the user's config file, or defaults if absent
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific INI file
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let ini = Ini::load_from_file(path)
            .map_err(|e| SpeechError::IniParse(format!("Failed to load config: {}", e)))?;
        Ok(Self::from_ini(&ini))
    }

    /// Build configuration from parsed INI contents
    pub fn from_ini(ini: &Ini) -> Self {
        let defaults = Self::default();

        let backend = match ini.get_from(Some("engine"), "backend") {
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}, using auto", e);
                BackendKind::Auto
            }),
            None => defaults.backend,
        };

        let words_per_minute = get_parsed(ini, "engine", "words_per_minute")
            .filter(|wpm: &f32| {
                let valid = WORDS_PER_MINUTE_RANGE.contains(wpm);
                if !valid {
                    warn!(
                        "words_per_minute {} outside {:?}, using {}",
                        wpm, WORDS_PER_MINUTE_RANGE, defaults.words_per_minute
                    );
                }
                valid
            })
            .unwrap_or(defaults.words_per_minute);

        let poll_interval = get_parsed(ini, "engine", "poll_interval_ms")
            .filter(|&ms: &u64| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let command_timeout = get_parsed(ini, "engine", "command_timeout_ms")
            .filter(|&ms: &u64| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.command_timeout);

        let client_name = non_empty(ini, "engine", "client_name").unwrap_or(defaults.client_name);

        Self {
            backend,
            words_per_minute,
            poll_interval,
            command_timeout,
            client_name,
            powershell: non_empty(ini, "sapi", "powershell"),
        }
    }

    /// Let `SPEECH_SYNTHESIS_BACKEND` override the configured backend
    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            match value.parse() {
                Ok(kind) => {
                    debug!("Backend overridden by {}: {:?}", BACKEND_ENV, kind);
                    self.backend = kind;
                }
                Err(e) => warn!("Ignoring {}: {}", BACKEND_ENV, e),
            }
        }
    }

    /// Get config file path (~/.speech-synthesis.cfg)
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE))
    }
}

fn get_parsed<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Option<T> {
    let raw = ini.get_from(Some(section), key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid value for [{}] {}: {:?}", section, key, raw);
            None
        }
    }
}

fn non_empty(ini: &Ini, section: &str, key: &str) -> Option<String> {
    ini.get_from(Some(section), key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
