//! Speech synthesis system

pub mod backends;
pub mod boundary;
pub mod engine;
pub mod event;
pub mod params;
pub(crate) mod session;
pub mod synthesis;
pub mod voice;

pub use engine::{create_engine, SpeechEngine};
pub use event::{EventKind, EventSink, SpeechEvent};
pub use session::SessionState;
pub use synthesis::Synthesizer;
pub use voice::{UtteranceRequest, Voice};
