//! Speak a line of text and print its events
//!
//! Run with: cargo run --example speak -- "Hello world"
//! Set SPEECH_SYNTHESIS_BACKEND=stub to try it without an audio device.

use anyhow::{bail, Context};
use speech_synthesis::config::EngineConfig;
use speech_synthesis::speech::{create_engine, EventKind, EventSink, UtteranceRequest};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let text = if text.is_empty() {
        "Hello from speech synthesis".to_string()
    } else {
        text
    };

    let config = EngineConfig::load().context("Failed to load config")?;
    let engine = create_engine(&config).context("No speech engine available")?;
    println!("✓ Using {} backend", engine.name());

    for voice in engine.voices() {
        let marker = if voice.is_default { " (default)" } else { "" };
        println!("  {} [{}]{}", voice.name, voice.language, marker);
    }

    let (sink, events) = EventSink::channel();
    engine.speak(&UtteranceRequest::new(text.as_str()), sink)?;

    loop {
        let event = match events.recv_timeout(Duration::from_secs(60)) {
            Ok(event) => event,
            Err(_) => bail!("Timed out waiting for speech to finish"),
        };
        match event.kind {
            EventKind::Word => {
                let word: String = text
                    .chars()
                    .skip(event.char_index)
                    .take(event.char_length)
                    .collect();
                println!("{:>6.2}s  word  {}", event.elapsed_time, word);
            }
            _ => println!("{}", event.to_json()?),
        }
        if event.is_terminal() {
            break;
        }
    }

    engine.shutdown();
    Ok(())
}
