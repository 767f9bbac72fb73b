//! Windows TTS backend using SAPI (System.Speech.Synthesis)
//!
//! Works on Windows and on WSL, where Windows SAPI is reachable through
//! `powershell.exe`. A persistent PowerShell process hosts a small compiled
//! helper that reads commands from stdin and reports synthesizer events on
//! stdout, one per line.
//!
//! Commands:
//! - `s<id>\t<text>`: cancel everything, then speak text asynchronously
//! - `x`: cancel current speech immediately
//! - `p` / `u`: pause / resume
//! - `r<rate>`: set rate (-10 to 10)
//! - `v<volume>`: set volume (0 to 100)
//! - `V<name>`: select voice by name
//! - `L<culture>`: select a voice by culture
//! - `l`: list voices
//! - `q`: quit
//!
//! Events carry the utterance id so that completions of superseded
//! utterances can be told apart from the current one.

use crate::config::EngineConfig;
use crate::speech::boundary::{utf16_span_to_chars, word_spans};
use crate::speech::engine::SpeechEngine;
use crate::speech::event::{EventSink, SpeechEvent};
use crate::speech::params::{map_linear, map_rate, NativeRange};
use crate::speech::session::{Session, SessionInner, SessionState};
use crate::speech::voice::{UtteranceRequest, Voice, VOLUME_MAX, VOLUME_MIN};
use crate::{Result, SpeechError};
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SAPI_RATE: NativeRange = NativeRange::new(-10.0, 0.0, 10.0);
const SAPI_VOLUME: NativeRange = NativeRange::new(0.0, 100.0, 100.0);

/// PowerShell compiles the helper on startup, which can take a while
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

const SPEECH_SERVER: &str = r#"
$ErrorActionPreference = 'Stop'
[Console]::InputEncoding = New-Object System.Text.UTF8Encoding $false
[Console]::OutputEncoding = New-Object System.Text.UTF8Encoding $false
Add-Type -AssemblyName System.Speech
Add-Type -ReferencedAssemblies System.Speech -TypeDefinition @'
using System;
using System.Collections.Generic;
using System.Globalization;
using System.Speech.Synthesis;

public static class SpeechServer {
    static SpeechSynthesizer synth = new SpeechSynthesizer();
    static Dictionary<Prompt, string> ids = new Dictionary<Prompt, string>();
    static object gate = new object();

    static void Emit(string line) {
        lock (gate) { Console.Out.WriteLine(line); Console.Out.Flush(); }
    }

    static string Clean(string s) { return s.Replace('\n', ' ').Replace('\r', ' ').Replace('\t', ' '); }

    static string IdOf(Prompt p, bool remove) {
        lock (ids) {
            string id;
            if (!ids.TryGetValue(p, out id)) return null;
            if (remove) ids.Remove(p);
            return id;
        }
    }

    static void Reset() {
        if (synth.State == SynthesizerState.Paused) synth.Resume();
        synth.SpeakAsyncCancelAll();
    }

    public static void Run() {
        synth.SetOutputToDefaultAudioDevice();
        synth.SpeakProgress += (s, e) => {
            string id = IdOf(e.Prompt, false);
            if (id != null) Emit("word\t" + id + "\t" + e.CharacterPosition + "\t" + e.CharacterCount);
        };
        synth.BookmarkReached += (s, e) => {
            string id = IdOf(e.Prompt, false);
            if (id != null) Emit("mark\t" + id + "\t" + Clean(e.Bookmark));
        };
        synth.SpeakCompleted += (s, e) => {
            string id = IdOf(e.Prompt, true);
            if (id == null) return;
            if (e.Error != null) Emit("error\t" + id + "\t" + Clean(e.Error.Message));
            else if (e.Cancelled) Emit("cancelled\t" + id);
            else Emit("done\t" + id);
        };
        Emit("ready");

        string line;
        while ((line = Console.In.ReadLine()) != null) {
            if (line.Length == 0) continue;
            char cmd = line[0];
            string arg = line.Substring(1);
            try {
                switch (cmd) {
                    case 's': {
                        int tab = arg.IndexOf('\t');
                        Reset();
                        Prompt prompt = new Prompt(arg.Substring(tab + 1));
                        lock (ids) { ids[prompt] = arg.Substring(0, tab); }
                        synth.SpeakAsync(prompt);
                        break;
                    }
                    case 'x': Reset(); break;
                    case 'p': synth.Pause(); break;
                    case 'u': synth.Resume(); break;
                    case 'r': synth.Rate = Math.Max(-10, Math.Min(10, int.Parse(arg))); break;
                    case 'v': synth.Volume = Math.Max(0, Math.Min(100, int.Parse(arg))); break;
                    case 'V': synth.SelectVoice(arg); break;
                    case 'L': synth.SelectVoiceByHints(VoiceGender.NotSet, VoiceAge.NotSet, 0, new CultureInfo(arg)); break;
                    case 'l': {
                        string current = synth.Voice.Name;
                        foreach (InstalledVoice v in synth.GetInstalledVoices()) {
                            if (!v.Enabled) continue;
                            VoiceInfo info = v.VoiceInfo;
                            Emit("voice\t" + Clean(info.Name) + "\t" + info.Culture.Name + "\t" + (info.Name == current ? "1" : "0"));
                        }
                        Emit("voices-end");
                        break;
                    }
                    case 'q': return;
                }
            } catch (Exception ex) {
                Emit("fail\t" + Clean(ex.Message));
            }
        }
    }
}
'@
[SpeechServer]::Run()
"#;

/// One line reported by the speech helper
#[derive(Debug, Clone, PartialEq)]
pub enum SapiMessage {
    Ready,
    /// Word boundary; position and length in UTF-16 code units
    Word { id: u64, position: usize, length: usize },
    Mark { id: u64, name: String },
    Done { id: u64 },
    Cancelled { id: u64 },
    Error { id: u64, message: String },
    Voice(Voice),
    VoicesEnd,
    /// A command failed inside the helper
    Failure(String),
}

impl SapiMessage {
    /// Utterance the message belongs to, for progress and completion messages
    pub fn utterance(&self) -> Option<u64> {
        match self {
            SapiMessage::Word { id, .. }
            | SapiMessage::Mark { id, .. }
            | SapiMessage::Done { id }
            | SapiMessage::Cancelled { id }
            | SapiMessage::Error { id, .. } => Some(*id),
            _ => None,
        }
    }
}

fn number<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Option<u64> {
    fields.next()?.parse().ok()
}

/// Parse one stdout line of the helper
pub fn parse_message(line: &str) -> Option<SapiMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.split('\t');
    let tag = fields.next()?;

    let message = match tag {
        "ready" => SapiMessage::Ready,
        "voices-end" => SapiMessage::VoicesEnd,
        "word" => SapiMessage::Word {
            id: number(&mut fields)?,
            position: number(&mut fields)? as usize,
            length: number(&mut fields)? as usize,
        },
        "done" => SapiMessage::Done {
            id: number(&mut fields)?,
        },
        "cancelled" => SapiMessage::Cancelled {
            id: number(&mut fields)?,
        },
        "mark" => SapiMessage::Mark {
            id: number(&mut fields)?,
            name: fields.next().unwrap_or("").to_string(),
        },
        "error" => SapiMessage::Error {
            id: number(&mut fields)?,
            message: fields.next().unwrap_or("SAPI error").to_string(),
        },
        "voice" => {
            let name = fields.next()?;
            let culture = fields.next().unwrap_or("");
            let is_default = fields.next() == Some("1");
            SapiMessage::Voice(Voice {
                is_default,
                ..Voice::new(name, culture)
            })
        }
        "fail" => SapiMessage::Failure(fields.next().unwrap_or("").to_string()),
        _ => return None,
    };
    Some(message)
}

/// Escape text for the line protocol (newlines would end the command)
///
/// Replacement keeps UTF-16 offsets identical to the original text.
fn escape_text(text: &str) -> String {
    text.replace(['\n', '\r', '\t'], " ")
}

/// Native side of the session: the PowerShell process and its channels
struct SapiConnection {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    control: Option<Receiver<SapiMessage>>,
    /// Text of the current utterance, for offset conversion
    text: String,
    started: Instant,
}

impl SapiConnection {
    fn new() -> Self {
        Self {
            process: None,
            stdin: None,
            control: None,
            text: String::new(),
            started: Instant::now(),
        }
    }

    /// Send a command to the PowerShell speech process
    fn send(&mut self, cmd: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SpeechError::Backend("Speech process not running".to_string()))?;
        writeln!(stdin, "{}", cmd).map_err(|e| {
            error!("Failed to write command to speech process: {}", e);
            SpeechError::Backend(format!("Failed to send command: {}", e))
        })?;
        stdin
            .flush()
            .map_err(|e| SpeechError::Backend(format!("Failed to flush command: {}", e)))
    }

    fn recv_control(&self, timeout: Duration) -> Result<SapiMessage> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| SpeechError::Backend("Speech process not running".to_string()))?;
        match control.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => {
                Err(SpeechError::Protocol("Timed out waiting for SAPI".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SpeechError::Backend("Speech process exited".to_string()))
            }
        }
    }

    fn list_voices(&mut self, timeout: Duration) -> Result<Vec<Voice>> {
        if let Some(control) = &self.control {
            for stale in control.try_iter() {
                debug!("Discarding stale SAPI message {:?}", stale);
            }
        }

        self.send("l")?;
        let mut voices = Vec::new();
        loop {
            match self.recv_control(timeout)? {
                SapiMessage::Voice(voice) => voices.push(voice),
                SapiMessage::VoicesEnd => return Ok(voices),
                SapiMessage::Failure(reason) => return Err(SpeechError::Backend(reason)),
                other => debug!("Ignoring {:?} while listing voices", other),
            }
        }
    }

    fn terminate(&mut self) {
        if let Err(e) = self.send("q") {
            debug!("Failed to send quit command: {}", e);
        }
        self.stdin = None;
        self.control = None;

        if let Some(mut child) = self.process.take() {
            match child.kill() {
                Ok(_) => {
                    debug!("PowerShell speech process terminated");
                    let _ = child.wait();
                }
                Err(e) => debug!("Failed to kill PowerShell process: {}", e),
            }
        }
    }
}

/// Windows SAPI engine
pub struct SapiEngine {
    session: Arc<Session<SapiConnection>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    powershell: Option<String>,
    timeout: Duration,
}

impl SapiEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            session: Arc::new(Session::new(SapiConnection::new())),
            threads: Mutex::new(Vec::new()),
            powershell: config.powershell.clone(),
            timeout: config.command_timeout,
        }
    }

    /// Find PowerShell executable (native Windows or WSL interop)
    fn find_powershell(&self) -> Result<String> {
        let mut paths = Vec::new();
        if let Some(configured) = &self.powershell {
            paths.push(configured.as_str());
        }
        paths.push("powershell.exe");
        paths.push("/mnt/c/Windows/System32/WindowsPowerShell/v1.0/powershell.exe");

        for path in paths {
            if let Ok(status) = Command::new(path)
                .arg("-NoProfile")
                .arg("-Command")
                .arg("$PSVersionTable.PSVersion")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                if status.success() {
                    return Ok(path.to_string());
                }
            }
        }

        Err(SpeechError::init(
            "sapi",
            "PowerShell not found. WSL interop may not be enabled.",
        ))
    }

    /// Start the PowerShell helper, its reader and its monitor
    fn start_speech_process(&self, conn: &mut SapiConnection) -> Result<()> {
        let powershell = self.find_powershell()?;
        debug!("Starting persistent PowerShell speech process via {}", powershell);

        let mut child = Command::new(&powershell)
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(SPEECH_SERVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SpeechError::init("sapi", format!("Failed to start speech process: {}", e)))?;
        debug!("PowerShell speech process started with PID: {:?}", child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpeechError::init("sapi", "speech process has no stdout"))?;
        conn.stdin = child.stdin.take();
        conn.process = Some(child);

        let (control_tx, control_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        conn.control = Some(control_rx);

        let reader = thread::Builder::new()
            .name("sapi-reader".to_string())
            .spawn(move || read_loop(stdout, control_tx, event_tx))?;
        let session = Arc::clone(&self.session);
        let monitor = thread::Builder::new()
            .name("sapi-monitor".to_string())
            .spawn(move || run_monitor(session, event_rx))?;
        self.thread_handles().extend([reader, monitor]);

        match conn.recv_control(self.timeout.max(STARTUP_TIMEOUT))? {
            SapiMessage::Ready => Ok(()),
            other => Err(SpeechError::init(
                "sapi",
                format!("unexpected startup message {:?}", other),
            )),
        }
    }

    fn thread_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply language, voice, rate and volume; failures keep current settings
    fn configure(&self, conn: &mut SapiConnection, request: &UtteranceRequest) {
        if let Some(language) = &request.language {
            if let Err(e) = conn.send(&format!("L{}", language)) {
                warn!("Failed to select language {}: {}", language, e);
            }
        }

        // Voice goes after language so an explicit voice wins
        if let Some(name) = &request.voice_name {
            match conn.list_voices(self.timeout) {
                Ok(voices) if voices.iter().any(|v| &v.name == name) => {
                    if let Err(e) = conn.send(&format!("V{}", name)) {
                        warn!("Failed to select voice {}: {}", name, e);
                    }
                }
                Ok(_) => warn!(
                    "{}, using the current default voice",
                    SpeechError::VoiceNotFound(name.clone())
                ),
                Err(e) => warn!("Failed to enumerate voices: {}", e),
            }
        }

        let rate = map_rate(request.rate, &SAPI_RATE).round() as i32;
        let volume = map_linear(request.volume, VOLUME_MIN, VOLUME_MAX, VOLUME_MAX, &SAPI_VOLUME)
            .round() as i32;
        debug!("SAPI rate {}, volume {} (pitch unsupported)", rate, volume);
        for cmd in [format!("r{}", rate), format!("v{}", volume)] {
            if let Err(e) = conn.send(&cmd) {
                warn!("Failed to apply {}: {}", cmd, e);
            }
        }
    }

    fn preempt(&self, inner: &mut SessionInner<SapiConnection>) {
        if inner.state.is_active() {
            debug!("Cancelling in-flight utterance before speaking");
            if let Err(e) = inner.conn.send("x") {
                warn!("Failed to cancel previous utterance: {}", e);
            }
            inner.abandon();
        }
    }
}

/// Reader thread: route helper output to the control and event channels
fn read_loop(stdout: ChildStdout, control: Sender<SapiMessage>, events: Sender<SapiMessage>) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("SAPI read failed: {}", e);
                break;
            }
        };
        let Some(message) = parse_message(&line) else {
            debug!("Ignoring SAPI output: {}", line);
            continue;
        };

        let routed = if message.utterance().is_some() {
            events.send(message).is_ok()
        } else {
            control.send(message).is_ok()
        };
        if !routed {
            break;
        }
    }
    debug!("SAPI reader exiting");
}

/// Monitor: translate helper events of the current utterance into speech events
fn run_monitor(session: Arc<Session<SapiConnection>>, events: Receiver<SapiMessage>) {
    for message in events {
        let mut inner = session.lock();
        if inner.state == SessionState::ShuttingDown {
            break;
        }
        let Some(id) = message.utterance() else {
            continue;
        };
        if !inner.is_current(id) {
            debug!("Dropping {:?} of superseded utterance", message);
            continue;
        }

        let elapsed = inner.conn.started.elapsed().as_secs_f32();
        match message {
            SapiMessage::Word {
                position, length, ..
            } => {
                let span = utf16_span_to_chars(&inner.conn.text, position, length);
                if span.char_index < inner.char_index {
                    continue;
                }
                inner.char_index = span.char_index;
                inner.emit(SpeechEvent::word(span.char_index, span.char_length, elapsed));
            }
            SapiMessage::Mark { name, .. } => {
                let char_index = inner.char_index;
                inner.emit(SpeechEvent::mark(char_index, name));
            }
            SapiMessage::Done { .. } => {
                let text_len = inner.conn.text.chars().count();
                inner.char_index = text_len;
                inner.finish(SpeechEvent::end(text_len, elapsed));
            }
            SapiMessage::Cancelled { .. } => {
                debug!("SAPI cancelled utterance {}", id);
                inner.abandon();
            }
            SapiMessage::Error { message, .. } => {
                error!("SAPI failed to speak: {}", message);
                inner.finish(SpeechEvent::error(message));
            }
            _ => {}
        }
    }
    debug!("SAPI monitor exiting");
}

impl SpeechEngine for SapiEngine {
    fn name(&self) -> &'static str {
        "sapi"
    }

    fn initialize(&self) -> Result<()> {
        let mut inner = self.session.lock();
        match inner.state {
            SessionState::Uninitialized => {}
            state if state.is_ready() => return Ok(()),
            _ => return Err(SpeechError::NotInitialized),
        }

        match self.start_speech_process(&mut inner.conn) {
            Ok(()) => {
                inner.state = SessionState::Idle;
                info!("Windows SAPI backend ready");
                Ok(())
            }
            Err(e) => {
                inner.state = SessionState::Failed;
                inner.conn.terminate();
                error!("Windows SAPI not available: {}", e);
                Err(match e {
                    e @ SpeechError::InitializationFailure { .. } => e,
                    other => SpeechError::init("sapi", other),
                })
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut inner = self.session.lock();
            if inner.state == SessionState::ShuttingDown {
                return;
            }
            debug!("Shutting down Windows SAPI backend");
            inner.abandon();
            inner.state = SessionState::ShuttingDown;
            inner.conn.terminate();
        }

        let current = thread::current().id();
        for handle in self.thread_handles().drain(..) {
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("SAPI helper thread panicked");
            }
        }
    }

    fn voices(&self) -> Vec<Voice> {
        let mut inner = self.session.lock();
        if !inner.state.is_ready() {
            warn!("Voice enumeration on an uninitialized SAPI backend");
            return Vec::new();
        }

        match inner.conn.list_voices(self.timeout) {
            Ok(voices) if voices.is_empty() => vec![Voice::synthetic_default()],
            Ok(voices) => voices,
            Err(e) => {
                warn!("Failed to get voices: {}", e);
                Vec::new()
            }
        }
    }

    fn speak(&self, request: &UtteranceRequest, sink: EventSink) -> Result<()> {
        let request = request.clamped();
        let mut inner = self.session.lock();
        if !inner.state.is_ready() {
            return Err(SpeechError::NotInitialized);
        }
        self.preempt(&mut inner);

        if word_spans(&request.text).is_empty() {
            debug!("Empty utterance, completing immediately");
            inner.begin(sink);
            inner.finish(SpeechEvent::end(request.char_len(), 0.0));
            return Ok(());
        }

        self.configure(&mut inner.conn, &request);

        let id = inner.generation + 1;
        debug!("Speaking: {}", request.text);
        if let Err(e) = inner
            .conn
            .send(&format!("s{}\t{}", id, escape_text(&request.text)))
        {
            sink.emit(SpeechEvent::error(e.to_string()));
            return Err(SpeechError::SpeakRejected(e.to_string()));
        }

        inner.conn.text = request.text;
        inner.conn.started = Instant::now();
        inner.begin(sink);
        Ok(())
    }

    fn cancel(&self) {
        let mut inner = self.session.lock();
        if !inner.state.is_active() {
            return;
        }
        debug!("Canceling speech");
        if let Err(e) = inner.conn.send("x") {
            warn!("Cancel failed: {}", e);
        }
        inner.abandon();
    }

    fn pause(&self) {
        let mut inner = self.session.lock();
        if inner.state != SessionState::Speaking {
            return;
        }
        if let Err(e) = inner.conn.send("p") {
            warn!("Pause failed: {}", e);
            return;
        }
        inner.enter_pause();
    }

    fn resume(&self) {
        let mut inner = self.session.lock();
        if inner.state != SessionState::Paused {
            return;
        }
        if let Err(e) = inner.conn.send("u") {
            warn!("Resume failed: {}", e);
            return;
        }
        inner.leave_pause();
    }

    fn is_speaking(&self) -> bool {
        self.session.state() == SessionState::Speaking
    }

    fn is_paused(&self) -> bool {
        self.session.state() == SessionState::Paused
    }
}

impl Drop for SapiEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::event::EventKind;

    /// Session speaking `text`, with the events it delivers
    fn speaking_session(text: &str) -> (Arc<Session<SapiConnection>>, u64, Receiver<SpeechEvent>) {
        let session = Arc::new(Session::new(SapiConnection::new()));
        let (sink, events) = EventSink::channel();
        let id = {
            let mut inner = session.lock();
            inner.state = SessionState::Idle;
            inner.conn.text = text.to_string();
            inner.begin(sink)
        };
        (session, id, events)
    }

    fn replay(session: &Arc<Session<SapiConnection>>, messages: Vec<SapiMessage>) {
        let (tx, rx) = mpsc::channel();
        for message in messages {
            tx.send(message).unwrap();
        }
        drop(tx);
        run_monitor(Arc::clone(session), rx);
    }

    #[test]
    fn test_monitor_translates_helper_events() {
        let (session, id, events) = speaking_session("Hi 👋 there");

        replay(
            &session,
            vec![
                SapiMessage::Word { id, position: 0, length: 2 },
                // Superseded utterances on either side
                SapiMessage::Word { id: id + 1, position: 3, length: 2 },
                SapiMessage::Word { id: id - 1, position: 3, length: 2 },
                // "there" sits after a surrogate pair
                SapiMessage::Word { id, position: 6, length: 5 },
                // Positions never move backwards
                SapiMessage::Word { id, position: 0, length: 2 },
                SapiMessage::Mark { id, name: "wave".to_string() },
                SapiMessage::Done { id },
                SapiMessage::Word { id, position: 6, length: 5 },
            ],
        );

        let received: Vec<_> = events
            .try_iter()
            .map(|e| (e.kind, e.char_index, e.char_length, e.name))
            .collect();
        assert_eq!(
            received,
            vec![
                (EventKind::Start, 0, 0, String::new()),
                (EventKind::Word, 0, 2, String::new()),
                (EventKind::Word, 5, 5, String::new()),
                (EventKind::Mark, 5, 0, "wave".to_string()),
                (EventKind::End, 10, 0, String::new()),
            ]
        );
        let inner = session.lock();
        assert_eq!(inner.state, SessionState::Idle);
        assert_eq!(inner.char_index, 10);
    }

    #[test]
    fn test_monitor_error_is_terminal() {
        let (session, id, events) = speaking_session("Hello world");

        replay(
            &session,
            vec![
                SapiMessage::Error {
                    id,
                    message: "audio device lost".to_string(),
                },
                SapiMessage::Word { id, position: 6, length: 5 },
                SapiMessage::Done { id },
            ],
        );

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].kind, EventKind::Start);
        assert_eq!(received[1].kind, EventKind::Error);
        assert_eq!(received[1].name, "audio device lost");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_monitor_cancelled_fires_nothing() {
        let (session, id, events) = speaking_session("Hello world");

        replay(
            &session,
            vec![SapiMessage::Cancelled { id }, SapiMessage::Done { id }],
        );

        let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Start]);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_monitor_stops_on_shutdown() {
        let (session, id, events) = speaking_session("Hello world");
        session.lock().state = SessionState::ShuttingDown;

        replay(&session, vec![SapiMessage::Done { id }]);

        let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Start]);
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("Hello"), "Hello");
        assert_eq!(escape_text("Hello\nWorld"), "Hello World");
        assert_eq!(escape_text("Line1\r\nLine2"), "Line1  Line2");
    }

    #[test]
    fn test_parse_progress_messages() {
        assert_eq!(
            parse_message("word\t3\t6\t5\r"),
            Some(SapiMessage::Word {
                id: 3,
                position: 6,
                length: 5
            })
        );
        assert_eq!(parse_message("done\t3"), Some(SapiMessage::Done { id: 3 }));
        assert_eq!(
            parse_message("mark\t4\tchapter-2"),
            Some(SapiMessage::Mark {
                id: 4,
                name: "chapter-2".to_string()
            })
        );
        assert_eq!(parse_message("word\tx\t1\t1"), None);
        assert_eq!(parse_message("garbage"), None);
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(parse_message("ready"), Some(SapiMessage::Ready));
        match parse_message("voice\tMicrosoft Zira Desktop\ten-US\t1") {
            Some(SapiMessage::Voice(voice)) => {
                assert_eq!(voice.name, "Microsoft Zira Desktop");
                assert_eq!(voice.language, "en-US");
                assert!(voice.is_default);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_message("fail\tvoice not installed"),
            Some(SapiMessage::Failure("voice not installed".to_string()))
        );
        assert_eq!(SapiMessage::VoicesEnd.utterance(), None);
        assert_eq!(SapiMessage::Done { id: 9 }.utterance(), Some(9));
    }

    #[test]
    fn test_sapi_parameter_mapping() {
        assert_eq!(map_rate(1.0, &SAPI_RATE), 0.0);
        assert_eq!(map_rate(0.1, &SAPI_RATE), -10.0);
        assert_eq!(map_rate(25.0, &SAPI_RATE), 10.0);
        assert_eq!(
            map_linear(0.8, VOLUME_MIN, VOLUME_MAX, VOLUME_MAX, &SAPI_VOLUME).round(),
            80.0
        );
    }

    #[test]
    fn test_create_sapi_engine() {
        // Only works on Windows or in WSL with Windows interop
        let engine = SapiEngine::new(&EngineConfig::default());
        match engine.initialize() {
            Ok(()) => println!("✓ Windows SAPI backend available"),
            Err(e) => println!("⚠ Windows SAPI not available (expected elsewhere): {}", e),
        }
        engine.shutdown();
    }
}
