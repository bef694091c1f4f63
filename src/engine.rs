//! Drives the engine under test over its stdin/stdout line protocol.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::extract::{CanonicalResult, Extractor, ProbeStatus, Wants};
use crate::report::RunLog;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Commands sent to the engine and the markers looked for in its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub init: String,
    pub ready_sentinel: String,
    /// `{path}` is replaced by the tablebase directory.
    pub configure: String,
    pub initialized_sentinel: String,
    pub reset: String,
    pub position: String,
    pub probe_full: String,
    pub probe_wdl: String,
    pub quit: String,
    pub panic_marker: String,
    pub too_many_pieces_marker: String,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            init: "uci".into(),
            ready_sentinel: "uciok".into(),
            configure: "setoption name SyzygyPath value {path}".into(),
            initialized_sentinel: "fathom initialized".into(),
            reset: "ucinewgame".into(),
            position: "position fen".into(),
            probe_full: "probebest".into(),
            probe_wdl: "probe".into(),
            quit: "quit".into(),
            panic_marker: "panic".into(),
            too_many_pieces_marker: "too many pieces".into(),
        }
    }
}

impl Protocol {
    fn configure_command(&self, syzygy_path: &Path) -> String {
        self.configure
            .replace("{path}", &syzygy_path.display().to_string())
    }

    fn probe_command(&self, kind: ProbeKind) -> &str {
        match kind {
            ProbeKind::Full => &self.probe_full,
            ProbeKind::WdlOnly => &self.probe_wdl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    /// Upper bound for a single probe.
    pub deadline: Duration,
    /// Upper bound for each startup step.
    pub startup_deadline: Duration,
    /// Lines read per probe before giving up.
    pub max_lines: usize,
    pub poll_interval: Duration,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            startup_deadline: Duration::from_secs(5),
            max_lines: 100,
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeKind {
    /// Best move plus class and distance.
    #[default]
    Full,
    WdlOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Handshaking,
    Configuring,
    Ready,
    Probing,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub syzygy_path: PathBuf,
    pub protocol: Protocol,
    pub limits: ReadLimits,
}

impl EngineConfig {
    pub fn new(program: impl Into<PathBuf>, syzygy_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            syzygy_path: syzygy_path.into(),
            protocol: Protocol::default(),
            limits: ReadLimits::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine {}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to initialize engine ({expected} not received after `{sent}`)")]
    Handshake { sent: String, expected: String },
    #[error("engine did not confirm the tablebase path ({expected} not received)")]
    Configure { expected: String },
    #[error("engine is no longer available")]
    Unavailable,
}

/// Why a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    Stopped,
    LineBudget,
    Deadline,
    Disconnected,
}

/// A running engine process.
///
/// The process is torn down by [`Engine::shutdown`] or, failing that, on drop.
pub struct Engine {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Receiver<String>,
    protocol: Protocol,
    limits: ReadLimits,
    state: EngineState,
    /// The last probe ended on a read bound, so its answer may still arrive.
    lagging: bool,
}

impl Engine {
    /// Spawn the engine, complete the handshake and point it at the tablebases.
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        debug!(program = %config.program.display(), pid = child.id(), "engine spawned");

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx);
        }

        let mut engine = Self {
            stdin: child.stdin.take(),
            child: Some(child),
            lines: rx,
            protocol: config.protocol.clone(),
            limits: config.limits,
            state: EngineState::NotStarted,
            lagging: false,
        };
        engine.handshake()?;
        engine.configure(&config.syzygy_path)?;
        engine.transition(EngineState::Ready);
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        self.transition(EngineState::Handshaking);
        let sent = self.protocol.init.clone();
        let expected = self.protocol.ready_sentinel.clone();
        if self.send(&sent).is_err() || !self.wait_for(&expected) {
            return Err(EngineError::Handshake { sent, expected });
        }
        Ok(())
    }

    fn configure(&mut self, syzygy_path: &Path) -> Result<(), EngineError> {
        self.transition(EngineState::Configuring);
        let command = self.protocol.configure_command(syzygy_path);
        let expected = self.protocol.initialized_sentinel.clone();
        if self.send(&command).is_err() || !self.wait_for(&expected) {
            return Err(EngineError::Configure { expected });
        }
        Ok(())
    }

    /// Probe one position.
    ///
    /// Protocol failures are part of the returned result. Only a controller
    /// that already crashed or shut down returns an error.
    pub fn probe(
        &mut self,
        fen: &str,
        kind: ProbeKind,
        wants: Wants,
        log: &mut RunLog,
    ) -> Result<CanonicalResult, EngineError> {
        if self.state != EngineState::Ready {
            return Err(EngineError::Unavailable);
        }
        self.transition(EngineState::Probing);
        self.discard_stale(log);

        let commands = [
            self.protocol.reset.clone(),
            format!("{} {fen}", self.protocol.position),
            self.protocol.probe_command(kind).to_string(),
        ];
        for command in &commands {
            if let Err(err) = self.send(command) {
                warn!(%err, command, "engine stopped accepting commands");
                self.shutdown();
                return Ok(CanonicalResult::unresolved(
                    ProbeStatus::Crashed,
                    Some(format!("failed to send `{command}`: {err}")),
                ));
            }
        }

        let panic_marker = self.protocol.panic_marker.to_lowercase();
        let declined_marker = self.protocol.too_many_pieces_marker.to_lowercase();
        let mut extractor = Extractor::new(wants);
        let mut interrupted = None;

        let end = self.collect(self.limits.deadline, self.limits.max_lines, |line| {
            let Some(line) = line else {
                return flow(extractor.idle());
            };
            log.line(format_args!("Engine output: {line}"));
            let lower = line.to_lowercase();
            if lower.contains(&panic_marker) {
                interrupted = Some((ProbeStatus::Crashed, line.to_string()));
                ControlFlow::Break(())
            } else if lower.contains(&declined_marker) {
                interrupted = Some((ProbeStatus::Skipped, line.to_string()));
                ControlFlow::Break(())
            } else {
                flow(extractor.feed(line))
            }
        });
        debug!(?end, "probe finished reading");

        let result = match interrupted {
            Some((status, line)) => CanonicalResult::unresolved(status, Some(line)),
            None if end == ReadEnd::Disconnected && !extractor.is_done() => {
                CanonicalResult::unresolved(
                    ProbeStatus::Crashed,
                    Some("engine exited during probe".into()),
                )
            }
            None => extractor.finish(),
        };

        self.lagging = matches!(end, ReadEnd::Deadline | ReadEnd::LineBudget)
            && result.status != ProbeStatus::Resolved;
        if result.status == ProbeStatus::Crashed {
            self.shutdown();
        } else {
            self.transition(EngineState::Ready);
        }
        Ok(result)
    }

    /// Stop the engine: ask it to quit, close its input, then kill it if it
    /// lingers past the grace period. Calling this twice is a no-op.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.transition(EngineState::ShuttingDown);

        let quit = self.protocol.quit.clone();
        if let Err(err) = self.send(&quit) {
            trace!(%err, "quit not delivered");
        }
        drop(self.stdin.take());

        let grace = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "engine exited");
                    break;
                }
                Ok(None) if Instant::now() < grace => thread::sleep(self.limits.poll_interval),
                _ => {
                    if let Err(err) = child.kill() {
                        warn!(%err, "failed to kill engine");
                    }
                    match child.wait() {
                        Ok(status) => debug!(%status, "engine killed"),
                        Err(err) => warn!(%err, "failed to reap engine"),
                    }
                    break;
                }
            }
        }
        self.transition(EngineState::Terminated);
    }

    /// Drop output that belongs to an earlier probe. After a probe that ran
    /// out of time, wait one more deadline for its late answer first.
    fn discard_stale(&mut self, log: &mut RunLog) {
        let mut stale = |line: &str| log.line(format_args!("Engine output (stale): {line}"));
        if std::mem::take(&mut self.lagging) {
            self.collect(self.limits.deadline, usize::MAX, |line| {
                if let Some(line) = line {
                    stale(line);
                }
                ControlFlow::Continue(())
            });
        }
        while let Ok(line) = self.lines.try_recv() {
            debug!(line = line.as_str(), "engine > (stale)");
            stale(&line);
        }
    }

    fn send(&mut self, command: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine input closed"))?;
        debug!(command, "engine <");
        writeln!(stdin, "{command}")?;
        stdin.flush()
    }

    /// Read until a line contains `sentinel` (case-insensitive).
    fn wait_for(&self, sentinel: &str) -> bool {
        let needle = sentinel.to_lowercase();
        let mut found = false;
        self.collect(self.limits.startup_deadline, usize::MAX, |line| {
            found = line.is_some_and(|line| line.to_lowercase().contains(&needle));
            flow(found)
        });
        found
    }

    /// The one read loop. `visit` sees every line, and `None` for each poll
    /// interval that passes without output.
    fn collect(
        &self,
        deadline: Duration,
        max_lines: usize,
        mut visit: impl FnMut(Option<&str>) -> ControlFlow<()>,
    ) -> ReadEnd {
        let until = Instant::now() + deadline;
        let mut received = 0;
        loop {
            if received >= max_lines {
                return ReadEnd::LineBudget;
            }
            let now = Instant::now();
            if now >= until {
                return ReadEnd::Deadline;
            }
            let wait = self.limits.poll_interval.min(until - now);
            let step = match self.lines.recv_timeout(wait) {
                Ok(line) => {
                    received += 1;
                    debug!(line = line.as_str(), "engine >");
                    visit(Some(&line))
                }
                Err(RecvTimeoutError::Timeout) => visit(None),
                Err(RecvTimeoutError::Disconnected) => return ReadEnd::Disconnected,
            };
            if step.is_break() {
                return ReadEnd::Stopped;
            }
        }
    }

    fn transition(&mut self, next: EngineState) {
        trace!(from = ?self.state, to = ?next, "engine state");
        self.state = next;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flow(done: bool) -> ControlFlow<()> {
    if done {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

/// Forward lines from one pipe into the shared channel until either side closes.
fn spawn_reader(stream: impl Read + Send + 'static, lines: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if lines.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> EngineConfig {
        let mut config = EngineConfig::new("/bin/sh", "/tmp/syzygy");
        config.args = vec!["-c".into(), body.into()];
        config.limits = ReadLimits {
            deadline: Duration::from_millis(500),
            startup_deadline: Duration::from_millis(500),
            max_lines: 100,
            poll_interval: Duration::from_millis(10),
        };
        config
    }

    const READY: &str = r#"
        while read -r cmd; do
            case "$cmd" in
                uci) echo "id name fake"; echo uciok ;;
                setoption*) echo "info string Fathom initialized" ;;
                probe) echo "info string WDL Probe Result: Win (Code: 4)" ;;
                quit) exit 0 ;;
            esac
        done
    "#;

    #[test]
    fn configure_command_substitutes_path() {
        let protocol = Protocol::default();
        assert_eq!(
            protocol.configure_command(Path::new("/tb/3-4-5")),
            "setoption name SyzygyPath value /tb/3-4-5"
        );
        assert_eq!(protocol.probe_command(ProbeKind::WdlOnly), "probe");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let config = EngineConfig::new("/nonexistent/engine", "/tmp");
        assert!(matches!(
            Engine::start(&config),
            Err(EngineError::Spawn { .. })
        ));
    }

    #[test]
    fn missing_ready_sentinel_is_fatal() {
        let config = script("while read -r cmd; do echo hello; done");
        assert!(matches!(
            Engine::start(&config),
            Err(EngineError::Handshake { .. })
        ));
    }

    #[test]
    fn missing_initialized_sentinel_is_fatal() {
        let config = script(
            r#"while read -r cmd; do case "$cmd" in uci) echo uciok ;; esac; done"#,
        );
        assert!(matches!(
            Engine::start(&config),
            Err(EngineError::Configure { .. })
        ));
    }

    #[test]
    fn probes_and_shuts_down() {
        let mut engine = Engine::start(&script(READY)).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        let mut log = RunLog::from_writers(Vec::new());
        let wants = Wants {
            wdl: true,
            ..Wants::default()
        };
        let result = engine
            .probe("4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1", ProbeKind::WdlOnly, wants, &mut log)
            .unwrap();
        assert_eq!(result.status, ProbeStatus::Resolved);
        assert_eq!(result.wdl, Some(crate::wdl::WdlClass::Win));

        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Terminated);
        assert!(matches!(
            engine.probe("8/8/8/8/8/8/8/K6k w - - 0 1", ProbeKind::Full, wants, &mut log),
            Err(EngineError::Unavailable)
        ));
    }

    #[test]
    fn exit_during_probe_is_a_crash() {
        let body = r#"
            while read -r cmd; do
                case "$cmd" in
                    uci) echo uciok ;;
                    setoption*) echo "Fathom initialized" ;;
                    probebest) exit 3 ;;
                esac
            done
        "#;
        let mut engine = Engine::start(&script(body)).unwrap();
        let mut log = RunLog::from_writers(Vec::new());
        let result = engine
            .probe(
                "4k3/8/8/8/8/8/4K3/4Q3 w - - 0 1",
                ProbeKind::Full,
                Wants::default(),
                &mut log,
            )
            .unwrap();
        assert_eq!(result.status, ProbeStatus::Crashed);
        assert_eq!(engine.state(), EngineState::Terminated);
    }
}
