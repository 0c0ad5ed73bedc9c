//! In-memory shell used by the protocol tests
//!
//! Emulates just enough of a pty-backed `bash` for the session protocol:
//! echo and raw terminal modes, prompt changes, `echo` labels, the stderr
//! stamping wrapper, scripted commands, and the sending side of `scp -f`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::channel::ShellChannel;

type Handler = Box<dyn FnMut(&str) -> Option<(String, String)> + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum SinkStage {
    AwaitStart,
    AwaitHeaderAck,
    AwaitFinalAck,
    AwaitInterrupt,
}

struct SinkState {
    path: String,
    stage: SinkStage,
}

struct FakeState {
    output: VecDeque<u8>,
    line: Vec<u8>,
    echo: bool,
    raw: bool,
    prompt: String,
    mute: bool,
    closed: bool,
    chunk: usize,
    files: Arc<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    sink: Option<SinkState>,
    commands: Vec<String>,
    interrupts: usize,
    handler: Option<Handler>,
}

/// Cloneable handle to one emulated shell
#[derive(Clone)]
pub struct FakeShell {
    state: Arc<Mutex<FakeState>>,
}

impl FakeShell {
    /// A shell that has printed a login banner and a default prompt
    pub fn new() -> Self {
        let state = FakeState {
            output: VecDeque::new(),
            line: Vec::new(),
            echo: true,
            raw: false,
            prompt: "user@host:~$ ".to_string(),
            mute: false,
            closed: false,
            chunk: 61,
            files: Arc::new(HashMap::new()),
            failing: HashSet::new(),
            sink: None,
            commands: Vec::new(),
            interrupts: 0,
            handler: None,
        };
        let shell = Self {
            state: Arc::new(Mutex::new(state)),
        };
        shell.with(|s| {
            let banner = format!("Last login: Mon Jan  1 00:00:00 2024\n{}", s.prompt);
            s.emit_text(&banner);
        });
        shell
    }

    /// A shell that never answers
    pub fn mute() -> Self {
        let shell = Self::new();
        shell.with(|s| {
            s.mute = true;
            s.output.clear();
        });
        shell
    }

    /// Files served by `scp -f`
    pub fn with_files(self, files: Arc<HashMap<String, Vec<u8>>>) -> Self {
        self.with(|s| s.files = files);
        self
    }

    /// Paths whose transfer ends with a failing trailing acknowledgement
    pub fn with_failing(self, path: &str) -> Self {
        self.with(|s| {
            s.failing.insert(path.to_string());
        });
        self
    }

    /// Script for commands the emulator does not know; returns (stdout, stderr)
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: FnMut(&str) -> Option<(String, String)> + Send + 'static,
    {
        self.with(|s| s.handler = Some(Box::new(handler)));
        self
    }

    /// Every command line the shell has executed
    pub fn commands(&self) -> Vec<String> {
        self.with(|s| s.commands.clone())
    }

    /// Number of interrupts delivered
    pub fn interrupts(&self) -> usize {
        self.with(|s| s.interrupts)
    }

    /// Whether the channel was closed
    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }

    /// Stop answering from now on
    pub fn go_silent(&self) {
        self.with(|s| s.mute = true);
    }

    /// Queue raw bytes as if printed asynchronously by the host
    pub fn inject(&self, bytes: &[u8]) {
        self.with(|s| s.output.extend(bytes));
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl FakeState {
    fn emit_text(&mut self, text: &str) {
        if self.mute {
            return;
        }
        for b in text.bytes() {
            if b == b'\n' && !self.raw {
                self.output.push_back(b'\r');
            }
            self.output.push_back(b);
        }
    }

    fn emit_bytes(&mut self, bytes: &[u8]) {
        if !self.mute {
            self.output.extend(bytes);
        }
    }

    fn emit_prompt(&mut self) {
        let prompt = self.prompt.clone();
        self.emit_text(&prompt);
    }

    fn input(&mut self, byte: u8) {
        if self.sink.is_some() {
            self.sink_input(byte);
            return;
        }
        if self.echo {
            self.emit_text(&(byte as char).to_string());
        }
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            self.run_line(&line);
        } else {
            self.line.push(byte);
        }
    }

    fn run_line(&mut self, line: &str) {
        self.commands.push(line.to_string());
        let line = line.trim();

        if line.is_empty() || line == "bash" {
            self.emit_prompt();
        } else if line == "stty -echo" {
            self.echo = false;
            self.emit_prompt();
        } else if line == "stty raw" {
            self.raw = true;
            self.emit_prompt();
        } else if let Some(label) = line.strip_prefix("echo ").and_then(|l| l.strip_suffix(';')) {
            self.emit_text(&format!("{}\n", label));
            self.emit_prompt();
        } else if let Some(prompt) = line
            .strip_prefix("export PS1='")
            .and_then(|l| l.strip_suffix('\''))
        {
            self.prompt = prompt.to_string();
            self.emit_prompt();
        } else if let Some(path) = line.strip_prefix("scp -fq ") {
            self.sink = Some(SinkState {
                path: unquote(path),
                stage: SinkStage::AwaitStart,
            });
        } else if let Some((inner, stamp)) = unwrap_stderr(line) {
            self.run_command(&inner, Some(&stamp));
            self.emit_prompt();
        } else {
            self.run_command(line, None);
            self.emit_prompt();
        }
    }

    fn run_command(&mut self, command: &str, stamp: Option<&str>) {
        let result = match self.handler.as_mut() {
            Some(handler) => handler(command),
            None => None,
        };
        let (stdout, stderr) = result.unwrap_or_else(|| {
            (
                String::new(),
                format!("bash: {}: command not found\n", command),
            )
        });

        self.emit_text(&stdout);
        for line in stderr.lines() {
            match stamp {
                Some(stamp) => self.emit_text(&format!("{}{}\n", stamp, line)),
                None => self.emit_text(&format!("{}\n", line)),
            }
        }
    }

    fn sink_input(&mut self, byte: u8) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let path = sink.path.clone();
        match (sink.stage, byte) {
            (SinkStage::AwaitStart, 0) => match self.files.get(&path).cloned() {
                Some(data) => {
                    let name = path.rsplit('/').next().unwrap_or_default().to_string();
                    self.emit_bytes(format!("C0644 {} {}\n", data.len(), name).as_bytes());
                    self.set_stage(SinkStage::AwaitHeaderAck);
                }
                None => {
                    self.emit_bytes(
                        format!("\u{1}scp: {}: No such file or directory\n", path).as_bytes(),
                    );
                    self.finish_sink();
                }
            },
            (SinkStage::AwaitHeaderAck, 0) => {
                let data = self.files.get(&path).cloned().unwrap_or_default();
                self.emit_bytes(&data);
                if self.failing.contains(&path) {
                    self.emit_bytes(b"\x02scp: read error\n");
                    self.set_stage(SinkStage::AwaitInterrupt);
                } else {
                    self.emit_bytes(&[0]);
                    self.set_stage(SinkStage::AwaitFinalAck);
                }
            }
            (SinkStage::AwaitFinalAck, 0) => self.finish_sink(),
            _ => {}
        }
    }

    fn set_stage(&mut self, stage: SinkStage) {
        if let Some(sink) = self.sink.as_mut() {
            sink.stage = stage;
        }
    }

    fn finish_sink(&mut self) {
        self.sink = None;
        self.emit_prompt();
    }
}

fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    let inner = arg
        .strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .unwrap_or(arg);
    inner.replace("'\\''", "'")
}

fn unwrap_stderr(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("{ (")?;
    let (inner, rest) = rest.split_once(") 2>&1 1>&3 | (sed 's/^/")?;
    let stamp = rest.strip_suffix("/'); } 3>&1")?;
    Some((inner.to_string(), stamp.to_string()))
}

impl Read for FakeShell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.with(|s| {
            if s.output.is_empty() {
                return if s.closed { Some(Vec::new()) } else { None };
            }
            let n = s.chunk.min(buf.len()).min(s.output.len());
            Some(s.output.drain(..n).collect::<Vec<u8>>())
        });
        match chunk {
            Some(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
            }
        }
    }
}

impl Write for FakeShell {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|s| {
            if s.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            for &b in buf {
                s.input(b);
            }
            Ok(buf.len())
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ShellChannel for FakeShell {
    fn send_interrupt(&mut self) -> io::Result<()> {
        self.with(|s| {
            s.interrupts += 1;
            if s.sink.is_some() {
                s.finish_sink();
            }
        });
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.with(|s| s.closed = true);
        Ok(())
    }
}
