//! Request/response protocol over an interactive shell
//!
//! The session drives a login shell into a known state (echo off, clean
//! `bash`, optional elevation, sentinel prompt) and then treats every prompt
//! as the end of a command response. Output is consumed byte by byte through
//! a [`SentinelMatcher`] because nothing guarantees line buffering.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, info, trace, warn};

use super::channel::{is_idle, ShellChannel};
use super::config::SessionConfig;
use super::matcher::SentinelMatcher;
use crate::app::watchdog::{Deadline, Watchdog};
use crate::constants::{logging, shell};
use crate::errors::{ShellError, ShellResult};

static SESSION_IDS: AtomicUsize = AtomicUsize::new(1);

/// One interactive shell turned into a serial command channel
pub struct ShellSession<C: ShellChannel> {
    id: usize,
    channel: C,
    config: SessionConfig,
    watchdog: Watchdog,
    sync_counter: u64,
    buffer: Box<[u8]>,
    pos: usize,
    filled: usize,
    transcript: Option<BufWriter<File>>,
    broken: bool,
}

impl<C: ShellChannel> std::fmt::Debug for ShellSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.id)
            .field("raw", &self.config.raw)
            .field("sync_counter", &self.sync_counter)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C: ShellChannel> ShellSession<C> {
    /// Bring a freshly opened shell channel into command mode
    ///
    /// # Errors
    ///
    /// Returns `ShellError::InitTimeout` when the handshake never
    /// completes, or any I/O error raised by the channel. The channel is
    /// closed before the error is returned.
    pub fn connect(channel: C, config: SessionConfig, watchdog: Watchdog) -> ShellResult<Self> {
        let id = SESSION_IDS.fetch_add(1, Ordering::Relaxed);
        let transcript = open_transcript(&config, id);

        let mut session = Self {
            id,
            channel,
            config,
            watchdog,
            sync_counter: 0,
            buffer: vec![0; shell::READ_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
            transcript,
            broken: false,
        };

        match session.initialize() {
            Ok(()) => {
                debug!(session = session.id, raw = session.config.raw, "Shell session ready");
                Ok(session)
            }
            Err(e) => {
                warn!(session = session.id, "Shell initialization failed: {}", e);
                let _ = session.channel.close();
                Err(e)
            }
        }
    }

    fn initialize(&mut self) -> ShellResult<()> {
        self.send_line("")?;
        self.sync()?;

        self.send_line("stty -echo")?;
        self.send_line(shell::CLEAN_SHELL)?;
        self.send_line("")?;
        self.sync()?;

        if let Some(elevate) = self.config.elevate_command.clone() {
            info!(session = self.id, "Elevating shell: {}", elevate);
            self.send_line(&elevate)?;
            self.send_line("")?;
            self.sync()?;
        }

        self.execute(&format!("export PS1='{}'", shell::PROMPT), false)?;
        if self.config.raw {
            self.execute("stty raw", false)?;
        }
        Ok(())
    }

    /// Session number used in logs and transcript names
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the session was connected in raw sink mode
    pub fn is_raw(&self) -> bool {
        self.config.raw
    }

    /// Whether the stream position is unknown and the session must be replaced
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Wait until the shell echoes a fresh synchronization label
    ///
    /// Each attempt sends a new numbered label and waits for it with a
    /// doubling timeout, capped at half of the init budget. Output drained
    /// while waiting (banners, old prompts, late labels) is discarded.
    pub fn sync(&mut self) -> ShellResult<()> {
        let budget = self.config.init_timeout;
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(shell::INITIAL_SYNC_TIMEOUT)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(budget / 2)
            .with_max_elapsed_time(Some(budget))
            .build();

        loop {
            let Some(wait) = backoff.next_backoff() else {
                self.broken = true;
                return Err(ShellError::InitTimeout {
                    seconds: budget.as_secs(),
                });
            };

            self.sync_counter += 1;
            let label = format!("{}{}]", shell::SYNC_LABEL, self.sync_counter);
            self.send_line(&format!("echo {};", label))?;

            let mut matcher = SentinelMatcher::new(format!("{}\r\n", label));
            let deadline = self.watchdog.arm(wait);
            let found = self.read_until(&mut matcher, &deadline, Vec::new())?;
            deadline.disarm();

            if found.is_some() {
                trace!(session = self.id, "Synchronized on label {}", self.sync_counter);
                return Ok(());
            }
            debug!(
                session = self.id,
                "No sync label {} within {:?}, retrying", self.sync_counter, wait
            );
        }
    }

    /// Run a command and return everything it printed before the prompt
    ///
    /// With `check_errors` the command's standard error is merged into the
    /// response with every line stamped by the error sentinel; any stamped
    /// line turns the call into `ShellError::Command` carrying the first
    /// error line.
    pub fn execute(&mut self, command: &str, check_errors: bool) -> ShellResult<String> {
        self.ensure_synchronized()?;

        let line = if check_errors {
            wrap_stderr(command)
        } else {
            command.to_string()
        };
        debug!(session = self.id, "Executing: {}", command);

        self.send_line(&line)?;
        let output = self.read_until_prompt(command)?;
        let text = String::from_utf8_lossy(&output).into_owned();

        if check_errors {
            if let Some(message) = first_error_line(&text) {
                debug!(session = self.id, "Command reported error: {}", message);
                return Err(ShellError::Command { message });
            }
        }
        Ok(text)
    }

    /// Send one line of input followed by a newline
    pub fn send_line(&mut self, line: &str) -> ShellResult<()> {
        self.record(format!("> {}\n", line).as_bytes());
        self.write_bytes(line.as_bytes())?;
        self.write_bytes(b"\n")
    }

    /// Read until the prompt sentinel; `command` only labels timeout errors
    pub fn read_until_prompt(&mut self, command: &str) -> ShellResult<Vec<u8>> {
        self.read_until_prompt_after(&[], command)
    }

    /// Read until the prompt, treating `consumed` as bytes already read
    ///
    /// Used when a protocol step has pulled bytes that turned out to be the
    /// start of the prompt.
    pub(crate) fn read_until_prompt_after(
        &mut self,
        consumed: &[u8],
        command: &str,
    ) -> ShellResult<Vec<u8>> {
        let mut matcher = SentinelMatcher::new(shell::PROMPT);
        let mut output = Vec::with_capacity(consumed.len());
        for &byte in consumed {
            output.push(byte);
            if matcher.push(byte) {
                output.truncate(output.len() - matcher.len());
                return Ok(output);
            }
        }

        let deadline = self.watchdog.arm(self.config.command_timeout);
        let result = self.read_until(&mut matcher, &deadline, output);
        deadline.disarm();

        match result? {
            Some(output) => Ok(output),
            None => {
                self.broken = true;
                Err(ShellError::CommandTimeout {
                    command: command.to_string(),
                    seconds: self.config.command_timeout.as_secs(),
                })
            }
        }
    }

    /// Ask the remote foreground process to stop
    pub fn send_interrupt(&mut self) -> ShellResult<()> {
        debug!(session = self.id, "Sending interrupt");
        self.record(b"> <interrupt>\n");
        self.channel.send_interrupt()?;
        Ok(())
    }

    /// Close the underlying channel
    pub fn close(&mut self) -> ShellResult<()> {
        debug!(session = self.id, "Closing shell session");
        if let Some(transcript) = self.transcript.as_mut() {
            let _ = transcript.flush();
        }
        self.channel.close()?;
        Ok(())
    }

    pub(crate) fn ensure_synchronized(&self) -> ShellResult<()> {
        if self.broken {
            return Err(ShellError::Protocol {
                reason: format!("session {} lost synchronization", self.id),
            });
        }
        Ok(())
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn command_timeout(&self) -> Duration {
        self.config.command_timeout
    }

    pub(crate) fn arm(&self, duration: Duration) -> Deadline {
        self.watchdog.arm(duration)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> ShellResult<()> {
        let result = self
            .channel
            .write_all(bytes)
            .and_then(|_| self.channel.flush());
        if let Err(e) = result {
            self.broken = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Next byte of the stream, or `None` once the deadline has expired
    pub(crate) fn next_byte(&mut self, deadline: &Deadline) -> ShellResult<Option<u8>> {
        if self.pos == self.filled && !self.fill(deadline, true)? {
            return Ok(None);
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Copy exactly `len` bytes of stream data into `out`
    ///
    /// The deadline is an inactivity limit: it is re-armed after every
    /// chunk so large files are not bounded by the command timeout.
    pub(crate) fn copy_exact(&mut self, len: u64, out: &mut impl Write) -> ShellResult<u64> {
        let mut remaining = len;
        let mut deadline = self.watchdog.arm(self.config.command_timeout);

        while remaining > 0 {
            if self.pos == self.filled && !self.fill(&deadline, false)? {
                self.broken = true;
                return Err(ShellError::CommandTimeout {
                    command: "file transfer".to_string(),
                    seconds: self.config.command_timeout.as_secs(),
                });
            }
            let available = (self.filled - self.pos) as u64;
            let take = available.min(remaining) as usize;
            out.write_all(&self.buffer[self.pos..self.pos + take])
                .map_err(|e| {
                    self.broken = true;
                    ShellError::Io(e)
                })?;
            self.pos += take;
            remaining -= take as u64;

            deadline = self.watchdog.arm(self.config.command_timeout);
        }
        deadline.disarm();
        Ok(len)
    }

    fn read_until(
        &mut self,
        matcher: &mut SentinelMatcher,
        deadline: &Deadline,
        mut output: Vec<u8>,
    ) -> ShellResult<Option<Vec<u8>>> {
        loop {
            let byte = match self.next_byte(deadline) {
                Ok(Some(byte)) => byte,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.broken = true;
                    return Err(e);
                }
            };
            output.push(byte);
            if matcher.push(byte) {
                output.truncate(output.len() - matcher.len());
                return Ok(Some(output));
            }
        }
    }

    fn fill(&mut self, deadline: &Deadline, record: bool) -> ShellResult<bool> {
        loop {
            if deadline.is_expired() {
                return Ok(false);
            }
            match self.channel.read(&mut self.buffer) {
                Ok(0) => {
                    self.broken = true;
                    return Err(ShellError::UnexpectedEof);
                }
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    if record {
                        if let Some(transcript) = self.transcript.as_mut() {
                            let _ = transcript.write_all(&self.buffer[..n]);
                        }
                    }
                    return Ok(true);
                }
                Err(e) if is_idle(&e) => {
                    if deadline.wait(shell::IDLE_WAIT) {
                        return Ok(false);
                    }
                }
                Err(e) => {
                    self.broken = true;
                    return Err(e.into());
                }
            }
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        if let Some(transcript) = self.transcript.as_mut() {
            let _ = transcript.write_all(bytes);
        }
    }
}

/// Merge stderr into stdout with every error line prefixed by the error sentinel
pub fn wrap_stderr(command: &str) -> String {
    format!(
        "{{ ({}) 2>&1 1>&3 | (sed 's/^/{}/'); }} 3>&1",
        command,
        shell::ERROR_START
    )
}

/// First line tagged with the error sentinel, without the tag
pub fn first_error_line(output: &str) -> Option<String> {
    let start = output.find(shell::ERROR_START)? + shell::ERROR_START.len();
    let line = output[start..].split('\n').next().unwrap_or_default();
    Some(line.trim_end_matches('\r').to_string())
}

fn open_transcript(config: &SessionConfig, id: usize) -> Option<BufWriter<File>> {
    let dir = config.transcript_dir.as_ref()?;
    let path = dir.join(format!("{}{}.log", logging::TRANSCRIPT_PREFIX, id));
    match fs::create_dir_all(dir).and_then(|_| File::create(&path)) {
        Ok(file) => {
            debug!(session = id, "Writing shell transcript to {}", path.display());
            Some(BufWriter::new(file))
        }
        Err(e) => {
            warn!("Cannot create shell transcript {}: {}", path.display(), e);
            None
        }
    }
}
