//! Byte-level file receive protocol over a raw shell session
//!
//! Used when the host offers no SFTP subsystem or the files are only
//! readable after elevation. The remote side runs `scp -f` and the session
//! plays the receiving end:
//!
//! ```text
//! -> \0                      start
//! <- C0644 <size> <name>\n   file header
//! -> \0
//! <- <size bytes>
//! <- \0                      trailing ack (1 or 2 plus a message on error)
//! -> \0
//! ```
//!
//! Once the sender exits the shell prints its prompt again; the session
//! reads up to it so the next file starts from a synchronized stream.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::channel::ShellChannel;
use super::session::ShellSession;
use crate::app::remote::shell_quote;
use crate::app::watchdog::Deadline;
use crate::constants::sink;
use crate::errors::{ShellError, ShellResult};

/// Header announced by the sender before the file body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHeader {
    /// Octal permission bits as sent
    pub mode: String,
    /// Body length in bytes
    pub size: u64,
    /// File name as sent
    pub name: String,
}

impl<C: ShellChannel> ShellSession<C> {
    /// Receive one remote file into `local`, returning its size
    ///
    /// Sender-reported failures surface as `ShellError::Remote` and leave
    /// the session usable. Framing or timeout failures mark it broken.
    pub fn receive_file(&mut self, remote: &str, local: &Path) -> ShellResult<u64> {
        self.ensure_synchronized()?;
        if !self.is_raw() {
            return Err(ShellError::Protocol {
                reason: "file sink requires a raw session".to_string(),
            });
        }

        let mut out = BufWriter::new(File::create(local)?);
        let command = format!("{} {}", sink::SENDER_COMMAND, shell_quote(remote));
        debug!(session = self.id(), "Receiving {} into {}", remote, local.display());

        self.send_line(&command)?;
        self.write_bytes(&[sink::ACK])?;

        let mut received: Option<u64> = None;
        loop {
            let deadline = self.arm(self.command_timeout());
            let marker = self.sink_byte(&deadline, &command)?;

            match marker {
                sink::FILE_MARKER if received.is_none() => {
                    let header = self.read_header(&deadline, &command)?;
                    deadline.disarm();
                    debug!(
                        session = self.id(),
                        "Sink header for {}: mode {} size {}", header.name, header.mode, header.size
                    );

                    self.write_bytes(&[sink::ACK])?;
                    self.copy_exact(header.size, &mut out)?;
                    out.flush()?;

                    let deadline = self.arm(self.command_timeout());
                    let ack = self.sink_byte(&deadline, &command)?;
                    if ack != sink::ACK {
                        let message = self.read_message(&deadline, &command)?;
                        deadline.disarm();
                        self.abort_sender(&command)?;
                        return Err(ShellError::Remote { message });
                    }
                    deadline.disarm();

                    self.write_bytes(&[sink::ACK])?;
                    received = Some(header.size);
                }
                sink::FILE_MARKER => {
                    self.mark_broken();
                    return Err(ShellError::Protocol {
                        reason: format!("sender offered more than one file for {}", remote),
                    });
                }
                sink::WARNING | sink::FATAL => {
                    let message = self.read_message(&deadline, &command)?;
                    deadline.disarm();
                    warn!(session = self.id(), "Sender refused {}: {}", remote, message);
                    self.read_until_prompt(&command)?;
                    return Err(ShellError::Remote { message });
                }
                other => {
                    // Sender has exited; this byte opens the prompt
                    deadline.disarm();
                    self.read_until_prompt_after(&[other], &command)?;
                    return received.ok_or_else(|| ShellError::Protocol {
                        reason: format!("sender finished without sending {}", remote),
                    });
                }
            }
        }
    }

    fn abort_sender(&mut self, command: &str) -> ShellResult<()> {
        self.send_interrupt()?;
        self.read_until_prompt(command)?;
        Ok(())
    }

    fn sink_byte(&mut self, deadline: &Deadline, command: &str) -> ShellResult<u8> {
        match self.next_byte(deadline)? {
            Some(byte) => Ok(byte),
            None => {
                self.mark_broken();
                Err(ShellError::CommandTimeout {
                    command: command.to_string(),
                    seconds: deadline.duration().as_secs(),
                })
            }
        }
    }

    fn read_header(&mut self, deadline: &Deadline, command: &str) -> ShellResult<SinkHeader> {
        let mut mode = Vec::with_capacity(sink::MODE_FIELD_WIDTH);
        for _ in 0..sink::MODE_FIELD_WIDTH {
            mode.push(self.sink_byte(deadline, command)?);
        }
        let mode_ok = mode[sink::MODE_FIELD_WIDTH - 1] == b' '
            && mode[..sink::MODE_FIELD_WIDTH - 1]
                .iter()
                .all(|b| (b'0'..=b'7').contains(b));
        if !mode_ok {
            return Err(self.framing_error(format!(
                "bad mode field {:?}",
                String::from_utf8_lossy(&mode)
            )));
        }

        let size_field = self.read_field(b' ', deadline, command)?;
        let size = String::from_utf8_lossy(&size_field)
            .parse::<u64>()
            .map_err(|_| {
                self.framing_error(format!(
                    "bad size field {:?}",
                    String::from_utf8_lossy(&size_field)
                ))
            })?;

        let name = self.read_field(b'\n', deadline, command)?;

        Ok(SinkHeader {
            mode: String::from_utf8_lossy(&mode[..sink::MODE_FIELD_WIDTH - 1]).into_owned(),
            size,
            name: String::from_utf8_lossy(&name).into_owned(),
        })
    }

    fn read_message(&mut self, deadline: &Deadline, command: &str) -> ShellResult<String> {
        let line = self.read_field(b'\n', deadline, command)?;
        Ok(String::from_utf8_lossy(&line)
            .trim_end_matches('\r')
            .to_string())
    }

    fn read_field(
        &mut self,
        terminator: u8,
        deadline: &Deadline,
        command: &str,
    ) -> ShellResult<Vec<u8>> {
        let mut field = Vec::new();
        loop {
            let byte = self.sink_byte(deadline, command)?;
            if byte == terminator {
                return Ok(field);
            }
            field.push(byte);
            if field.len() > sink::MAX_HEADER_LENGTH {
                return Err(self.framing_error("header line too long".to_string()));
            }
        }
    }

    fn framing_error(&mut self, reason: String) -> ShellError {
        self.mark_broken();
        ShellError::Protocol { reason }
    }
}
