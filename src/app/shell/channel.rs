//! Transport abstraction under a shell session

use std::io::{self, Read, Write};

/// A bidirectional interactive shell stream
///
/// Reads are expected to return `TimedOut` or `WouldBlock` periodically
/// while no data is available so that the session can check its deadline.
pub trait ShellChannel: Read + Write + Send {
    /// Deliver an interrupt signal to the remote foreground process
    fn send_interrupt(&mut self) -> io::Result<()>;

    /// Close the channel
    fn close(&mut self) -> io::Result<()>;
}

/// Whether a read error only means that no data arrived in time
pub(crate) fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
