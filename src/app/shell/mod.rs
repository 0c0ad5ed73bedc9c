//! Interactive shell protocol
//!
//! Turns a raw SSH shell channel into a request/response primitive and
//! implements the receiving side of the `scp -f` file sink on top of it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dump_fetcher::app::shell::{SessionConfig, ShellSession};
//! use dump_fetcher::app::ssh::{Connector, SshConnector, SshSettings};
//! use dump_fetcher::app::Watchdog;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = SshConnector::new(SshSettings::new("app-host", "deploy"));
//! let channel = connector.open_shell()?;
//! let mut session = ShellSession::connect(channel, SessionConfig::default(), Watchdog::new())?;
//!
//! let listing = session.execute("ls -l /var/dumps", true)?;
//! println!("{}", listing);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod matcher;
pub mod session;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use channel::ShellChannel;
pub use config::SessionConfig;
pub use matcher::SentinelMatcher;
pub use session::{first_error_line, wrap_stderr, ShellSession};
pub use sink::SinkHeader;

use crate::errors::ShellResult;

/// Command execution seam used by the remote file manager
pub trait RemoteShell: Send {
    /// Run `command`, optionally failing when it writes to standard error
    fn execute(&mut self, command: &str, check_errors: bool) -> ShellResult<String>;

    /// Release the underlying transport
    fn close(&mut self) -> ShellResult<()> {
        Ok(())
    }
}

impl<C: ShellChannel> RemoteShell for ShellSession<C> {
    fn execute(&mut self, command: &str, check_errors: bool) -> ShellResult<String> {
        ShellSession::execute(self, command, check_errors)
    }

    fn close(&mut self) -> ShellResult<()> {
        ShellSession::close(self)
    }
}
