//! SSH transport: connection setup, host key check and authentication
//!
//! Everything above this module talks to the network through the
//! [`Connector`] trait, so the shell protocol, the file manager and the
//! transfer engine can be driven by in-memory doubles in tests.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{
    Channel, CheckResult, KeyboardInteractivePrompt, KnownHostFileKind, Prompt, Session, Sftp,
};
use tracing::{debug, info, warn};

use crate::app::shell::ShellChannel;
use crate::constants::{shell, sink, ssh};
use crate::errors::{TransferError, TransferResult};

/// Structured file download over one connection
pub trait SftpChannel: Send {
    /// Copy the remote file into `local`, returning the byte count
    fn fetch(&mut self, remote: &str, local: &mut dyn Write) -> io::Result<u64>;
}

/// Opens independent channels to one remote host
pub trait Connector: Send + Sync {
    type Shell: ShellChannel + 'static;
    type Sftp: SftpChannel + 'static;

    /// Open an interactive shell channel with a pseudo terminal
    fn open_shell(&self) -> TransferResult<Self::Shell>;

    /// Open an SFTP subsystem channel
    fn open_sftp(&self) -> TransferResult<Self::Sftp>;

    /// Host name for log and error messages
    fn host(&self) -> &str;
}

/// Where and how to connect
#[derive(Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub identity: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshSettings {
    /// Settings with the default port, timeout and `~/.ssh/known_hosts`
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: ssh::DEFAULT_PORT,
            user: user.into(),
            password: None,
            identity: None,
            known_hosts: dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
            connect_timeout: ssh::CONNECT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_known_hosts(mut self, known_hosts: Option<PathBuf>) -> Self {
        self.known_hosts = known_hosts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("identity", &self.identity)
            .field("known_hosts", &self.known_hosts)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// [`Connector`] backed by libssh2, one TCP connection per channel
#[derive(Debug, Clone)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    fn connect_error(&self, reason: impl fmt::Display) -> TransferError {
        TransferError::Connect {
            host: self.settings.host.clone(),
            reason: reason.to_string(),
        }
    }

    /// Establish an authenticated session
    fn session(&self) -> TransferResult<Session> {
        let settings = &self.settings;
        let addr = (settings.host.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(e))?
            .next()
            .ok_or_else(|| self.connect_error("host name did not resolve"))?;

        debug!("Connecting to {} ({})", settings.host, addr);
        let tcp = TcpStream::connect_timeout(&addr, settings.connect_timeout)
            .map_err(|e| self.connect_error(e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", addr, e);
        }

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| self.connect_error(format!("SSH handshake failed: {}", e)))?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;
        Ok(session)
    }

    fn verify_host_key(&self, session: &Session) -> TransferResult<()> {
        let settings = &self.settings;
        let Some(path) = settings.known_hosts.as_deref().filter(|p| p.exists()) else {
            debug!("No known_hosts file, skipping host key check");
            return Ok(());
        };
        let (key, _) = session
            .host_key()
            .ok_or_else(|| self.connect_error("server sent no host key"))?;

        let mut known_hosts = session.known_hosts()?;
        known_hosts.read_file(path, KnownHostFileKind::OpenSSH)?;
        match known_hosts.check_port(&settings.host, settings.port, key) {
            CheckResult::Match => {
                debug!("Host key for {} matches {}", settings.host, path.display());
                Ok(())
            }
            CheckResult::NotFound => {
                warn!(
                    "Host key for {} is not in {}, accepting it",
                    settings.host,
                    path.display()
                );
                Ok(())
            }
            CheckResult::Mismatch => Err(TransferError::HostKeyMismatch {
                host: settings.host.clone(),
                known_hosts: path.to_path_buf(),
            }),
            CheckResult::Failure => {
                warn!("Could not check host key for {}", settings.host);
                Ok(())
            }
        }
    }

    /// Agent, identity file, default keys, password, keyboard-interactive
    fn authenticate(&self, session: &Session) -> TransferResult<()> {
        let settings = &self.settings;
        let user = settings.user.as_str();
        let mut attempts: Vec<String> = Vec::new();

        if let Err(e) = session.userauth_agent(user) {
            attempts.push(format!("agent: {}", e));
        }

        if !session.authenticated() {
            let mut keys: Vec<PathBuf> = settings.identity.iter().cloned().collect();
            if let Some(home) = dirs::home_dir() {
                keys.extend(
                    ssh::DEFAULT_KEY_FILES
                        .iter()
                        .map(|name| home.join(".ssh").join(name)),
                );
            }
            for key in keys.iter().filter(|p| p.exists()) {
                match session.userauth_pubkey_file(user, None, key, None) {
                    Ok(()) if session.authenticated() => break,
                    Ok(()) => {}
                    Err(e) => attempts.push(format!("{}: {}", key.display(), e)),
                }
            }
        }

        if let Some(password) = settings.password.as_deref() {
            if !session.authenticated() {
                if let Err(e) = session.userauth_password(user, password) {
                    attempts.push(format!("password: {}", e));
                }
            }
            if !session.authenticated() {
                let mut prompter = PasswordPrompter { password };
                if let Err(e) = session.userauth_keyboard_interactive(user, &mut prompter) {
                    attempts.push(format!("keyboard-interactive: {}", e));
                }
            }
        }

        if session.authenticated() {
            debug!("Authenticated as {}@{}", user, settings.host);
            Ok(())
        } else {
            Err(TransferError::Authentication {
                user: user.to_string(),
                host: settings.host.clone(),
                reason: if attempts.is_empty() {
                    "no usable credentials".to_string()
                } else {
                    attempts.join("; ")
                },
            })
        }
    }
}

impl Connector for SshConnector {
    type Shell = SshShell;
    type Sftp = SftpLink;

    fn open_shell(&self) -> TransferResult<SshShell> {
        let session = self.session()?;
        let mut channel = session.channel_session()?;
        channel.request_pty(shell::TERM, None, Some((200, 50, 0, 0)))?;
        channel.shell()?;
        session.set_timeout(shell::POLL_INTERVAL.as_millis() as u32);
        info!("Opened shell on {}", self.settings.host);
        Ok(SshShell {
            channel,
            _session: session,
        })
    }

    fn open_sftp(&self) -> TransferResult<SftpLink> {
        let session = self.session()?;
        let sftp = session.sftp()?;
        debug!("Opened SFTP channel on {}", self.settings.host);
        Ok(SftpLink {
            sftp,
            _session: session,
        })
    }

    fn host(&self) -> &str {
        &self.settings.host
    }
}

struct PasswordPrompter<'a> {
    password: &'a str,
}

impl KeyboardInteractivePrompt for PasswordPrompter<'_> {
    fn prompt<'a>(&mut self, _username: &str, _instructions: &str, prompts: &[Prompt<'a>]) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

/// Interactive shell channel over its own SSH session
///
/// Reads time out after the poll interval so the shell protocol can check
/// its deadlines between reads.
pub struct SshShell {
    channel: Channel,
    _session: Session,
}

impl Read for SshShell {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for SshShell {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

impl ShellChannel for SshShell {
    fn send_interrupt(&mut self) -> io::Result<()> {
        self.channel
            .process_startup("signal", Some(sink::INTERRUPT_SIGNAL))
            .map_err(io::Error::from)
    }

    fn close(&mut self) -> io::Result<()> {
        self.channel.close().map_err(io::Error::from)
    }
}

/// SFTP subsystem over its own SSH session
pub struct SftpLink {
    sftp: Sftp,
    _session: Session,
}

impl SftpChannel for SftpLink {
    fn fetch(&mut self, remote: &str, local: &mut dyn Write) -> io::Result<u64> {
        let mut file = self.sftp.open(Path::new(remote)).map_err(io::Error::from)?;
        io::copy(&mut file, local)
    }
}
