//! Application constants for Dump Fetcher
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names for authentication
pub mod env {
    /// Environment variable holding the SSH password
    pub const PASSWORD: &str = "DUMP_FETCHER_PASSWORD";

    /// Environment variable holding the SSH user
    pub const USER: &str = "DUMP_FETCHER_USER";
}

/// Shell protocol markers and timing
pub mod shell {
    use super::Duration;

    /// Prompt installed as PS1; its reappearance ends every command response
    pub const PROMPT: &str = "swdbikNZwLk1rV7X5u8WegWQDbY0GQAyENvJ1yZXGUi0XdNvaQrp0S8NPX9ruUda]";

    /// Prefix stamped on every standard error line of a checked command
    pub const ERROR_START: &str = "ewdbikNZwLk1rV7X5u8WegWQDbY0GQAyENvJ1yZXGUi0XdNvaQrp0S8NPX9ruUda]";

    /// Stem of the numbered labels echoed during the synchronization handshake
    pub const SYNC_LABEL: &str = "syncikNZwLk1rV7X5u8WegWQDbY0GQAyENvJ1yZXGUi0XdNvaQrp0S8NPX9ruUda";

    /// Shell started right after login to normalize behaviour
    pub const CLEAN_SHELL: &str = "bash";

    /// Total budget for the handshake
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

    /// First handshake read timeout; doubled on every miss
    pub const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_millis(100);

    /// Deadline for a single command to return to the prompt
    pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

    /// How long a blocking channel read may wait before deadlines are re-checked
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Longest park on a deadline between two idle channel polls
    pub const IDLE_WAIT: Duration = Duration::from_millis(10);

    /// Read buffer size for the shell channel
    pub const READ_BUFFER_SIZE: usize = 32 * 1024;

    /// Terminal type requested for the pty
    pub const TERM: &str = "dumb";

    /// Error text that marks a missing path rather than a failure
    pub const NO_SUCH_FILE: &str = "No such file or directory";
}

/// Remote listing commands
pub mod listing {
    /// Single-directory long listing
    pub const LIST_DIR: &str = "ls -l -L --time-style +%s --color=none";

    /// Single-path long listing
    pub const LIST_PATH: &str = "ls -ld -L --time-style +%s --color=none";

    /// Recursive long listing
    pub const LIST_RECURSIVE: &str = "ls -l -L -R --time-style +%s --color=none";

    /// Path used by the capability probe
    pub const PROBE_PATH: &str = "/";

    /// Folder excluded from the recursive preload
    pub const PRELOAD_EXCLUDE: &str = "classes";

    /// Remote timezone query
    pub const TIMEZONE_COMMAND: &str = "date +%:z";
}

/// Discovery of dump roots from running agents
pub mod discovery {
    /// Prints one candidate dump root per line
    ///
    /// For every JVM started with the collector agent, the dump location is
    /// taken from `-Dprofiler.dump` (its parent folder), then from
    /// `-Dprofiler.dump.home`, and finally derived from the agent jar
    /// location or the process working directory. Relative settings are
    /// resolved against the working directory.
    pub const FIND_DUMP_ROOTS: &str = concat!(
        "(for PID in `ps auxww | grep -v grep | grep -E 'javaagent:\\S*execution-statistics-collector\\S*agent.jar' | awk '{print $2}'`; do ",
        "CWD=`pwdx $PID 2> /dev/null | awk '{print $2}'`; ",
        "if [ \"${CWD}\" = \"\" ]; then CWD=`ps $PID | grep -E 'Dnetcracker.home=' | sed 's/^.*Dnetcracker\\.home=\\(\\S\\+\\).*$/\\1/g' | xargs -r realpath 2> /dev/null`; fi; ",
        "PDUMP=`ps $PID | grep -E 'Dprofiler.dump=' | sed 's/^.*Dprofiler\\.dump=\\(\\S\\+\\).*$/\\1/g' | xargs -r dirname`; ",
        "if [ \"${PDUMP}\" = \"\" ]; then PDUMP=`ps $PID | grep -E 'Dprofiler.dump.home=' | sed 's/^.*Dprofiler\\.dump\\.home=\\(\\S\\+\\).*$/\\1/g'`; fi; ",
        "if [ \"${PDUMP}\" != \"\" ]; then ",
        "if [[ $PDUMP == /* ]]; then test -d $PDUMP && echo $PDUMP; else test -d $CWD'/'$PDUMP && echo $CWD'/'$PDUMP; fi; ",
        "continue; fi; ",
        "AGENT=`ps $PID | grep -E 'javaagent:\\S*execution-statistics-collector\\S*agent.jar' | sed 's/^.*javaagent:\\(\\S*execution-statistics-collector\\S\\+\\).*$/\\1/g'`; ",
        "if [[ $AGENT == /* ]]; then DUMP=`realpath $AGENT 2> /dev/null | xargs -r dirname | xargs -r dirname | xargs -r dirname | xargs -r dirname`'/execution-statistics-collector/dump'; ",
        "else DUMP=$CWD'/execution-statistics-collector/dump'; fi; ",
        "test -d $DUMP && echo $DUMP; ",
        "done;) | uniq | xargs -r realpath 2> /dev/null"
    );
}

/// Sink protocol framing
pub mod sink {
    /// Marker that introduces a file header
    pub const FILE_MARKER: u8 = b'C';

    /// Positive acknowledgement
    pub const ACK: u8 = 0;

    /// Recoverable remote error
    pub const WARNING: u8 = 1;

    /// Fatal remote error
    pub const FATAL: u8 = 2;

    /// Width of the mode field including its trailing space ("0644 ")
    pub const MODE_FIELD_WIDTH: usize = 5;

    /// Upper bound on a header line, guarding against a desynchronized stream
    pub const MAX_HEADER_LENGTH: usize = 4096;

    /// Remote sender command
    pub const SENDER_COMMAND: &str = "scp -fq";

    /// Signal sent to abort the remote sender
    pub const INTERRUPT_SIGNAL: &str = "INT";
}

/// Dump tree layout
pub mod layout {
    /// Folders that are copied in full for every selected bucket
    pub const DICTIONARY_FOLDERS: [&str; 4] = ["dictionary", "callsDictionary", "params", "suspend"];

    /// Detail folders filtered by modification time
    pub const DETAIL_FOLDERS: [&str; 3] = ["trace", "xml", "sql"];

    /// Exact name of the primary calls folder
    pub const CALLS_FOLDER: &str = "calls";

    /// Prefix of indexed calls folders ("calls[1]")
    pub const CALLS_FOLDER_PREFIX: &str = "calls[";

    /// Depth of a bucket below a server folder (year, month, day, bucket)
    pub const BUCKET_DEPTH: usize = 4;

    /// Width of a year folder name
    pub const YEAR_NAME_LENGTH: usize = 4;
}

/// Worker and concurrency configuration
pub mod workers {
    /// Default parallel degree
    pub const DEFAULT_PARALLEL_DEGREE: usize = 1;

    /// Default cap applied to the requested parallel degree
    pub const MAX_PARALLEL_DEGREE: usize = 10;

    /// Hard ceiling for the configurable cap
    pub const MAX_PARALLEL_DEGREE_LIMIT: usize = 32;

    /// Copy buffer used by the file writers
    pub const COPY_BUFFER_SIZE: usize = 64 * 1024;
}

/// SSH connection defaults
pub mod ssh {
    use super::Duration;

    /// Default SSH port
    pub const DEFAULT_PORT: u16 = 22;

    /// TCP connect timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default key files tried after the agent
    pub const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];
}

/// Progress reporting
pub mod progress {
    use super::Duration;

    /// Bounded wait used by the CLI polling loop
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Polls between two throughput summaries (one minute at the default interval)
    pub const SPEED_REPORT_EVERY: u32 = 12;

    /// Bytes per megabyte for display
    pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
}

/// Logging defaults
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// File name stem of shell transcripts
    pub const TRANSCRIPT_PREFIX: &str = "shell-";
}

pub use env::PASSWORD as ENV_PASSWORD;
pub use workers::{DEFAULT_PARALLEL_DEGREE, MAX_PARALLEL_DEGREE};
