//! Protocol tests for shell sessions against the in-memory shell

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::testing::FakeShell;
use super::{SessionConfig, ShellSession};
use crate::app::watchdog::Watchdog;
use crate::constants::shell::PROMPT;
use crate::errors::ShellError;

fn test_config() -> SessionConfig {
    SessionConfig {
        init_timeout: Duration::from_secs(2),
        command_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

fn scripted_shell() -> FakeShell {
    FakeShell::new().with_handler(|command| match command {
        "uname" => Some(("Linux\n".to_string(), String::new())),
        "ls /missing" => Some((
            String::new(),
            "ls: cannot access '/missing': No such file or directory\n".to_string(),
        )),
        "mixed" => Some(("first\n".to_string(), "warning: slow\n".to_string())),
        _ => None,
    })
}

#[test]
fn test_connect_prepares_shell() {
    let shell = scripted_shell();
    let session = ShellSession::connect(shell.clone(), test_config(), Watchdog::new()).unwrap();

    assert!(!session.is_broken());
    assert!(!session.is_raw());

    let commands = shell.commands();
    assert!(commands.iter().any(|c| c == "stty -echo"));
    assert!(commands.iter().any(|c| c == "bash"));
    assert!(commands
        .iter()
        .any(|c| c == &format!("export PS1='{}'", PROMPT)));
    assert!(!commands.iter().any(|c| c == "stty raw"));
}

#[test]
fn test_execute_returns_output_before_prompt() {
    let shell = scripted_shell();
    let mut session = ShellSession::connect(shell, test_config(), Watchdog::new()).unwrap();

    let output = session.execute("uname", false).unwrap();
    assert_eq!(output, "Linux\r\n");

    let output = session.execute("uname", true).unwrap();
    assert_eq!(output, "Linux\r\n");
}

#[test]
fn test_checked_command_reports_first_error_line() {
    let shell = scripted_shell();
    let mut session = ShellSession::connect(shell, test_config(), Watchdog::new()).unwrap();

    match session.execute("ls /missing", true) {
        Err(ShellError::Command { message }) => {
            assert_eq!(
                message,
                "ls: cannot access '/missing': No such file or directory"
            );
        }
        other => panic!("expected command error, got {:?}", other),
    }

    // A reported error leaves the stream in sync
    assert!(!session.is_broken());
    assert_eq!(session.execute("uname", true).unwrap(), "Linux\r\n");
}

#[test]
fn test_unchecked_command_keeps_stderr_as_output() {
    let shell = scripted_shell();
    let mut session = ShellSession::connect(shell, test_config(), Watchdog::new()).unwrap();

    let output = session.execute("mixed", false).unwrap();
    assert!(output.contains("first"));
    assert!(output.contains("warning: slow"));
}

#[test]
fn test_handshake_survives_noise_and_partial_sentinels() {
    let shell = scripted_shell();
    let partial = &PROMPT.as_bytes()[..PROMPT.len() - 1];
    shell.inject(b"*** maintenance window tonight ***\r\n");
    shell.inject(partial);
    shell.inject(b"\r\n");

    let mut session = ShellSession::connect(shell, test_config(), Watchdog::new()).unwrap();
    assert_eq!(session.execute("uname", false).unwrap(), "Linux\r\n");
}

#[test]
fn test_silent_host_fails_initialization() {
    let shell = FakeShell::mute();
    let config = SessionConfig {
        init_timeout: Duration::from_millis(800),
        ..test_config()
    };

    let result = ShellSession::connect(shell.clone(), config, Watchdog::new());
    assert!(matches!(result, Err(ShellError::InitTimeout { .. })));
    assert!(shell.is_closed());

    // Every retry used a fresh label
    let labels: Vec<String> = shell
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("echo "))
        .collect();
    assert!(labels.len() >= 2);
    assert_ne!(labels[0], labels[1]);
}

#[test]
fn test_command_timeout_breaks_session() {
    let shell = scripted_shell();
    let config = SessionConfig {
        command_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let mut session = ShellSession::connect(shell.clone(), config, Watchdog::new()).unwrap();

    shell.go_silent();
    let result = session.execute("uname", false);
    assert!(matches!(result, Err(ShellError::CommandTimeout { .. })));
    assert!(session.is_broken());

    // A broken session refuses further commands
    assert!(matches!(
        session.execute("uname", false),
        Err(ShellError::Protocol { .. })
    ));
}

#[test]
fn test_elevation_runs_before_prompt_setup() {
    let shell = scripted_shell();
    let config = SessionConfig {
        elevate_command: Some("sudo -iu profiler".to_string()),
        ..test_config()
    };
    let _session = ShellSession::connect(shell.clone(), config, Watchdog::new()).unwrap();

    let commands = shell.commands();
    let elevate = commands.iter().position(|c| c == "sudo -iu profiler").unwrap();
    let prompt = commands
        .iter()
        .position(|c| c.starts_with("export PS1="))
        .unwrap();
    assert!(elevate < prompt);
}

#[test]
fn test_transcript_records_session() {
    let temp_dir = TempDir::new().unwrap();
    let config = SessionConfig {
        transcript_dir: Some(temp_dir.path().to_path_buf()),
        ..test_config()
    };
    let mut session = ShellSession::connect(scripted_shell(), config, Watchdog::new()).unwrap();
    session.execute("uname", false).unwrap();
    session.close().unwrap();

    let path = temp_dir.path().join(format!("shell-{}.log", session.id()));
    let transcript = fs::read_to_string(path).unwrap();
    assert!(transcript.contains("> uname"));
    assert!(transcript.contains("Linux"));
}

fn sink_session(files: &[(&str, &[u8])], failing: Option<&str>) -> (FakeShell, ShellSession<FakeShell>) {
    let served: HashMap<String, Vec<u8>> = files
        .iter()
        .map(|(path, data)| (path.to_string(), data.to_vec()))
        .collect();
    let mut shell = FakeShell::new().with_files(Arc::new(served));
    if let Some(path) = failing {
        shell = shell.with_failing(path);
    }
    let session =
        ShellSession::connect(shell.clone(), test_config().raw(), Watchdog::new()).unwrap();
    (shell, session)
}

#[test]
fn test_sink_receives_exact_bytes() {
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let (shell, mut session) = sink_session(&[("/dump/calls/000001.bin", &body)], None);
    assert!(session.is_raw());
    assert!(shell.commands().iter().any(|c| c == "stty raw"));

    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("000001.bin");
    let size = session.receive_file("/dump/calls/000001.bin", &local).unwrap();

    assert_eq!(size, body.len() as u64);
    assert_eq!(fs::read(&local).unwrap(), body);
    assert!(!session.is_broken());
}

#[test]
fn test_sink_serves_consecutive_files() {
    let (_shell, mut session) = sink_session(
        &[("/d/a", b"alpha".as_slice()), ("/d/it's b", b"".as_slice())],
        None,
    );
    let temp_dir = TempDir::new().unwrap();

    let a = temp_dir.path().join("a");
    let b = temp_dir.path().join("b");
    assert_eq!(session.receive_file("/d/a", &a).unwrap(), 5);
    assert_eq!(session.receive_file("/d/it's b", &b).unwrap(), 0);
    assert_eq!(fs::read(&a).unwrap(), b"alpha");
    assert!(fs::read(&b).unwrap().is_empty());
}

#[test]
fn test_sink_missing_file_is_recoverable() {
    let (_shell, mut session) = sink_session(&[("/d/a", b"alpha".as_slice())], None);
    let temp_dir = TempDir::new().unwrap();

    let result = session.receive_file("/d/nope", &temp_dir.path().join("nope"));
    match result {
        Err(ShellError::Remote { message }) => assert!(message.contains("No such file")),
        other => panic!("expected remote error, got {:?}", other),
    }

    assert!(!session.is_broken());
    let a = temp_dir.path().join("a");
    assert_eq!(session.receive_file("/d/a", &a).unwrap(), 5);
}

#[test]
fn test_sink_failed_ack_interrupts_sender() {
    let (shell, mut session) = sink_session(
        &[("/d/bad", b"partial".as_slice()), ("/d/good", b"ok".as_slice())],
        Some("/d/bad"),
    );
    let temp_dir = TempDir::new().unwrap();

    let result = session.receive_file("/d/bad", &temp_dir.path().join("bad"));
    match result {
        Err(ShellError::Remote { message }) => assert_eq!(message, "scp: read error"),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert_eq!(shell.interrupts(), 1);

    let good = temp_dir.path().join("good");
    assert_eq!(session.receive_file("/d/good", &good).unwrap(), 2);
}

#[test]
fn test_sink_requires_raw_session() {
    let mut session =
        ShellSession::connect(scripted_shell(), test_config(), Watchdog::new()).unwrap();
    let temp_dir = TempDir::new().unwrap();

    let result = session.receive_file("/d/a", &temp_dir.path().join("a"));
    assert!(matches!(result, Err(ShellError::Protocol { .. })));
}
