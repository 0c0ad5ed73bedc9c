//! Credential resolution for SSH logins
//!
//! The user and password come from the command line first, then from the
//! environment (including a `.env` file loaded at startup), and the
//! password finally from an interactive prompt.

use std::env;

use tracing::debug;

use crate::constants::env as env_constants;
use crate::errors::{AuthError, AuthResult};

/// Resolve the login user: CLI, then environment, then configuration
pub fn resolve_user(cli: Option<&str>, configured: Option<&str>) -> AuthResult<String> {
    let from_env = env::var(env_constants::USER).ok();
    let user = cli
        .map(str::to_string)
        .or(from_env)
        .or_else(|| configured.map(str::to_string))
        .ok_or_else(|| AuthError::InvalidUser {
            reason: format!("no user given, use --user or set {}", env_constants::USER),
        })?;
    validate_user(&user)?;
    Ok(user)
}

/// Resolve the password: CLI, then environment, then a prompt when asked
///
/// Returns `None` when no password is available and prompting was not
/// requested, leaving authentication to the agent and key files.
pub fn resolve_password(cli: Option<String>, prompt: bool, login: &str) -> AuthResult<Option<String>> {
    if let Some(password) = pick_password(cli, env::var(env_constants::PASSWORD).ok()) {
        return Ok(Some(password));
    }
    if !prompt {
        debug!("No password supplied, relying on key based authentication");
        return Ok(None);
    }
    if !atty::is(atty::Stream::Stdin) {
        return Err(AuthError::MissingCredentials);
    }
    let password = rpassword::prompt_password(format!("Password for {}: ", login))?;
    Ok(Some(password))
}

/// First non-empty password of the command line and environment values
fn pick_password(cli: Option<String>, from_env: Option<String>) -> Option<String> {
    cli.into_iter()
        .chain(from_env)
        .find(|password| !password.is_empty())
}

fn validate_user(user: &str) -> AuthResult<()> {
    if user.trim().is_empty() {
        return Err(AuthError::InvalidUser {
            reason: "user name cannot be empty".to_string(),
        });
    }
    if user.chars().any(|c| c.is_whitespace() || c == '@') {
        return Err(AuthError::InvalidUser {
            reason: format!("'{}' contains whitespace or '@'", user),
        });
    }
    Ok(())
}
